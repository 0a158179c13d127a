use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rocksdb::{
    BoundColumnFamily,
    ColumnFamilyDescriptor,
    IteratorMode,
    Options,
    TransactionDB,
    TransactionDBOptions,
};
use serde_json::Value;
use strum::{AsRefStr, IntoEnumIterator};
use tracing::info;

use crate::{cmp_field_values, Document, DocumentStore, FieldFilter, Order};

#[derive(AsRefStr, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
enum CatalogColumns {
    Datasets, // DatasetId -> DatasetRecord document
    Users,    // UserId -> UserProfile document
}

impl CatalogColumns {
    fn cf<'a>(&'a self, db: &'a TransactionDB) -> Result<Arc<BoundColumnFamily<'a>>> {
        db.cf_handle(self.as_ref())
            .ok_or_else(|| anyhow!("failed to get column family handle for {}", self.as_ref()))
    }

    fn from_collection(collection: &str) -> Result<Self> {
        match collection {
            "datasets" => Ok(CatalogColumns::Datasets),
            "users" => Ok(CatalogColumns::Users),
            _ => Err(anyhow!("unknown collection: {}", collection)),
        }
    }
}

/// Document store over a rocksdb `TransactionDB`, one column family per
/// collection, documents stored as JSON.
pub struct RocksDocumentStore {
    db: TransactionDB,
}

impl RocksDocumentStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)
            .map_err(|e| anyhow!("failed to create catalog store dir: {}", e))?;

        let column_families = CatalogColumns::iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);
        let db = TransactionDB::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            &path,
            column_families,
        )?;
        info!("catalog store opened at {:?}", path);
        Ok(Self { db })
    }
}

#[async_trait]
impl DocumentStore for RocksDocumentStore {
    async fn set(&self, collection: &str, id: &str, fields: Document, merge: bool) -> Result<()> {
        let column = CatalogColumns::from_collection(collection)?;
        let cf = column.cf(&self.db)?;
        if !merge {
            let serialized = serde_json::to_vec(&Value::Object(fields))?;
            self.db.put_cf(&cf, id, &serialized)?;
            return Ok(());
        }

        // Merge is a read-modify-write inside a transaction so concurrent
        // merges on the same document don't drop fields.
        let txn = self.db.transaction();
        let mut document = match txn.get_for_update_cf(&cf, id, true)? {
            Some(existing) => serde_json::from_slice::<Document>(&existing)?,
            None => Document::new(),
        };
        for (key, value) in fields {
            document.insert(key, value);
        }
        let serialized = serde_json::to_vec(&Value::Object(document))?;
        txn.put_cf(&cf, id, &serialized)?;
        txn.commit()?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let column = CatalogColumns::from_collection(collection)?;
        let cf = column.cf(&self.db)?;
        match self.db.get_cf(&cf, id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        collection: &str,
        order_by: &str,
        order: Order,
        filter: Option<FieldFilter>,
    ) -> Result<Vec<(String, Document)>> {
        let column = CatalogColumns::from_collection(collection)?;
        let cf = column.cf(&self.db)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| anyhow!("non-utf8 document id: {}", e))?;
            let document: Document = serde_json::from_slice(&value)?;
            if let Some(filter) = &filter {
                if document.get(&filter.field) != Some(&filter.value) {
                    continue;
                }
            }
            rows.push((id, document));
        }
        rows.sort_by(|(_, a), (_, b)| {
            let ordering = cmp_field_values(a.get(order_by), b.get(order_by));
            match order {
                Order::Ascending => ordering,
                Order::Descending => ordering.reverse(),
            }
        });
        Ok(rows)
    }
}
