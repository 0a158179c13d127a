use std::{cmp::Ordering, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use data_model::{DatasetRecord, EnrichedDatasetRecord, OwnerSnapshot, UserProfile};
use serde_json::Value;
use tracing::warn;

pub mod rocks;

pub use rocks::RocksDocumentStore;

/// A schema-flexible document keyed by collection and id.
pub type Document = serde_json::Map<String, Value>;

pub const DATASETS_COLLECTION: &str = "datasets";
pub const USERS_COLLECTION: &str = "users";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Equality filter on a single document field.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }
}

/// The narrow interface this service requires from its document database.
/// The shipped backend is rocksdb; a managed-database client is another
/// implementation of the same trait.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes a document. With `merge` set, top-level fields are merged
    /// into any existing document instead of replacing it.
    async fn set(&self, collection: &str, id: &str, fields: Document, merge: bool) -> Result<()>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Returns `(id, document)` pairs ordered by the `order_by` field,
    /// optionally restricted by an equality filter.
    async fn query(
        &self,
        collection: &str,
        order_by: &str,
        order: Order,
        filter: Option<FieldFilter>,
    ) -> Result<Vec<(String, Document)>>;
}

/// Field ordering over JSON values; numbers compare numerically, strings
/// lexically, and absent/mixed-type fields sort last.
pub(crate) fn cmp_field_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Profile documents keyed by user id, with merge-upsert semantics.
#[derive(Clone)]
pub struct ProfileStore {
    store: Arc<dyn DocumentStore>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let doc = self.store.get(USERS_COLLECTION, user_id).await?;
        match doc {
            Some(doc) => Ok(Some(serde_json::from_value(Value::Object(doc))?)),
            None => Ok(None),
        }
    }

    /// Merge-writes the profile; fields absent from `profile` but present
    /// in the stored document are preserved.
    pub async fn upsert(&self, user_id: &str, profile: &UserProfile) -> Result<()> {
        let value = serde_json::to_value(profile)?;
        let Value::Object(fields) = value else {
            unreachable!("UserProfile serializes to an object");
        };
        self.store.set(USERS_COLLECTION, user_id, fields, true).await
    }
}

/// Dataset metadata records, written once per successful upload and read
/// back enriched with the owner's profile snapshot.
#[derive(Clone)]
pub struct DatasetCatalog {
    store: Arc<dyn DocumentStore>,
    profiles: ProfileStore,
}

impl DatasetCatalog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let profiles = ProfileStore::new(store.clone());
        Self { store, profiles }
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub async fn create_dataset(&self, record: &DatasetRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let Value::Object(fields) = value else {
            unreachable!("DatasetRecord serializes to an object");
        };
        self.store
            .set(DATASETS_COLLECTION, record.id.get(), fields, false)
            .await
    }

    /// Lists records newest first, optionally restricted to one owner.
    /// Each record carries a best-effort owner snapshot; a missing or
    /// unreadable profile degrades to null name/picture.
    pub async fn list_datasets(&self, owner: Option<&str>) -> Result<Vec<EnrichedDatasetRecord>> {
        let filter = owner.map(|user_id| FieldFilter::eq("userId", user_id));
        let rows = self
            .store
            .query(DATASETS_COLLECTION, "createdAt", Order::Descending, filter)
            .await?;

        let mut datasets = Vec::with_capacity(rows.len());
        for (_, doc) in rows {
            let record: DatasetRecord = serde_json::from_value(Value::Object(doc))?;
            let user = self.owner_snapshot(&record.user_id).await;
            datasets.push(EnrichedDatasetRecord { record, user });
        }
        Ok(datasets)
    }

    // TODO: batch the profile lookups over the distinct owner ids in the
    // page once listings grow beyond a handful of owners.
    async fn owner_snapshot(&self, user_id: &str) -> OwnerSnapshot {
        let profile = match self.profiles.get(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("failed to load profile for {}: {:?}", user_id, e);
                None
            }
        };
        OwnerSnapshot {
            id: user_id.to_string(),
            name: profile.as_ref().map(|p| p.name.clone()),
            picture: profile.as_ref().and_then(|p| p.picture.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use data_model::DatasetRecordBuilder;

    use super::*;

    fn test_catalog(dir: &tempfile::TempDir) -> DatasetCatalog {
        let store = Arc::new(RocksDocumentStore::new(dir.path().join("catalog")).unwrap());
        DatasetCatalog::new(store)
    }

    fn record(user_id: &str, original_name: &str, created_at: u64) -> DatasetRecord {
        let mut record = DatasetRecordBuilder::default()
            .filename(format!("20240101_000000_tok_{}", original_name))
            .original_name(original_name.to_string())
            .file_url(format!("blobs/datasets/{}/{}", user_id, original_name))
            .size(64)
            .user_id(user_id.to_string())
            .build()
            .unwrap();
        record.created_at = created_at;
        record
    }

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            name: name.to_string(),
            bio: None,
            location: None,
            website: None,
            company: None,
            picture: Some(format!("https://avatars.example.com/{}", name)),
        }
    }

    #[tokio::test]
    async fn test_profile_merge_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        let profiles = catalog.profiles();

        let mut first = profile("A");
        first.bio = Some("B".to_string());
        first.picture = None;
        profiles.upsert("u1", &first).await.unwrap();

        let mut update = profile("A");
        update.location = Some("C".to_string());
        update.picture = None;
        profiles.upsert("u1", &update).await.unwrap();

        let fetched = profiles.get("u1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "A");
        assert_eq!(fetched.bio, Some("B".to_string()));
        assert_eq!(fetched.location, Some("C".to_string()));
    }

    #[tokio::test]
    async fn test_profile_get_missing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        assert!(catalog.profiles().get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        for (name, at) in [("t1.csv", 100u64), ("t2.csv", 200), ("t3.csv", 300)] {
            catalog.create_dataset(&record("u1", name, at)).await.unwrap();
        }
        let datasets = catalog.list_datasets(None).await.unwrap();
        let names: Vec<&str> = datasets
            .iter()
            .map(|d| d.record.original_name.as_str())
            .collect();
        assert_eq!(names, vec!["t3.csv", "t2.csv", "t1.csv"]);
    }

    #[tokio::test]
    async fn test_list_filters_by_owner_and_enriches() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        catalog.create_dataset(&record("u1", "a.csv", 1)).await.unwrap();
        catalog.create_dataset(&record("u2", "b.csv", 2)).await.unwrap();
        catalog.profiles().upsert("u1", &profile("Ada")).await.unwrap();

        let datasets = catalog.list_datasets(Some("u1")).await.unwrap();
        assert_eq!(datasets.len(), 1);
        let dataset = &datasets[0];
        assert_eq!(dataset.record.user_id, "u1");
        assert_eq!(dataset.user.id, "u1");
        assert_eq!(dataset.user.name, Some("Ada".to_string()));
        assert_eq!(
            dataset.user.picture,
            Some("https://avatars.example.com/Ada".to_string())
        );
    }

    #[tokio::test]
    async fn test_list_missing_profile_degrades_to_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        catalog.create_dataset(&record("ghost", "a.csv", 1)).await.unwrap();

        let datasets = catalog.list_datasets(None).await.unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].user.id, "ghost");
        assert_eq!(datasets[0].user.name, None);
        assert_eq!(datasets[0].user.picture, None);
    }

    #[tokio::test]
    async fn test_list_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        for (name, at) in [("a.csv", 5u64), ("b.csv", 9)] {
            catalog.create_dataset(&record("u1", name, at)).await.unwrap();
        }
        let first = catalog.list_datasets(None).await.unwrap();
        let second = catalog.list_datasets(None).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cmp_field_values() {
        let a = Value::from(10u64);
        let b = Value::from(20u64);
        assert_eq!(cmp_field_values(Some(&a), Some(&b)), Ordering::Less);
        assert_eq!(cmp_field_values(Some(&b), Some(&a)), Ordering::Greater);
        assert_eq!(cmp_field_values(Some(&a), None), Ordering::Less);

        let s1 = Value::from("alpha");
        let s2 = Value::from("beta");
        assert_eq!(cmp_field_values(Some(&s1), Some(&s2)), Ordering::Less);
    }
}
