use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use blob_store::{BlobStorage, BlobStorageConfig};
use catalog_store::{DatasetCatalog, RocksDocumentStore};
use data_model::UserIdentity;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{auth::TokenVerifier, routes::RouteState};

/// Verifier backed by a fixed token -> identity table, standing in for
/// the external identity provider in tests.
pub struct StaticTokenVerifier {
    users: HashMap<String, UserIdentity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    pub fn with_user(mut self, token: &str, user_id: &str) -> Self {
        self.users.insert(
            token.to_string(),
            UserIdentity {
                id: user_id.to_string(),
                email: Some(format!("{}@example.com", user_id)),
                name: Some(user_id.to_string()),
                picture: None,
            },
        );
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserIdentity> {
        self.users
            .get(token)
            .cloned()
            .ok_or_else(|| anyhow!("token rejected by identity provider"))
    }
}

pub struct TestService {
    pub route_state: RouteState,
    _temp_dir: tempfile::TempDir,
}

impl TestService {
    pub fn new(verifier: StaticTokenVerifier) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let temp_dir = tempfile::tempdir()?;
        let blob_storage = Arc::new(BlobStorage::new(BlobStorageConfig::new(
            temp_dir.path().join("blob_store").to_str().unwrap(),
        ))?);
        let document_store = Arc::new(RocksDocumentStore::new(
            temp_dir.path().join("catalog_store"),
        )?);
        let route_state = RouteState {
            catalog: DatasetCatalog::new(document_store),
            blob_storage,
            token_verifier: Arc::new(verifier),
        };

        Ok(Self {
            route_state,
            _temp_dir: temp_dir,
        })
    }
}
