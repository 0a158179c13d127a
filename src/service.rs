use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::BlobStorage;
use catalog_store::{DatasetCatalog, RocksDocumentStore};
use tokio::{
    self,
    signal,
    sync::watch,
};
use tracing::info;

use crate::{
    auth::{RemoteTokenVerifier, TokenVerifier},
    config::ServerConfig,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
    pub blob_storage: Arc<BlobStorage>,
    pub catalog: DatasetCatalog,
    pub token_verifier: Arc<dyn TokenVerifier>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let blob_storage = Arc::new(
            BlobStorage::new(config.blob_storage.clone())
                .context("error initializing BlobStorage")?,
        );

        let document_store = Arc::new(
            RocksDocumentStore::new(config.catalog_store_path.parse()?)
                .context("error initializing catalog store")?,
        );
        let catalog = DatasetCatalog::new(document_store);

        let token_verifier = RemoteTokenVerifier::from_config(&config.auth)
            .context("error initializing token verifier")?;

        Ok(Self {
            config,
            shutdown_tx,
            shutdown_rx,
            blob_storage,
            catalog,
            token_verifier,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        let route_state = RouteState {
            catalog: self.catalog.clone(),
            blob_storage: self.blob_storage.clone(),
            token_verifier: self.token_verifier.clone(),
        };

        let handle = Handle::new();
        let handle_sh = handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh, shutdown_tx).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(route_state);
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    let _ = shutdown_tx.send(());
    info!("signal received, shutting down server gracefully");
}
