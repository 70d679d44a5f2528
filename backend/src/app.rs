//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::api;
use crate::config::{ServerConfig, StoreKind};
use crate::database::{create_pool, Repository};
use crate::error::{AppError, Result};
use crate::services::{
    DigestRunner, DigestScheduler, DigestService, LogMailer, MagicLinkService, Mailer,
    MetricsService, ObjectivesService, TasksService, UsersService,
};
use crate::storage::{JsonFileStore, Store};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn Store>,
    pub users: UsersService,
    pub auth: MagicLinkService,
    pub objectives: ObjectivesService,
    pub metrics: MetricsService,
    pub tasks: TasksService,
    pub digests: DigestService,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<dyn Store>, mailer: Arc<dyn Mailer>) -> Self {
        let users = UsersService::new(store.clone());
        let auth = MagicLinkService::new(store.clone(), users.clone());
        let digests =
            DigestService::new(store.clone(), auth.clone(), mailer, config.app_url.clone());

        Self {
            users,
            auth,
            objectives: ObjectivesService::new(store.clone()),
            metrics: MetricsService::new(store.clone()),
            tasks: TasksService::new(store.clone()),
            digests,
            store,
            config: Arc::new(config),
        }
    }
}

/// Open the configured persistence backend
pub async fn open_store(config: &ServerConfig) -> Result<Arc<dyn Store>> {
    tokio::fs::create_dir_all(&config.data_dir).await?;

    match config.store {
        StoreKind::Sqlite => {
            let pool = create_pool(&config.database_path()).await?;
            Ok(Arc::new(Repository::new(pool)))
        }
        StoreKind::Json => {
            let store = JsonFileStore::open(config.json_path()).await?;
            Ok(Arc::new(store))
        }
    }
}

/// A fully wired server, ready to accept connections
pub struct App {
    pub state: AppState,
    scheduler: Option<DigestScheduler>,
}

/// Application setup - called once on startup
pub async fn setup(config: ServerConfig) -> Result<App> {
    tracing::info!("Initializing application");
    tracing::info!("Data directory: {:?} ({:?} store)", config.data_dir, config.store);

    let store = open_store(&config).await?;
    let scheduler_enabled = config.scheduler_enabled;
    let state = AppState::new(config, store, Arc::new(LogMailer));

    let scheduler = if scheduler_enabled {
        let runner = DigestRunner::new(state.store.clone(), state.digests.clone());
        let scheduler = DigestScheduler::new(runner).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        tracing::info!("Digest scheduler disabled");
        None
    };

    tracing::info!("Application initialized successfully");

    Ok(App { state, scheduler })
}

impl App {
    /// Serve the API on `listener` until Ctrl-C, then stop the scheduler
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let router = api::router(self.state.clone());

        tracing::info!("Listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await?;
        }
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Bind the configured address and serve
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
