pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod mcp;
pub mod models;
pub mod repositories;
pub mod services;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use config::AppConfig;
use mcp::{
    Deployer, InstanceManager, InstanceRegistry, MountTable, SseDeployer, StreamableHttpDeployer,
    ToolInvoker, ToolManager,
};
use repositories::SqliteResourceDeployRepository;
use services::{Reconciler, ToolServerService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ToolServerService>,
    pub reconciler: Arc<Reconciler>,
    pub mounts: Arc<MountTable>,
    /// Cancelled when the process starts shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires the registry, both transports, the durable store and the
    /// reconciler around one mount table
    pub fn new(
        pool: SqlitePool,
        config: &AppConfig,
        invoker: Arc<dyn ToolInvoker>,
        shutdown: CancellationToken,
    ) -> Self {
        let mounts = Arc::new(MountTable::new());
        let deployers: Vec<Arc<dyn Deployer>> = vec![
            Arc::new(StreamableHttpDeployer::new(
                Arc::clone(&mounts),
                config.route_prefix.clone(),
            )),
            Arc::new(SseDeployer::new(
                Arc::clone(&mounts),
                config.route_prefix.clone(),
                config.sse_keep_alive,
            )),
        ];

        let manager = Arc::new(InstanceManager::new(
            Arc::new(InstanceRegistry::new()),
            ToolManager::new(invoker),
            deployers,
        ));
        let repository = Arc::new(SqliteResourceDeployRepository::new(pool.clone()));

        let service = Arc::new(ToolServerService::new(
            pool,
            repository.clone(),
            Arc::clone(&manager),
        ));
        let reconciler = Arc::new(
            Reconciler::new(repository, manager, config.reconcile_policy)
                .with_lock(service.lifecycle_lock()),
        );

        Self {
            service,
            reconciler,
            mounts,
            shutdown,
        }
    }

    pub fn manager(&self) -> &Arc<InstanceManager> {
        self.service.manager()
    }
}

/// Management API plus every mounted tool server endpoint on one router
pub fn build_app(state: AppState) -> Router {
    // Authorization and MCP headers must be listed explicitly
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderName::from_static("mcp-protocol-version"),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    let tool_endpoints = mcp::mounted_routes(Arc::clone(&state.mounts)).layer(cors_layer);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(handlers::tool_server_routes().with_state(state))
        .fallback_service(tool_endpoints)
        .layer(TraceLayer::new_for_http())
}
