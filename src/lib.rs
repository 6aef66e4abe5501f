pub mod canonical;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod handlers;
pub mod models;
pub mod proxy;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod security;
pub mod snapshot;
pub mod upstream;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::registry::RouteRegistry;
use crate::repository::{ServiceRepository, SqliteServiceRepository};
use crate::snapshot::Snapshotter;
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn ServiceRepository>,
    pub registry: RouteRegistry,
    pub upstream: Arc<UpstreamClient>,
    pub snapshotter: Snapshotter,
}

impl AppState {
    pub fn new(config: Arc<Config>, pool: SqlitePool) -> Self {
        let repo: Arc<dyn ServiceRepository> = Arc::new(SqliteServiceRepository::new(
            pool,
            config.polling.min_check_frequency,
        ));
        let upstream = Arc::new(UpstreamClient::default());
        let snapshotter = Snapshotter::new(upstream.clone());

        AppState {
            config,
            repo,
            registry: RouteRegistry::new(),
            upstream,
            snapshotter,
        }
    }
}

/// Assembles the full application router.
///
/// The proxy wildcard is always mounted; the admin API only when
/// `admin.disable_ui` is false.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health));

    if !state.config.admin.disable_ui {
        router = router.nest("/api/admin", handlers::admin_api::admin_router(state.clone()));
    }

    router
        .route(
            "/{service_name}/mcp",
            post(proxy::proxy_handler)
                .get(proxy::proxy_handler)
                .delete(proxy::proxy_handler),
        )
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "MCP Guardian",
        "version": env!("CARGO_PKG_VERSION"),
        "admin_api": "/api/admin/",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}
