use std::sync::Arc;
use std::time::Duration;

use mcp_guardian::{
    build_router,
    config::Config,
    db,
    scheduler::{spawn_check_scheduler, spawn_route_poller},
    AppState,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcp_guardian=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MCP Guardian...");

    let config = Arc::new(Config::load()?);

    if config.password_generated {
        tracing::warn!(
            "No admin password in config.yml - generated random password: {}",
            config.admin_password
        );
        tracing::warn!("Save this password! It is required to access the admin API.");
    } else {
        tracing::info!("Admin password loaded from config.yml");
    }
    if config.admin.disable_ui {
        tracing::info!("Admin API is DISABLED (disable_ui=true in config)");
    }

    // Database connection and migrations
    let pool = db::create_pool(&config.database.url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database initialized");

    let state = AppState::new(config.clone(), pool);

    // Seed services from config.yml, then warm the route registry
    seed_services_from_config(&state).await;
    state.registry.reload(state.repo.as_ref()).await?;

    // Start background schedulers
    let shutdown = CancellationToken::new();
    let interval = Duration::from_secs(config.polling.interval_seconds);
    let route_poller = spawn_route_poller(
        state.registry.clone(),
        state.repo.clone(),
        interval,
        shutdown.child_token(),
    );
    let check_scheduler = spawn_check_scheduler(
        state.registry.clone(),
        state.repo.clone(),
        state.snapshotter.clone(),
        interval,
        shutdown.child_token(),
    );
    tracing::info!("Background schedulers started");

    let app = build_router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("MCP Guardian listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Shutdown: cancel background tasks and wait for them to drain
    shutdown.cancel();
    let _ = route_poller.await;
    let _ = check_scheduler.await;

    tracing::info!("MCP Guardian shut down complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down MCP Guardian...");
    shutdown.cancel();
}

/// Upserts seed services from config.yml.
///
/// Only names that do not exist yet are added; an existing row is never
/// modified by seeding. A seed whose upstream cannot be snapshotted is
/// logged and skipped rather than aborting startup.
async fn seed_services_from_config(state: &AppState) {
    if state.config.services.is_empty() {
        tracing::info!("No services defined in config.yml");
        return;
    }

    for seed in &state.config.services {
        match state.repo.get_service(&seed.name).await {
            Ok(Some(_)) => {
                tracing::info!(name = %seed.name, "service already exists - skipping seed");
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(name = %seed.name, error = %e, "failed to look up seed service");
                continue;
            }
        }

        tracing::info!(name = %seed.name, "adding service from config");
        let outcome = match state.snapshotter.snapshot(&seed.upstream_url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(name = %seed.name, error = %e, "failed to snapshot seed service");
                continue;
            }
        };

        let payload = match serde_json::to_string(&outcome.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(name = %seed.name, error = %e, "failed to serialize snapshot");
                continue;
            }
        };

        match state
            .repo
            .upsert_service_from_config(seed, &payload, &outcome.hash)
            .await
        {
            Ok(Some(_)) => {
                tracing::info!(name = %seed.name, hash = %outcome.hash, "service added from config");
            }
            Ok(None) => {
                tracing::info!(name = %seed.name, "service appeared concurrently - skipping seed");
            }
            Err(e) => {
                tracing::error!(name = %seed.name, error = %e, "failed to add seed service");
            }
        }
    }
}
