//! Server entrypoint

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use task_router_config::load_settings;
use task_router_server::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("TASK_ROUTER_CONFIG").ok().map(PathBuf::from);
    let settings = load_settings(config_path.as_deref())?;
    tracing::info!(
        host = %settings.server.host,
        port = settings.server.port,
        catalog = %settings.catalog_path,
        "starting task router"
    );

    let address = format!("{}:{}", settings.server.host, settings.server.port);
    let state = AppState::build(settings)?;

    // Background expiry sweep; the sender keeps the task alive until
    // shutdown.
    let sweep_shutdown = Arc::clone(&state.sessions).start_sweep_task();

    // Idle rate-limit buckets are dropped on the same cadence.
    let limiter = Arc::clone(&state.rate_limiter);
    let cleanup_interval =
        std::time::Duration::from_secs(state.settings.session.cleanup_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            ticker.tick().await;
            limiter.evict_idle();
        }
    });

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = sweep_shutdown.send(true);
    Ok(())
}
