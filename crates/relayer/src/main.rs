//! MQTT relayer: HTTP control API + WebSocket fan-out.
//!
//! Optional env: HOST, PORT, DATABASE_PATH, MQTT_KEEP_ALIVE_SECS,
//! MQTT_CONNECT_TIMEOUT_SECS, MQTT_CHANNEL_CAPACITY, RELAY_CHANNEL_CAPACITY,
//! PUBLISH_MAX_ATTEMPTS, PUBLISH_BACKOFF_MS

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use relayer::{api, config, db, snapshot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Arc::new(config::Config::from_env());

    let db = db::Db::open(&config.database_path)
        .with_context(|| format!("open database {}", config.database_path.display()))?;
    db.run_migrations()?;
    let db = Arc::new(db);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    let state = api::AppState::new(config.clone(), db.clone());
    snapshot::spawn(&state.relay, state.broker.clone(), db);

    let app = api::router(state.clone());

    tracing::info!("Relayer listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.broker.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
