//! HTTP API routes.

mod routes;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::broker::{BrokerManager, BrokerOptions};
use crate::config::Config;
use crate::db::Db;
use crate::publish::{PublishPipeline, RetryPolicy};
use crate::relay::RelayState;

/// Shared app state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub relay: Arc<RelayState>,
    pub config: Arc<Config>,
    pub broker: Arc<BrokerManager>,
    pub publisher: Arc<PublishPipeline<BrokerManager>>,
}

impl AppState {
    /// Wire relay, broker session and publish pipeline around `db`.
    pub fn new(config: Arc<Config>, db: Arc<Db>) -> Self {
        let relay = Arc::new(RelayState::with_capacity(config.relay_channel_capacity));
        let broker = Arc::new(BrokerManager::new(
            relay.clone(),
            BrokerOptions::from_config(&config),
        ));
        let publisher = Arc::new(
            PublishPipeline::new(
                broker.clone(),
                relay.clone(),
                RetryPolicy::from_config(&config),
            )
            .with_db(db.clone()),
        );
        Self {
            db,
            relay,
            config,
            broker,
            publisher,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .nest("/api", routes::api_routes())
        .route("/ws", get(routes::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
