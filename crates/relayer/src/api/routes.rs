//! API route handlers.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use shared::{
    ws_types, BrokerConnection, BrokerStatusResponse, PublishAccepted, PublishRequest,
    PublishResultEntry, RelayMessage, TopicRequest, WsEnvelope, WsHelloPayload,
};

use crate::api::AppState;
use crate::broker::BrokerError;
use crate::db;
use crate::publish::PublishError;

const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const DEFAULT_RESULTS_LIMIT: usize = 50;
const MAX_RESULTS_LIMIT: usize = 500;

type ApiError = (StatusCode, String);

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/broker/connect", post(broker_connect))
        .route("/broker/disconnect", post(broker_disconnect))
        .route("/broker/status", get(broker_status))
        .route("/broker/subscribe", post(broker_subscribe))
        .route("/broker/unsubscribe", post(broker_unsubscribe))
        .route("/publish", post(publish))
        .route("/publish/results", get(publish_results))
        .route("/connection", get(connection_get))
        .route("/subscriptions", get(subscriptions_get))
        .route("/messages/latest", get(messages_latest))
}

fn broker_error(e: BrokerError) -> ApiError {
    let status = match e {
        BrokerError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        BrokerError::NotConnected => StatusCode::CONFLICT,
        BrokerError::ConnectFailed(_)
        | BrokerError::ConnectTimeout(_)
        | BrokerError::Subscription { .. }
        | BrokerError::Publish { .. } => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}

fn publish_error(e: PublishError) -> ApiError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn internal(e: anyhow::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// --- Broker session ---

async fn broker_connect(
    State(state): State<AppState>,
    Json(req): Json<BrokerConnection>,
) -> Result<Json<BrokerStatusResponse>, ApiError> {
    state.broker.connect(&req).await.map_err(broker_error)?;
    if let Err(e) = db::save_connection(&state.db.conn(), &req) {
        tracing::warn!(error = %e, "failed to store broker connection");
    }
    Ok(Json(state.broker.status()))
}

async fn broker_disconnect(State(state): State<AppState>) -> Json<BrokerStatusResponse> {
    state.broker.disconnect().await;
    persist_subscriptions(&state);
    Json(state.broker.status())
}

async fn broker_status(State(state): State<AppState>) -> Json<BrokerStatusResponse> {
    Json(state.broker.status())
}

async fn broker_subscribe(
    State(state): State<AppState>,
    Json(req): Json<TopicRequest>,
) -> Result<Json<BrokerStatusResponse>, ApiError> {
    let topic = topic_from(&req)?;
    state.broker.subscribe(topic).await.map_err(broker_error)?;
    persist_subscriptions(&state);
    Ok(Json(state.broker.status()))
}

async fn broker_unsubscribe(
    State(state): State<AppState>,
    Json(req): Json<TopicRequest>,
) -> Result<Json<BrokerStatusResponse>, ApiError> {
    let topic = topic_from(&req)?;
    state.broker.unsubscribe(topic).await.map_err(broker_error)?;
    persist_subscriptions(&state);
    Ok(Json(state.broker.status()))
}

fn topic_from(req: &TopicRequest) -> Result<&str, ApiError> {
    if req.topic.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "topic must not be empty".to_string()));
    }
    Ok(&req.topic)
}

fn persist_subscriptions(state: &AppState) {
    let Some(client_id) = state.broker.client_id() else {
        return;
    };
    let topics = state.broker.subscriptions();
    if let Err(e) = db::save_subscriptions(&state.db.conn(), &client_id, &topics) {
        tracing::warn!(client_id = %client_id, error = %e, "failed to store subscriptions");
    }
}

// --- Publish ---

async fn publish(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishAccepted>), ApiError> {
    let accepted = state
        .publisher
        .start(&req.topic, &req.payload, req.viewer_id)
        .map_err(publish_error)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[derive(Debug, Deserialize)]
struct ResultsQuery {
    limit: Option<usize>,
}

async fn publish_results(
    State(state): State<AppState>,
    Query(q): Query<ResultsQuery>,
) -> Result<Json<Vec<PublishResultEntry>>, ApiError> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_RESULTS_LIMIT)
        .min(MAX_RESULTS_LIMIT);
    let rows = db::list_recent_publish_results(&state.db.conn(), limit).map_err(internal)?;
    Ok(Json(rows))
}

// --- Snapshots ---

async fn connection_get(
    State(state): State<AppState>,
) -> Result<Json<Option<BrokerConnection>>, ApiError> {
    let conn = db::load_connection(&state.db.conn()).map_err(internal)?;
    Ok(Json(conn))
}

#[derive(Debug, Deserialize)]
struct ClientQuery {
    client_id: Option<String>,
}

/// Explicit `client_id`, else the current broker session's.
fn client_id_for(state: &AppState, q: ClientQuery) -> Option<String> {
    q.client_id
        .filter(|c| !c.trim().is_empty())
        .or_else(|| state.broker.client_id())
}

async fn subscriptions_get(
    State(state): State<AppState>,
    Query(q): Query<ClientQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let Some(client_id) = client_id_for(&state, q) else {
        return Ok(Json(Vec::new()));
    };
    let topics = db::load_subscriptions(&state.db.conn(), &client_id).map_err(internal)?;
    Ok(Json(topics))
}

async fn messages_latest(
    State(state): State<AppState>,
    Query(q): Query<ClientQuery>,
) -> Result<Json<Vec<RelayMessage>>, ApiError> {
    let Some(client_id) = client_id_for(&state, q) else {
        return Ok(Json(Vec::new()));
    };
    let messages = db::list_latest_messages(&state.db.conn(), &client_id).map_err(internal)?;
    Ok(Json(messages))
}

// --- WebSocket ---

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_envelope(
    tx: &mut SplitSink<WebSocket, Message>,
    envelope: &WsEnvelope,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(envelope).map_err(axum::Error::new)?;
    tx.send(Message::Text(text.into())).await
}

/// One viewer session: hello, then relay events (filtered to this session) plus
/// keepalive pings until either side goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Attach before hello so nothing emitted after it can be missed.
    let mut rx = state.relay.subscribe();

    let hello = WsHelloPayload {
        session_id,
        connected: state.broker.is_connected(),
    };
    let hello = match serde_json::to_value(hello) {
        Ok(v) => WsEnvelope::new(ws_types::HELLO, v),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode hello");
            return;
        }
    };
    if send_envelope(&mut ws_tx, &hello).await.is_err() {
        return;
    }
    tracing::info!(session_id = %session_id, "viewer attached");

    let mut ping_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + PING_INTERVAL, PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            recv = rx.recv() => match recv {
                Ok(msg) if msg.is_for(session_id) => {
                    let envelope = match msg.to_envelope() {
                        Ok(e) => e,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode relay event");
                            continue;
                        }
                    };
                    if send_envelope(&mut ws_tx, &envelope).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(session_id = %session_id, skipped = n, "viewer lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(t))) => {
                    let is_ping = serde_json::from_str::<WsEnvelope>(t.as_str())
                        .map(|e| e.r#type == ws_types::PING)
                        .unwrap_or(false);
                    if is_ping {
                        let pong = WsEnvelope::new(ws_types::PONG, serde_json::json!({}));
                        if send_envelope(&mut ws_tx, &pong).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::info!(session_id = %session_id, "viewer detached");
}

#[cfg(test)]
mod tests {
    use crate::api::{router, AppState};
    use crate::broker::testing::fake_broker;
    use crate::config::Config;
    use crate::db::Db;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = Arc::new(Config::for_test(PathBuf::from(":memory:")));
        let db = Arc::new(Db::open_in_memory().unwrap());
        AppState::new(config, db)
    }

    async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&b).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let state = test_state();
        let (status, body) = call(&state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn connect_rejects_invalid_config() {
        let state = test_state();
        let (status, _) = call(
            &state,
            "POST",
            "/api/broker/connect",
            Some(json!({"host": "", "port": 1883, "client_id": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&state, "GET", "/api/broker/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "disconnected");
        assert_eq!(body["connected"], false);
    }

    #[tokio::test]
    async fn connect_to_unreachable_broker_is_bad_gateway() {
        let port = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let state = test_state();
        let (status, _) = call(
            &state,
            "POST",
            "/api/broker/connect",
            Some(json!({"host": "127.0.0.1", "port": port, "client_id": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let (_, stored) = call(&state, "GET", "/api/connection", None).await;
        assert_eq!(stored, Value::Null);
    }

    #[tokio::test]
    async fn subscribe_requires_a_session() {
        let state = test_state();
        let (status, _) = call(
            &state,
            "POST",
            "/api/broker/subscribe",
            Some(json!({"topic": "state"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &state,
            "POST",
            "/api/broker/subscribe",
            Some(json!({"topic": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_lifecycle_persists_connection_and_subscriptions() {
        let (port, _kill) = fake_broker().await;
        let state = test_state();

        let (status, body) = call(
            &state,
            "POST",
            "/api/broker/connect",
            Some(json!({"host": "127.0.0.1", "port": port, "client_id": "relay-api"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], true);
        assert_eq!(body["client_id"], "relay-api");

        let (_, stored) = call(&state, "GET", "/api/connection", None).await;
        assert_eq!(stored["client_id"], "relay-api");
        assert_eq!(stored["username"], "");

        for topic in ["state", "order"] {
            let (status, _) = call(
                &state,
                "POST",
                "/api/broker/subscribe",
                Some(json!({ "topic": topic })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = call(
            &state,
            "POST",
            "/api/broker/unsubscribe",
            Some(json!({"topic": "order"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscriptions"], json!(["state"]));

        let (_, topics) = call(&state, "GET", "/api/subscriptions", None).await;
        assert_eq!(topics, json!(["state"]));
        let (_, topics) = call(&state, "GET", "/api/subscriptions?client_id=someone-else", None).await;
        assert_eq!(topics, json!([]));

        let (status, body) = call(&state, "POST", "/api/broker/disconnect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], false);
        assert_eq!(body["subscriptions"], json!([]));

        let (_, topics) = call(&state, "GET", "/api/subscriptions", None).await;
        assert_eq!(topics, json!([]));
    }

    #[tokio::test]
    async fn publish_validates_before_accepting() {
        let state = test_state();
        let (status, _) = call(
            &state,
            "POST",
            "/api/publish",
            Some(json!({"topic": "", "payload": "{}"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &state,
            "POST",
            "/api/publish",
            Some(json!({"topic": "order", "payload": "[{\"a\":1},"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &state,
            "POST",
            "/api/publish",
            Some(json!({"topic": "order", "payload": "[{\"a\":1},{\"a\":2},{\"a\":3}]"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["items"], 3);
        assert!(body["job_id"].is_string());
    }

    #[tokio::test]
    async fn publish_results_start_empty() {
        let state = test_state();
        let (status, body) = call(&state, "GET", "/api/publish/results?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, body) = call(&state, "GET", "/api/messages/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }
}
