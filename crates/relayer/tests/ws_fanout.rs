//! Viewer transport over a real socket: hello, fan-out, addressing, ping/pong.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relayer::api::{router, AppState};
use relayer::config::Config;
use relayer::db::Db;
use relayer::relay::BroadcastMessage;
use shared::{
    ws_types, PublishOutcome, RelayMessage, WsEnvelope, WsHelloPayload, WsPublishProgressPayload,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (SocketAddr, AppState) {
    let config = Arc::new(Config::for_test(PathBuf::from(":memory:")));
    let db = Arc::new(Db::open_in_memory().unwrap());
    let state = AppState::new(config, db);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn attach(addr: SocketAddr) -> (Client, WsHelloPayload) {
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let hello = next_envelope(&mut ws).await;
    assert_eq!(hello.r#type, ws_types::HELLO);
    let hello: WsHelloPayload = serde_json::from_value(hello.payload).unwrap();
    (ws, hello)
}

async fn next_envelope(ws: &mut Client) -> WsEnvelope {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => return serde_json::from_str(&t).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for envelope")
}

fn progress_for(viewer_id: Option<Uuid>) -> (Uuid, BroadcastMessage) {
    let job_id = Uuid::new_v4();
    let msg = BroadcastMessage::PublishProgress(WsPublishProgressPayload {
        job_id,
        viewer_id,
        topic: "order".to_string(),
        outcome: PublishOutcome {
            position: 1,
            success: true,
            message: "published".to_string(),
        },
        completed: 1,
        total: 1,
        progress: 1.0,
    });
    (job_id, msg)
}

#[tokio::test]
async fn hello_reports_session_and_broker_state() {
    let (addr, _state) = serve().await;
    let (_ws_a, a) = attach(addr).await;
    let (_ws_b, b) = attach(addr).await;
    assert!(!a.connected);
    assert_ne!(a.session_id, b.session_id);
}

#[tokio::test]
async fn every_viewer_receives_relay_events_in_order() {
    let (addr, state) = serve().await;
    let (mut a, _) = attach(addr).await;
    let (mut b, _) = attach(addr).await;

    state
        .relay
        .broadcast(BroadcastMessage::ReceiveMessage(RelayMessage::new("state", "{\"v\":1}")));
    state
        .relay
        .broadcast(BroadcastMessage::ConnectionStatus(false));

    for ws in [&mut a, &mut b] {
        let first = next_envelope(ws).await;
        assert_eq!(first.r#type, ws_types::RECEIVE_MESSAGE);
        assert_eq!(first.payload["topic"], "state");
        assert_eq!(first.payload["payload"], "{\"v\":1}");

        let second = next_envelope(ws).await;
        assert_eq!(second.r#type, ws_types::CONNECTION_STATUS);
        assert_eq!(second.payload["connected"], false);
    }
}

#[tokio::test]
async fn addressed_publish_events_reach_only_their_viewer() {
    let (addr, state) = serve().await;
    let (mut me, hello) = attach(addr).await;

    let (_, foreign) = progress_for(Some(Uuid::new_v4()));
    let (mine_id, mine) = progress_for(Some(hello.session_id));
    state.relay.broadcast(foreign);
    state.relay.broadcast(mine);

    let env = next_envelope(&mut me).await;
    assert_eq!(env.r#type, ws_types::PUBLISH_PROGRESS);
    assert_eq!(env.payload["job_id"], mine_id.to_string());
}

#[tokio::test]
async fn envelope_ping_is_answered_with_pong() {
    let (addr, _state) = serve().await;
    let (mut ws, _) = attach(addr).await;
    let ping = WsEnvelope::new(ws_types::PING, serde_json::json!({}));
    ws.send(Message::Text(serde_json::to_string(&ping).unwrap()))
        .await
        .unwrap();
    let env = next_envelope(&mut ws).await;
    assert_eq!(env.r#type, ws_types::PONG);
}
