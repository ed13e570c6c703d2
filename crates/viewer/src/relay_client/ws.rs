//! WebSocket client for the relayer's event stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use shared::{
    ws_types, RelayMessage, WsConnectionStatusPayload, WsEnvelope, WsHelloPayload,
    WsPublishProgressPayload, WsPublishResultPayload,
};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::relay_client::RelayerApi;
use crate::state::ViewerState;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// What an envelope turned out to be, after it was applied to the viewer state.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Hello(WsHelloPayload),
    ConnectionStatus(bool),
    Message(RelayMessage),
    PublishProgress(WsPublishProgressPayload),
    PublishResult(WsPublishResultPayload),
    Ping,
    Ignored,
}

/// Apply one envelope to `state`.
pub fn dispatch(state: &ViewerState, envelope: WsEnvelope) -> Dispatch {
    fn decode<T: serde::de::DeserializeOwned>(envelope: WsEnvelope) -> Option<T> {
        match serde_json::from_value(envelope.payload) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(kind = %envelope.r#type, error = %e, "bad envelope payload");
                None
            }
        }
    }

    match envelope.r#type.as_str() {
        ws_types::HELLO => match decode::<WsHelloPayload>(envelope) {
            Some(hello) => {
                state.on_hello(hello.session_id, hello.connected);
                Dispatch::Hello(hello)
            }
            None => Dispatch::Ignored,
        },
        ws_types::CONNECTION_STATUS => match decode::<WsConnectionStatusPayload>(envelope) {
            Some(p) => {
                state.on_connection_status(p.connected);
                Dispatch::ConnectionStatus(p.connected)
            }
            None => Dispatch::Ignored,
        },
        ws_types::RECEIVE_MESSAGE => match decode::<RelayMessage>(envelope) {
            Some(m) if state.on_message(&m) => Dispatch::Message(m),
            _ => Dispatch::Ignored,
        },
        ws_types::PUBLISH_PROGRESS => match decode::<WsPublishProgressPayload>(envelope) {
            Some(p) => {
                state.on_publish_progress(&p);
                Dispatch::PublishProgress(p)
            }
            None => Dispatch::Ignored,
        },
        ws_types::PUBLISH_RESULT => match decode::<WsPublishResultPayload>(envelope) {
            Some(r) => {
                state.on_publish_result(&r);
                Dispatch::PublishResult(r)
            }
            None => Dispatch::Ignored,
        },
        ws_types::PING => Dispatch::Ping,
        _ => Dispatch::Ignored,
    }
}

fn pong() -> Message {
    let env = WsEnvelope::new(ws_types::PONG, serde_json::json!({}));
    Message::Text(serde_json::to_string(&env).unwrap_or_default())
}

/// Stay attached to the relayer, reconnecting every 5s. Each applied envelope is
/// forwarded to `events`; returns once the receiver is gone.
pub async fn run_ws_client(
    ws_url: &str,
    state: Arc<ViewerState>,
    events: mpsc::Sender<Dispatch>,
) -> Result<()> {
    loop {
        match connect_async(ws_url).await {
            Ok((ws, _)) => {
                tracing::info!("Connected to relayer");
                if let Err(e) = handle_connection(ws, &state, &events).await {
                    tracing::warn!("Connection error: {}", e);
                }
                if events.is_closed() {
                    return Ok(());
                }
                tracing::warn!("Relayer connection closed, retrying in 5s");
            }
            Err(e) => {
                tracing::warn!("Connect failed: {}, retrying in 5s", e);
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn handle_connection(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    state: &ViewerState,
    events: &mpsc::Sender<Dispatch>,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = ws.split();

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Err(e) => return Err(e.into()),
            _ => continue,
        };
        let envelope: WsEnvelope = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(_) => continue,
        };
        let event = dispatch(state, envelope);
        if matches!(event, Dispatch::Ping) {
            ws_tx.send(pong()).await?;
        }
        if events.send(event).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Attach, start a publish job addressed to this viewer, and follow it to its
/// summary. `on_progress` sees every item outcome as it arrives.
pub async fn publish_and_follow<F>(
    ws_url: &str,
    api: &RelayerApi,
    state: &ViewerState,
    topic: &str,
    payload: &str,
    mut on_progress: F,
) -> Result<WsPublishResultPayload>
where
    F: FnMut(&WsPublishProgressPayload),
{
    let (ws, _) = connect_async(ws_url).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut job_id: Option<Uuid> = None;
    while let Some(msg) = ws_rx.next().await {
        let text = match msg? {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(envelope) = serde_json::from_str::<WsEnvelope>(&text) else {
            continue;
        };
        match dispatch(state, envelope) {
            Dispatch::Hello(hello) if job_id.is_none() => {
                let accepted = api.publish(topic, payload, Some(hello.session_id)).await?;
                tracing::info!(job_id = %accepted.job_id, items = accepted.items, "publish accepted");
                job_id = Some(accepted.job_id);
            }
            Dispatch::PublishProgress(p) if Some(p.job_id) == job_id => on_progress(&p),
            Dispatch::PublishResult(r) if Some(r.job_id) == job_id => return Ok(r),
            Dispatch::Ping => ws_tx.send(pong()).await?,
            _ => {}
        }
    }
    anyhow::bail!("relayer closed the stream before the publish job finished")
}
