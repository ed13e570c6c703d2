//! MQTT broker session.
//!
//! `BrokerManager` owns the single broker session and the topic set subscribed on
//! it. The rumqttc event loop runs on its own task per session; every inbound
//! publish is handled independently by [`InboundHandler`] and relayed to viewers.
//!
//! State machine: `Disconnected → Connecting → Connected → Disconnecting →
//! Disconnected`; any failure returns to `Disconnected`. Each connected session is
//! tagged with a generation so a dying event loop from an older session can never
//! report on the current one.
//!
//! Subscribe, unsubscribe and publish complete only once the broker acknowledged
//! them (SUBACK, UNSUBACK, PUBACK); see [`acks`].

mod acks;
mod error;
mod inbound;
#[cfg(test)]
pub(crate) mod testing;

pub use error::BrokerError;
pub use inbound::{Dropped, InboundHandler};

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use shared::{BrokerConnection, BrokerStatusResponse, ConnectionState};
use tokio::task::JoinHandle;

use self::acks::{AckKind, AckTracker};
use crate::config::Config;
use crate::publish::BrokerPublisher;
use crate::relay::{BroadcastMessage, RelayState};

/// How long a closing session may take to flush its DISCONNECT before the task is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Transport tuning for broker sessions.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub channel_capacity: usize,
    /// How long to wait for SUBACK, UNSUBACK or PUBACK.
    pub ack_timeout: Duration,
}

impl BrokerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keep_alive: config.mqtt_keep_alive(),
            connect_timeout: config.mqtt_connect_timeout(),
            channel_capacity: config.mqtt_channel_capacity,
            ack_timeout: config.mqtt_connect_timeout(),
        }
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 100,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

struct Session {
    client: AsyncClient,
    acks: Arc<AckTracker>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SessionState {
    state: ConnectionState,
    generation: u64,
    client_id: Option<String>,
}

/// Everything the event loop task needs; cheap to clone.
#[derive(Clone)]
struct SessionContext {
    relay: Arc<RelayState>,
    inbound: InboundHandler,
    shared: Arc<Mutex<SessionState>>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionContext {
    fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }

    fn set_state(&self, state: ConnectionState) {
        lock(&self.shared).state = state;
    }

    /// Mark a freshly handshaken session as current; returns its generation.
    fn begin(&self, client_id: &str) -> u64 {
        let mut s = lock(&self.shared);
        s.generation += 1;
        s.state = ConnectionState::Connected;
        s.client_id = Some(client_id.to_string());
        s.generation
    }

    /// Detach the current generation ahead of a planned close. Returns whether it was live.
    fn retire(&self) -> bool {
        let mut s = lock(&self.shared);
        let was_connected = s.state == ConnectionState::Connected;
        s.generation += 1;
        s.state = ConnectionState::Disconnecting;
        was_connected
    }

    fn clear_subscriptions(&self) {
        lock(&self.subscriptions).clear();
    }

    /// Unplanned loss of the transport for `generation`.
    fn transport_lost(&self, generation: u64, reason: &str) {
        {
            let mut s = lock(&self.shared);
            if s.generation != generation || s.state != ConnectionState::Connected {
                return;
            }
            s.state = ConnectionState::Disconnected;
        }
        self.clear_subscriptions();
        tracing::warn!(reason = %reason, "broker connection lost, subscriptions cleared");
        self.relay.broadcast(BroadcastMessage::ConnectionStatus(false));
    }
}

/// Owner of the broker session.
pub struct BrokerManager {
    options: BrokerOptions,
    session: tokio::sync::Mutex<Option<Session>>,
    ctx: SessionContext,
}

impl BrokerManager {
    pub fn new(relay: Arc<RelayState>, options: BrokerOptions) -> Self {
        Self {
            options,
            session: tokio::sync::Mutex::new(None),
            ctx: SessionContext {
                inbound: InboundHandler::new(relay.clone()),
                relay,
                shared: Arc::new(Mutex::new(SessionState::default())),
                subscriptions: Arc::new(Mutex::new(HashSet::new())),
            },
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Client id of the current (or last) session.
    pub fn client_id(&self) -> Option<String> {
        lock(&self.ctx.shared).client_id.clone()
    }

    /// Subscribed topics, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.ctx.subscriptions).iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn status(&self) -> BrokerStatusResponse {
        let state = self.state();
        BrokerStatusResponse {
            state,
            connected: state == ConnectionState::Connected,
            client_id: self.client_id(),
            subscriptions: self.subscriptions(),
        }
    }

    /// Open a session. An open session is closed first, so a reconnect never
    /// overlaps two sessions.
    pub async fn connect(&self, connection: &BrokerConnection) -> Result<(), BrokerError> {
        let port = connection.validate().map_err(BrokerError::InvalidConfig)?;
        let host = connection.host.trim();
        let client_id = connection.client_id.trim();

        let mut session = self.session.lock().await;
        if let Some(live) = session.take() {
            tracing::info!("reconnect requested, closing current broker session");
            self.close(live).await;
        }
        self.ctx.set_state(ConnectionState::Connecting);

        let mut options = MqttOptions::new(client_id, host, port);
        options
            .set_keep_alive(self.options.keep_alive)
            .set_clean_session(true);
        if !connection.username.is_empty() {
            options.set_credentials(connection.username.clone(), connection.password.clone());
        }
        let (client, mut eventloop) = AsyncClient::new(options, self.options.channel_capacity);

        let handshake =
            tokio::time::timeout(self.options.connect_timeout, await_connack(&mut eventloop)).await;
        let failure = match handshake {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(BrokerError::ConnectFailed(e.to_string())),
            Err(_) => Some(BrokerError::ConnectTimeout(
                self.options.connect_timeout.as_secs(),
            )),
        };
        if let Some(err) = failure {
            self.ctx.set_state(ConnectionState::Disconnected);
            tracing::warn!(host = %host, port, error = %err, "broker connect failed");
            return Err(err);
        }

        let generation = self.ctx.begin(client_id);
        self.ctx
            .relay
            .broadcast(BroadcastMessage::ConnectionStatus(true));
        tracing::info!(host = %host, port, client_id = %client_id, "connected to broker");

        let acks = Arc::new(AckTracker::default());
        let task = tokio::spawn(run_event_loop(
            eventloop,
            self.ctx.clone(),
            generation,
            acks.clone(),
        ));
        *session = Some(Session { client, acks, task });
        Ok(())
    }

    /// Close the session if one is open. Subscriptions are dropped with it.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(live) => self.close(live).await,
            None => tracing::debug!("disconnect requested with no open session"),
        }
    }

    async fn close(&self, live: Session) {
        let was_connected = self.ctx.retire();
        if let Err(e) = live.client.disconnect().await {
            tracing::debug!(error = %e, "event loop already stopped");
        }
        let mut task = live.task;
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        live.acks.fail_all("broker session closed");
        self.ctx.set_state(ConnectionState::Disconnected);
        self.ctx.clear_subscriptions();
        if was_connected {
            tracing::info!("disconnected from broker");
            self.ctx
                .relay
                .broadcast(BroadcastMessage::ConnectionStatus(false));
        }
    }

    async fn handle(&self) -> Result<(AsyncClient, Arc<AckTracker>), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| (s.client.clone(), s.acks.clone()))
            .ok_or(BrokerError::NotConnected)
    }

    /// Subscribe with at-least-once QoS and wait for the SUBACK. The topic is
    /// tracked only once the broker granted it. Already-subscribed topics
    /// succeed without a request.
    pub async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        let failed = |reason: String| BrokerError::Subscription {
            topic: topic.to_string(),
            reason,
        };
        if topic.is_empty() {
            return Err(failed("topic must not be empty".to_string()));
        }
        if lock(&self.ctx.subscriptions).contains(topic) {
            return Ok(());
        }
        let (client, acks) = self.handle().await?;
        let ack = acks
            .register(AckKind::Subscribe, || {
                client.try_subscribe(topic, QoS::AtLeastOnce)
            })
            .map_err(|e| failed(e.to_string()))?;
        acks::wait(ack, self.options.ack_timeout)
            .await
            .map_err(|e| failed(e.to_string()))?;
        lock(&self.ctx.subscriptions).insert(topic.to_string());
        tracing::info!(topic = %topic, "subscribed");
        Ok(())
    }

    /// Unsubscribe and wait for the UNSUBACK. Topics not currently subscribed
    /// succeed without a request.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        if !lock(&self.ctx.subscriptions).contains(topic) {
            return Ok(());
        }
        let failed = |reason: String| BrokerError::Subscription {
            topic: topic.to_string(),
            reason,
        };
        let (client, acks) = self.handle().await?;
        let ack = acks
            .register(AckKind::Unsubscribe, || client.try_unsubscribe(topic))
            .map_err(|e| failed(e.to_string()))?;
        acks::wait(ack, self.options.ack_timeout)
            .await
            .map_err(|e| failed(e.to_string()))?;
        lock(&self.ctx.subscriptions).remove(topic);
        tracing::info!(topic = %topic, "unsubscribed");
        Ok(())
    }

    /// Publish one payload with at-least-once QoS and wait for the PUBACK.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let failed = |reason: String| BrokerError::Publish {
            topic: topic.to_string(),
            reason,
        };
        let (client, acks) = self.handle().await?;
        let ack = acks
            .register(AckKind::Publish, || {
                client.try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            })
            .map_err(|e| failed(e.to_string()))?;
        acks::wait(ack, self.options.ack_timeout)
            .await
            .map_err(|e| failed(e.to_string()))
    }
}

impl BrokerPublisher for BrokerManager {
    async fn deliver(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.publish(topic, payload).await
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    ctx: SessionContext,
    generation: u64,
    acks: Arc<AckTracker>,
) {
    drive(&mut eventloop, &ctx, generation, &acks).await;
    acks.fail_all("broker session ended");
}

async fn drive(eventloop: &mut EventLoop, ctx: &SessionContext, generation: u64, acks: &AckTracker) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let handled = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    ctx.inbound.handle(&publish.topic, &publish.payload)
                }));
                if handled.is_err() {
                    tracing::error!(topic = %publish.topic, "inbound handler panicked, message dropped");
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => acks.sent(AckKind::Subscribe, pkid),
            Ok(Event::Outgoing(Outgoing::Unsubscribe(pkid))) => {
                acks.sent(AckKind::Unsubscribe, pkid)
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => acks.sent(AckKind::Publish, pkid),
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let granted = ack
                    .return_codes
                    .iter()
                    .all(|c| matches!(c, SubscribeReasonCode::Success(_)));
                let verdict = if granted {
                    Ok(())
                } else {
                    tracing::warn!(pkid = ack.pkid, "broker rejected a subscription");
                    Err("broker rejected the subscription".to_string())
                };
                acks.acked(AckKind::Subscribe, ack.pkid, verdict);
            }
            Ok(Event::Incoming(Packet::UnsubAck(ack))) => {
                acks.acked(AckKind::Unsubscribe, ack.pkid, Ok(()))
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => acks.acked(AckKind::Publish, ack.pkid, Ok(())),
            Ok(Event::Incoming(Packet::Disconnect)) => {
                ctx.transport_lost(generation, "broker closed the session");
                return;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => return,
            Ok(_) => {}
            Err(e) => {
                ctx.transport_lost(generation, &e.to_string());
                return;
            }
        }
    }
}
