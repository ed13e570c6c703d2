//! Viewer-side state: latest message per topic, subscription mirror, publish view.
//!
//! Entries untouched for the eviction window are swept before every read, so no
//! caller ever observes one. Change notifications go through a leading-edge
//! [`DebounceGate`] and are published as a counter on a `watch` channel.

mod debounce;
mod store;

pub use debounce::DebounceGate;
pub use store::{FileStore, StoreError, SubscriptionStore};

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use shared::{
    Projection, PublishOutcome, RelayMessage, WsPublishProgressPayload, WsPublishResultPayload,
};
use tokio::sync::watch;
use uuid::Uuid;

pub const EVICTION_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);
pub const PUBLISH_HISTORY: usize = 50;

/// Latest payload for one topic.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Projection,
    pub last_updated: Instant,
}

/// Progress of the publish job this viewer is following.
#[derive(Debug, Clone, Default)]
pub struct PublishView {
    pub job_id: Option<Uuid>,
    pub progress: f64,
    pub outcomes: VecDeque<PublishOutcome>,
    pub result: Option<WsPublishResultPayload>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    subscribed: BTreeSet<String>,
    /// Topics explicitly unsubscribed; their messages are ignored until re-subscribed.
    unsubscribed: HashSet<String>,
    connected: bool,
    session_id: Option<Uuid>,
    publish: PublishView,
}

pub struct ViewerState {
    inner: Mutex<Inner>,
    ttl: Duration,
    gate: DebounceGate,
    changes: watch::Sender<u64>,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewerState {
    pub fn new() -> Self {
        Self::with_windows(EVICTION_WINDOW, DEBOUNCE_WINDOW)
    }

    pub fn with_windows(ttl: Duration, debounce: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            ttl,
            gate: DebounceGate::new(debounce),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counter bumped on every notification that passes the debounce gate.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify_at(&self, now: Instant) {
        if self.gate.try_fire_at(now) {
            self.changes.send_modify(|n| *n += 1);
        }
    }

    pub fn on_message(&self, message: &RelayMessage) -> bool {
        self.on_message_at(message, Instant::now())
    }

    /// Upsert `topic → (payload, now)`. Returns false when the topic was
    /// unsubscribed and the message is ignored.
    pub fn on_message_at(&self, message: &RelayMessage, now: Instant) -> bool {
        let payload = Projection::decode(&message.topic, &message.payload).unwrap_or_else(|e| {
            tracing::debug!(topic = %message.topic, error = %e, "keeping undecodable payload raw");
            Projection::Raw(message.payload.clone())
        });
        {
            let mut inner = self.lock();
            if inner.unsubscribed.contains(&message.topic) {
                return false;
            }
            inner.entries.insert(
                message.topic.clone(),
                CacheEntry {
                    payload,
                    last_updated: now,
                },
            );
        }
        self.notify_at(now);
        true
    }

    /// Drop entries untouched for the eviction window. Returns how many went.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| now.saturating_duration_since(e.last_updated) < ttl);
        before - inner.entries.len()
    }

    pub fn latest_messages(&self) -> Vec<(String, CacheEntry)> {
        self.latest_messages_at(Instant::now())
    }

    /// Live entries sorted by topic. Expired entries are swept first.
    pub fn latest_messages_at(&self, now: Instant) -> Vec<(String, CacheEntry)> {
        let swept = self.sweep_expired_at(now);
        if swept > 0 {
            tracing::debug!(swept, "evicted stale topics");
        }
        let inner = self.lock();
        let mut out: Vec<(String, CacheEntry)> = inner
            .entries
            .iter()
            .map(|(t, e)| (t.clone(), e.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn on_hello(&self, session_id: Uuid, connected: bool) {
        {
            let mut inner = self.lock();
            inner.session_id = Some(session_id);
        }
        self.on_connection_status(connected);
    }

    /// Disconnect clears the subscription mirror; cached entries stay until they expire.
    pub fn on_connection_status(&self, connected: bool) {
        {
            let mut inner = self.lock();
            inner.connected = connected;
            if !connected {
                inner.subscribed.clear();
            }
        }
        self.notify_at(Instant::now());
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.lock().session_id
    }

    pub fn mark_subscribed(&self, topic: &str) {
        {
            let mut inner = self.lock();
            inner.unsubscribed.remove(topic);
            inner.subscribed.insert(topic.to_string());
        }
        self.notify_at(Instant::now());
    }

    /// Remove from the mirror and evict the cached entry immediately.
    pub fn mark_unsubscribed(&self, topic: &str) {
        {
            let mut inner = self.lock();
            inner.subscribed.remove(topic);
            inner.unsubscribed.insert(topic.to_string());
            inner.entries.remove(topic);
        }
        self.notify_at(Instant::now());
    }

    /// Forget the mirror without tombstoning anything.
    pub fn clear_subscriptions(&self) {
        self.lock().subscribed.clear();
        self.notify_at(Instant::now());
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.lock().subscribed.contains(topic)
    }

    /// Subscribed topics, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscribed.iter().cloned().collect()
    }

    pub fn on_publish_progress(&self, p: &WsPublishProgressPayload) {
        {
            let mut inner = self.lock();
            let view = &mut inner.publish;
            if view.job_id != Some(p.job_id) {
                *view = PublishView {
                    job_id: Some(p.job_id),
                    ..PublishView::default()
                };
            }
            view.progress = p.progress;
            view.outcomes.push_back(p.outcome.clone());
            while view.outcomes.len() > PUBLISH_HISTORY {
                view.outcomes.pop_front();
            }
        }
        self.notify_at(Instant::now());
    }

    pub fn on_publish_result(&self, r: &WsPublishResultPayload) {
        {
            let mut inner = self.lock();
            let view = &mut inner.publish;
            if view.job_id != Some(r.job_id) {
                *view = PublishView {
                    job_id: Some(r.job_id),
                    ..PublishView::default()
                };
            }
            view.progress = 1.0;
            view.result = Some(r.clone());
        }
        self.notify_at(Instant::now());
    }

    pub fn publish_view(&self) -> PublishView {
        self.lock().publish.clone()
    }
}
