//! Subscription management for one viewer: broker requests, local mirror, persistence.

use std::future::Future;
use std::sync::Arc;

use shared::PREDEFINED_TOPICS;

use crate::state::{SubscriptionStore, ViewerState};

/// Remote side of subscription changes (the relayer's broker session).
pub trait BrokerControl: Send + Sync {
    fn subscribe(&self, topic: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
    fn unsubscribe(&self, topic: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub struct ViewerSession<C, S> {
    control: C,
    store: S,
    state: Arc<ViewerState>,
    client_id: String,
}

impl<C: BrokerControl, S: SubscriptionStore> ViewerSession<C, S> {
    pub fn new(control: C, store: S, state: Arc<ViewerState>, client_id: impl Into<String>) -> Self {
        Self {
            control,
            store,
            state,
            client_id: client_id.into(),
        }
    }

    pub fn state(&self) -> &Arc<ViewerState> {
        &self.state
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Stored topics for this client, or empty when the store is unreadable.
    pub fn stored_topics(&self) -> Vec<String> {
        self.store
            .load_subscriptions(&self.client_id)
            .unwrap_or_else(|e| {
                tracing::warn!(client_id = %self.client_id, error = %e, "failed to load subscriptions");
                Vec::new()
            })
    }

    /// Fill the local mirror from the store without touching the broker.
    pub fn load_mirror(&self) {
        for topic in self.stored_topics() {
            self.state.mark_subscribed(&topic);
        }
    }

    fn persist(&self) {
        let topics = self.state.subscriptions();
        if let Err(e) = self.store.save_subscriptions(&self.client_id, &topics) {
            tracing::warn!(client_id = %self.client_id, error = %e, "failed to persist subscriptions");
        }
    }

    /// Subscribe or unsubscribe one topic. The mirror only changes once the
    /// broker side accepted the request; the result is then persisted.
    pub async fn toggle_subscribe(&self, topic: &str, subscribe: bool) -> anyhow::Result<()> {
        let topic = topic.trim();
        if topic.is_empty() {
            anyhow::bail!("topic must not be empty");
        }
        if subscribe {
            self.control.subscribe(topic).await?;
            self.state.mark_subscribed(topic);
        } else {
            self.control.unsubscribe(topic).await?;
            self.state.mark_unsubscribed(topic);
        }
        self.persist();
        Ok(())
    }

    /// Subscribe every predefined topic not yet subscribed. Returns the failures.
    pub async fn subscribe_all(&self) -> Vec<(String, anyhow::Error)> {
        let mut failed = Vec::new();
        for topic in PREDEFINED_TOPICS {
            if self.state.is_subscribed(topic) {
                continue;
            }
            if let Err(e) = self.toggle_subscribe(topic, true).await {
                failed.push((topic.to_string(), e));
            }
        }
        failed
    }

    /// Unsubscribe everything in the mirror. Returns the failures.
    pub async fn unsubscribe_all(&self) -> Vec<(String, anyhow::Error)> {
        let mut failed = Vec::new();
        for topic in self.state.subscriptions() {
            if let Err(e) = self.toggle_subscribe(&topic, false).await {
                failed.push((topic, e));
            }
        }
        failed
    }

    /// Re-issue subscriptions for every stored topic, e.g. after a reconnect.
    /// Returns how many were re-established.
    pub async fn restore(&self) -> usize {
        let mut restored = 0;
        for topic in self.stored_topics() {
            match self.control.subscribe(&topic).await {
                Ok(()) => {
                    self.state.mark_subscribed(&topic);
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "failed to restore subscription");
                }
            }
        }
        restored
    }

    /// Forget every subscription locally and in the store.
    pub fn forget_subscriptions(&self) {
        self.state.clear_subscriptions();
        self.persist();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StoreError;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct MockControl {
        reject: HashSet<String>,
        calls: Mutex<Vec<(bool, String)>>,
    }

    impl MockControl {
        fn outcome(&self, subscribe: bool, topic: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((subscribe, topic.to_string()));
            if self.reject.contains(topic) {
                anyhow::bail!("broker rejected {}", topic)
            }
            Ok(())
        }
    }

    impl BrokerControl for MockControl {
        async fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
            self.outcome(true, topic)
        }

        async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
            self.outcome(false, topic)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        sets: Mutex<HashMap<String, BTreeSet<String>>>,
    }

    impl SubscriptionStore for MemoryStore {
        fn save_subscriptions(&self, client_id: &str, topics: &[String]) -> Result<(), StoreError> {
            self.sets
                .lock()
                .unwrap()
                .insert(client_id.to_string(), topics.iter().cloned().collect());
            Ok(())
        }

        fn load_subscriptions(&self, client_id: &str) -> Result<Vec<String>, StoreError> {
            Ok(self
                .sets
                .lock()
                .unwrap()
                .get(client_id)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default())
        }
    }

    fn session(reject: &[&str]) -> ViewerSession<MockControl, MemoryStore> {
        let control = MockControl {
            reject: reject.iter().map(|s| s.to_string()).collect(),
            ..MockControl::default()
        };
        ViewerSession::new(
            control,
            MemoryStore::default(),
            Arc::new(ViewerState::new()),
            "viewer",
        )
    }

    #[tokio::test]
    async fn toggle_updates_mirror_and_store() {
        let s = session(&[]);
        s.toggle_subscribe("state", true).await.unwrap();
        s.toggle_subscribe("order", true).await.unwrap();
        assert_eq!(s.state().subscriptions(), vec!["order", "state"]);
        assert_eq!(s.stored_topics(), vec!["order", "state"]);

        s.toggle_subscribe("order", false).await.unwrap();
        assert_eq!(s.stored_topics(), vec!["state"]);
    }

    #[tokio::test]
    async fn unsubscribe_evicts_cached_entry() {
        let s = session(&[]);
        s.toggle_subscribe("state", true).await.unwrap();
        let now = Instant::now();
        s.state()
            .on_message_at(&shared::RelayMessage::new("state", "{}"), now);
        s.toggle_subscribe("state", false).await.unwrap();
        assert!(s.state().latest_messages_at(now).is_empty());
    }

    #[tokio::test]
    async fn rejected_request_leaves_state_unchanged() {
        let s = session(&["order"]);
        assert!(s.toggle_subscribe("order", true).await.is_err());
        assert!(s.state().subscriptions().is_empty());
        assert!(s.stored_topics().is_empty());
    }

    #[tokio::test]
    async fn subscribe_all_covers_predefined_topics_and_reports_failures() {
        let s = session(&["instantActions"]);
        s.toggle_subscribe("state", true).await.unwrap();
        let failed = s.subscribe_all().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "instantActions");
        assert_eq!(
            s.state().subscriptions(),
            vec!["order", "state", "visualization"]
        );
        // "state" was already subscribed and not requested again
        let state_calls = s
            .control()
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t)| t == "state")
            .count();
        assert_eq!(state_calls, 1);

        assert!(s.unsubscribe_all().await.is_empty());
        assert!(s.state().subscriptions().is_empty());
        assert!(s.stored_topics().is_empty());
    }

    #[tokio::test]
    async fn restore_resubscribes_stored_topics() {
        let s = session(&[]);
        s.toggle_subscribe("state", true).await.unwrap();
        s.toggle_subscribe("order", true).await.unwrap();

        s.state().on_connection_status(false);
        assert!(s.state().subscriptions().is_empty());

        assert_eq!(s.restore().await, 2);
        assert_eq!(s.state().subscriptions(), vec!["order", "state"]);
    }

    #[tokio::test]
    async fn forget_clears_mirror_and_store() {
        let s = session(&[]);
        s.toggle_subscribe("state", true).await.unwrap();
        s.forget_subscriptions();
        assert!(s.state().subscriptions().is_empty());
        assert!(s.stored_topics().is_empty());
        assert_eq!(s.restore().await, 0);
    }

    #[tokio::test]
    async fn empty_topic_is_rejected_locally() {
        let s = session(&[]);
        assert!(s.toggle_subscribe("  ", true).await.is_err());
        assert!(s.control().calls.lock().unwrap().is_empty());
    }
}
