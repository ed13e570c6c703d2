//! Latest-message snapshot writer.
//!
//! Consumes the relay like any viewer would and keeps the newest message per topic
//! in the database, keyed by the broker client id, so a viewer attaching late can
//! fetch current state over HTTP. When the broker link drops, the stored
//! subscription set is brought in line with the (now cleared) live one.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::broker::BrokerManager;
use crate::db::{self, Db};
use crate::relay::{BroadcastMessage, RelayState};

pub fn spawn(relay: &RelayState, broker: Arc<BrokerManager>, db: Arc<Db>) -> JoinHandle<()> {
    let mut rx = relay.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BroadcastMessage::ReceiveMessage(message)) => {
                    let Some(client_id) = broker.client_id() else {
                        continue;
                    };
                    if let Err(e) = db::upsert_latest_message(&db.conn(), &client_id, &message) {
                        tracing::warn!(topic = %message.topic, error = %e, "snapshot write failed");
                    }
                }
                Ok(BroadcastMessage::ConnectionStatus(false)) => {
                    let Some(client_id) = broker.client_id() else {
                        continue;
                    };
                    let topics = broker.subscriptions();
                    if let Err(e) = db::save_subscriptions(&db.conn(), &client_id, &topics) {
                        tracing::warn!(client_id = %client_id, error = %e, "failed to store subscriptions");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "snapshot writer lagged behind relay");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerOptions;
    use shared::RelayMessage;
    use std::time::Duration;

    #[tokio::test]
    async fn without_a_session_nothing_is_written() {
        let relay = Arc::new(RelayState::new());
        let broker = Arc::new(BrokerManager::new(relay.clone(), BrokerOptions::default()));
        let db = Arc::new(Db::open_in_memory().unwrap());
        let handle = spawn(&relay, broker, db.clone());

        relay.broadcast(BroadcastMessage::ReceiveMessage(RelayMessage::new("state", "{}")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rows: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM latest_messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
        handle.abort();
    }

    #[tokio::test]
    async fn lost_connection_clears_stored_subscriptions() {
        use crate::broker::testing::fake_broker;
        use shared::BrokerConnection;

        let (port, kill) = fake_broker().await;
        let relay = Arc::new(RelayState::new());
        let broker = Arc::new(BrokerManager::new(relay.clone(), BrokerOptions::default()));
        let db = Arc::new(Db::open_in_memory().unwrap());
        let handle = spawn(&relay, broker.clone(), db.clone());

        broker
            .connect(&BrokerConnection {
                host: "127.0.0.1".to_string(),
                port: i32::from(port),
                client_id: "relay-snap".to_string(),
                username: String::new(),
                password: String::new(),
            })
            .await
            .unwrap();
        broker.subscribe("state").await.unwrap();
        db::save_subscriptions(&db.conn(), "relay-snap", &broker.subscriptions()).unwrap();

        kill.notify_waiters();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = db::load_subscriptions(&db.conn(), "relay-snap").unwrap();
                if stored.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("stored subscriptions were not cleared");
        handle.abort();
    }
}
