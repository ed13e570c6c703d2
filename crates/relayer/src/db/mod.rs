//! Database access: stored broker connection, subscription sets, latest-message
//! snapshots and publish history.
//!
//! Every write here is a side effect of a core operation; callers log failures
//! and carry on.

mod migrations;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use shared::{iso8601_now, BrokerConnection, PublishOutcome, PublishResultEntry, RelayMessage};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub use migrations::run_migrations;

/// Database connection wrapper.
pub struct Db(pub Mutex<Connection>);

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self(Mutex::new(conn)))
    }

    /// Fresh, migrated in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self(Mutex::new(conn)))
    }

    pub fn run_migrations(&self) -> Result<()> {
        run_migrations(&self.conn())
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Store the broker connection, replacing any previous one.
pub fn save_connection(conn: &Connection, connection: &BrokerConnection) -> Result<()> {
    conn.execute(
        "INSERT INTO connections (id, host, port, client_id, username, password, updated_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            host = excluded.host,
            port = excluded.port,
            client_id = excluded.client_id,
            username = excluded.username,
            password = excluded.password,
            updated_at = excluded.updated_at",
        params![
            connection.host,
            connection.port,
            connection.client_id,
            connection.username,
            connection.password,
            iso8601_now(),
        ],
    )?;
    Ok(())
}

pub fn load_connection(conn: &Connection) -> Result<Option<BrokerConnection>> {
    conn.query_row(
        "SELECT host, port, client_id, username, password FROM connections WHERE id = 1",
        [],
        |row| {
            Ok(BrokerConnection {
                host: row.get(0)?,
                port: row.get(1)?,
                client_id: row.get(2)?,
                username: row.get(3)?,
                password: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Replace the stored subscription set for `client_id`.
pub fn save_subscriptions(conn: &Connection, client_id: &str, topics: &[String]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM subscribed_topics WHERE client_id = ?1",
        [client_id],
    )?;
    let now = iso8601_now();
    for topic in topics {
        tx.execute(
            "INSERT OR IGNORE INTO subscribed_topics (client_id, topic, created_at) VALUES (?1, ?2, ?3)",
            params![client_id, topic, now],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Stored topics for `client_id`, sorted.
pub fn load_subscriptions(conn: &Connection, client_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT topic FROM subscribed_topics WHERE client_id = ?1 ORDER BY topic",
    )?;
    let rows = stmt.query_map([client_id], |row| row.get(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Append one item outcome to the publish history. Returns the row id.
pub fn append_publish_result(
    conn: &Connection,
    job_id: Uuid,
    topic: &str,
    outcome: &PublishOutcome,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO publish_results (job_id, topic, position, success, message, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            job_id.to_string(),
            topic,
            outcome.position as i64,
            outcome.success,
            outcome.message,
            iso8601_now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Newest publish results first.
pub fn list_recent_publish_results(conn: &Connection, limit: usize) -> Result<Vec<PublishResultEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, job_id, topic, success, message, timestamp
         FROM publish_results ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        let job_id: String = row.get(1)?;
        Ok(PublishResultEntry {
            id: row.get(0)?,
            job_id: Uuid::parse_str(&job_id).unwrap_or_default(),
            topic: row.get(2)?,
            success: row.get(3)?,
            message: row.get(4)?,
            timestamp: row.get(5)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Keep only the newest message per (client, topic).
pub fn upsert_latest_message(conn: &Connection, client_id: &str, message: &RelayMessage) -> Result<()> {
    conn.execute(
        "INSERT INTO latest_messages (client_id, topic, payload, timestamp) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(client_id, topic) DO UPDATE SET
            payload = excluded.payload,
            timestamp = excluded.timestamp",
        params![client_id, message.topic, message.payload, message.timestamp],
    )?;
    Ok(())
}

pub fn list_latest_messages(conn: &Connection, client_id: &str) -> Result<Vec<RelayMessage>> {
    let mut stmt = conn.prepare(
        "SELECT topic, payload, timestamp FROM latest_messages WHERE client_id = ?1 ORDER BY topic",
    )?;
    let rows = stmt.query_map([client_id], |row| {
        Ok(RelayMessage {
            topic: row.get(0)?,
            payload: row.get(1)?,
            timestamp: row.get(2)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_db_with_migrations() -> Db {
        Db::open_in_memory().unwrap()
    }

    fn connection() -> BrokerConnection {
        BrokerConnection {
            host: "broker.local".to_string(),
            port: 1883,
            client_id: "relay".to_string(),
            username: "robotics".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = in_memory_db_with_migrations();
        db.run_migrations().unwrap();
        let applied: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM _schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn connection_round_trips_and_is_replaced() {
        let db = in_memory_db_with_migrations();
        let conn = db.conn();
        assert!(load_connection(&conn).unwrap().is_none());

        save_connection(&conn, &connection()).unwrap();
        assert_eq!(load_connection(&conn).unwrap(), Some(connection()));

        let other = BrokerConnection {
            host: "10.0.0.2".to_string(),
            port: 1886,
            ..connection()
        };
        save_connection(&conn, &other).unwrap();
        assert_eq!(load_connection(&conn).unwrap(), Some(other));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM connections", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn subscriptions_are_replaced_per_client() {
        let db = in_memory_db_with_migrations();
        let conn = db.conn();
        save_subscriptions(&conn, "a", &["state".to_string(), "order".to_string()]).unwrap();
        save_subscriptions(&conn, "b", &["visualization".to_string()]).unwrap();
        assert_eq!(load_subscriptions(&conn, "a").unwrap(), vec!["order", "state"]);

        save_subscriptions(&conn, "a", &["state".to_string()]).unwrap();
        assert_eq!(load_subscriptions(&conn, "a").unwrap(), vec!["state"]);
        assert_eq!(load_subscriptions(&conn, "b").unwrap(), vec!["visualization"]);

        save_subscriptions(&conn, "a", &[]).unwrap();
        assert!(load_subscriptions(&conn, "a").unwrap().is_empty());
    }

    #[test]
    fn publish_results_list_newest_first() {
        let db = in_memory_db_with_migrations();
        let conn = db.conn();
        let job = Uuid::new_v4();
        for position in 1..=3 {
            let outcome = PublishOutcome {
                position,
                success: position != 2,
                message: format!("item {}", position),
            };
            append_publish_result(&conn, job, "order", &outcome).unwrap();
        }

        let rows = list_recent_publish_results(&conn, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message, "item 3");
        assert_eq!(rows[1].message, "item 2");
        assert!(!rows[1].success);
        assert_eq!(rows[0].job_id, job);
    }

    #[test]
    fn latest_message_keeps_one_row_per_topic() {
        let db = in_memory_db_with_migrations();
        let conn = db.conn();
        upsert_latest_message(&conn, "relay", &RelayMessage::new("state", "{\"v\":1}")).unwrap();
        upsert_latest_message(&conn, "relay", &RelayMessage::new("state", "{\"v\":2}")).unwrap();
        upsert_latest_message(&conn, "relay", &RelayMessage::new("order", "{}")).unwrap();
        upsert_latest_message(&conn, "other", &RelayMessage::new("state", "x")).unwrap();

        let latest = list_latest_messages(&conn, "relay").unwrap();
        let topics: Vec<&str> = latest.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, vec!["order", "state"]);
        assert_eq!(latest[1].payload, "{\"v\":2}");
    }
}
