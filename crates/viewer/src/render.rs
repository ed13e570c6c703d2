//! Plain-text rendering for the terminal.

use std::time::Instant;

use shared::{
    PublishResultEntry, PublishSeverity, WsPublishProgressPayload, WsPublishResultPayload,
};

use crate::state::{CacheEntry, ViewerState};

/// Latest-message table: topic, age, one-line summary.
pub fn latest_table(entries: &[(String, CacheEntry)], now: Instant) -> String {
    if entries.is_empty() {
        return "(no messages)\n".to_string();
    }
    let width = entries.iter().map(|(t, _)| t.len()).max().unwrap_or(0).max(5);
    let mut out = format!("{:<width$}  {:>6}  {}\n", "TOPIC", "AGE", "SUMMARY", width = width);
    for (topic, entry) in entries {
        let age = now.saturating_duration_since(entry.last_updated).as_secs();
        out.push_str(&format!(
            "{:<width$}  {:>5}s  {}\n",
            topic,
            age,
            entry.payload.summary(),
            width = width
        ));
    }
    out
}

/// Full screen for `run`: connection line, subscriptions, table.
pub fn screen(state: &ViewerState, now: Instant) -> String {
    let link = if state.is_connected() {
        "connected"
    } else {
        "disconnected"
    };
    let subs = state.subscriptions();
    let subs = if subs.is_empty() {
        "-".to_string()
    } else {
        subs.join(", ")
    };
    format!(
        "broker: {}\nsubscribed: {}\n\n{}",
        link,
        subs,
        latest_table(&state.latest_messages_at(now), now)
    )
}

pub fn progress_line(p: &WsPublishProgressPayload) -> String {
    let mark = if p.outcome.success { "ok" } else { "FAILED" };
    format!(
        "[{}/{}] {:>3.0}% item {} {}: {}",
        p.completed,
        p.total,
        p.progress * 100.0,
        p.outcome.position,
        mark,
        p.outcome.message
    )
}

pub fn result_line(r: &WsPublishResultPayload) -> String {
    let severity = match r.severity {
        PublishSeverity::Success => "success",
        PublishSeverity::PartialFailure => "partial failure",
    };
    format!(
        "{}: {} of {} published to {} ({} failed)",
        severity, r.succeeded, r.total, r.topic, r.failed
    )
}

/// One stored publish outcome, timestamp shown in local time.
pub fn result_row(r: &PublishResultEntry) -> String {
    let when = chrono::DateTime::parse_from_rfc3339(&r.timestamp)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| r.timestamp.clone());
    let mark = if r.success { "ok" } else { "FAILED" };
    format!("{}  {}  {}  {}  {}", when, r.job_id, r.topic, mark, r.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{PublishOutcome, RelayMessage};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn table_lists_topics_with_age() {
        let state = ViewerState::new();
        let t0 = Instant::now();
        state.on_message_at(&RelayMessage::new("plant/boiler", "21.5"), t0);
        let out = latest_table(&state.latest_messages_at(t0), t0 + Duration::from_secs(7));
        assert!(out.starts_with("TOPIC"));
        assert!(out.contains("plant/boiler"));
        assert!(out.contains("7s"));
        assert!(out.contains("21.5"));
    }

    #[test]
    fn empty_table_says_so() {
        assert_eq!(latest_table(&[], Instant::now()), "(no messages)\n");
    }

    #[test]
    fn screen_shows_link_and_subscriptions() {
        let state = ViewerState::new();
        state.on_connection_status(true);
        state.mark_subscribed("state");
        let out = screen(&state, Instant::now());
        assert!(out.contains("broker: connected"));
        assert!(out.contains("subscribed: state"));
    }

    #[test]
    fn publish_lines() {
        let job_id = Uuid::new_v4();
        let p = WsPublishProgressPayload {
            job_id,
            viewer_id: None,
            topic: "order".to_string(),
            outcome: PublishOutcome {
                position: 2,
                success: false,
                message: "failed after 3 attempts: not connected to broker".to_string(),
            },
            completed: 2,
            total: 3,
            progress: 2.0 / 3.0,
        };
        let line = progress_line(&p);
        assert!(line.starts_with("[2/3]  67%"));
        assert!(line.contains("FAILED"));

        let r = WsPublishResultPayload {
            job_id,
            viewer_id: None,
            topic: "order".to_string(),
            succeeded: 2,
            failed: 1,
            total: 3,
            severity: PublishSeverity::PartialFailure,
        };
        assert_eq!(
            result_line(&r),
            "partial failure: 2 of 3 published to order (1 failed)"
        );
    }

    #[test]
    fn result_rows_use_local_time() {
        let mut entry = PublishResultEntry {
            id: 1,
            job_id: Uuid::nil(),
            topic: "order".to_string(),
            success: true,
            message: "published".to_string(),
            timestamp: "2024-05-01T12:00:00.000Z".to_string(),
        };
        let row = result_row(&entry);
        assert_eq!(row.split("  ").next().unwrap().len(), 19);
        assert!(row.ends_with("order  ok  published"));

        entry.timestamp = "yesterday".to_string();
        assert!(result_row(&entry).starts_with("yesterday  "));
    }
}
