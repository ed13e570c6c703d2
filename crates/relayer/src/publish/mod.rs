//! Publish pipeline.
//!
//! A job splits the operator payload into items (one per element of a top-level
//! JSON array, otherwise the whole payload), then delivers them one at a time in
//! submission order. Each item gets a bounded number of attempts with linear
//! backoff; an exhausted item is recorded as failed and the job moves on.
//! Progress and the final summary go out through the relay.

mod retry;

pub use retry::{linear_backoff, retry};

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use shared::{
    PublishAccepted, PublishOutcome, PublishSeverity, WsPublishProgressPayload,
    WsPublishResultPayload,
};
use uuid::Uuid;

use crate::broker::BrokerError;
use crate::config::Config;
use crate::db::{self, Db};
use crate::relay::{BroadcastMessage, RelayState};

/// Newest outcomes kept per job.
pub const OUTCOME_HISTORY: usize = 50;

/// Anything that can put one payload on a broker topic.
pub trait BrokerPublisher: Send + Sync + 'static {
    fn deliver(
        &self,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Split a raw payload into publish items. A JSON array yields one item per
/// element; any other JSON value is published as-is.
pub fn split_payload(raw: &str) -> Result<Vec<String>, PublishError> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(match value {
        Value::Array(items) => items.iter().map(Value::to_string).collect(),
        _ => vec![raw.to_string()],
    })
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.publish_max_attempts,
            backoff: config.publish_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// One publish job. Lives from `prepare` until its summary is emitted.
#[derive(Debug)]
pub struct PublishJob {
    pub id: Uuid,
    pub topic: String,
    pub viewer_id: Option<Uuid>,
    items: Vec<String>,
    total: usize,
    completed: usize,
    succeeded: usize,
    outcomes: VecDeque<PublishOutcome>,
}

impl PublishJob {
    fn new(topic: &str, items: Vec<String>, viewer_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            viewer_id,
            total: items.len(),
            items,
            completed: 0,
            succeeded: 0,
            outcomes: VecDeque::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// `completed / total`; an empty job counts as done.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Recorded outcomes, oldest first (at most [`OUTCOME_HISTORY`]).
    pub fn outcomes(&self) -> impl Iterator<Item = &PublishOutcome> {
        self.outcomes.iter()
    }

    pub fn failed(&self) -> usize {
        self.completed - self.succeeded
    }

    pub fn severity(&self) -> PublishSeverity {
        if self.failed() == 0 {
            PublishSeverity::Success
        } else {
            PublishSeverity::PartialFailure
        }
    }

    fn record(&mut self, outcome: PublishOutcome) {
        self.completed += 1;
        if outcome.success {
            self.succeeded += 1;
        }
        self.outcomes.push_back(outcome);
        while self.outcomes.len() > OUTCOME_HISTORY {
            self.outcomes.pop_front();
        }
    }

    fn summary(&self) -> WsPublishResultPayload {
        WsPublishResultPayload {
            job_id: self.id,
            viewer_id: self.viewer_id,
            topic: self.topic.clone(),
            succeeded: self.succeeded,
            failed: self.failed(),
            total: self.total,
            severity: self.severity(),
        }
    }
}

pub struct PublishPipeline<P> {
    broker: Arc<P>,
    relay: Arc<RelayState>,
    db: Option<Arc<Db>>,
    policy: RetryPolicy,
}

impl<P: BrokerPublisher> PublishPipeline<P> {
    pub fn new(broker: Arc<P>, relay: Arc<RelayState>, policy: RetryPolicy) -> Self {
        Self {
            broker,
            relay,
            db: None,
            policy,
        }
    }

    /// Record every item outcome in the publish history.
    pub fn with_db(mut self, db: Arc<Db>) -> Self {
        self.db = Some(db);
        self
    }

    /// Validate and split. Nothing is sent when this fails.
    pub fn prepare(
        &self,
        topic: &str,
        raw: &str,
        viewer_id: Option<Uuid>,
    ) -> Result<PublishJob, PublishError> {
        if topic.trim().is_empty() {
            return Err(PublishError::InvalidInput(
                "topic must not be empty".to_string(),
            ));
        }
        if raw.trim().is_empty() {
            return Err(PublishError::InvalidInput(
                "payload must not be empty".to_string(),
            ));
        }
        let items = split_payload(raw)?;
        Ok(PublishJob::new(topic, items, viewer_id))
    }

    /// Prepare a job and run it in the background.
    pub fn start(
        self: &Arc<Self>,
        topic: &str,
        raw: &str,
        viewer_id: Option<Uuid>,
    ) -> Result<PublishAccepted, PublishError> {
        let job = self.prepare(topic, raw, viewer_id)?;
        let accepted = PublishAccepted {
            job_id: job.id,
            items: job.total(),
        };
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run(job).await;
        });
        Ok(accepted)
    }

    /// Deliver every item in order, emitting progress after each one and a
    /// summary at the end.
    pub async fn run(&self, mut job: PublishJob) -> PublishJob {
        tracing::info!(job_id = %job.id, topic = %job.topic, items = job.total, "publish job started");
        let topic = job.topic.clone();
        let items = std::mem::take(&mut job.items);
        let max_attempts = self.policy.max_attempts.max(1);

        for (index, item) in items.iter().enumerate() {
            let position = index + 1;
            let delivered = retry(max_attempts, linear_backoff(self.policy.backoff), |_| {
                self.broker.deliver(&topic, item)
            })
            .await;

            let outcome = match delivered {
                Ok(()) => PublishOutcome {
                    position,
                    success: true,
                    message: "published".to_string(),
                },
                Err(e) => {
                    tracing::warn!(job_id = %job.id, topic = %topic, position, error = %e, "publish item failed");
                    PublishOutcome {
                        position,
                        success: false,
                        message: format!("failed after {} attempts: {}", max_attempts, e),
                    }
                }
            };
            self.persist(job.id, &topic, &outcome);
            job.record(outcome.clone());

            self.relay
                .broadcast(BroadcastMessage::PublishProgress(WsPublishProgressPayload {
                    job_id: job.id,
                    viewer_id: job.viewer_id,
                    topic: topic.clone(),
                    outcome,
                    completed: job.completed,
                    total: job.total,
                    progress: job.progress(),
                }));
        }
        job.items = items;

        let summary = job.summary();
        tracing::info!(
            job_id = %job.id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "publish job finished"
        );
        self.relay.broadcast(BroadcastMessage::PublishResult(summary));
        job
    }

    fn persist(&self, job_id: Uuid, topic: &str, outcome: &PublishOutcome) {
        let Some(db) = &self.db else { return };
        if let Err(e) = db::append_publish_result(&db.conn(), job_id, topic, outcome) {
            tracing::warn!(job_id = %job_id, error = %e, "failed to record publish result");
        }
    }
}
