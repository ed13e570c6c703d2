//! Broker acknowledgement tracking.
//!
//! rumqttc only tells the caller that a request was queued. The packet id is
//! learned later from the matching `Outgoing` event, and the verdict from the
//! SUBACK/UNSUBACK/PUBACK carrying that id. Requests of one kind leave the
//! client in the order they were queued, so waiters are kept in a FIFO until
//! their packet id is known.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::ClientError;
use thiserror::Error;
use tokio::sync::oneshot;

/// Request kinds that the broker acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum AckKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

/// Verdict delivered to a waiter: `Err` carries the reason.
type Verdict = Result<(), String>;

#[derive(Default)]
struct Inner {
    /// Queued on the client, packet id not yet assigned.
    queued: HashMap<AckKind, VecDeque<oneshot::Sender<Verdict>>>,
    /// Sent with a known packet id, waiting for the broker.
    in_flight: HashMap<(AckKind, u16), oneshot::Sender<Verdict>>,
}

/// Pending acknowledgements of one broker session.
#[derive(Default)]
pub(crate) struct AckTracker {
    inner: Mutex<Inner>,
}

/// Why an acknowledged request did not complete.
#[derive(Debug, PartialEq, Eq, Error)]
pub(crate) enum AckFailure {
    #[error("{0}")]
    Rejected(String),
    #[error("broker session closed before acknowledgement")]
    Closed,
    #[error("no acknowledgement within {}ms", .0.as_millis())]
    TimedOut(Duration),
}

impl AckTracker {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a request with `send` and register a waiter for its acknowledgement.
    /// `send` must not block; it runs under the tracker lock so queue order
    /// matches the order the event loop reports packet ids in.
    pub(crate) fn register(
        &self,
        kind: AckKind,
        send: impl FnOnce() -> Result<(), ClientError>,
    ) -> Result<oneshot::Receiver<Verdict>, ClientError> {
        let mut inner = self.lock();
        send()?;
        let (tx, rx) = oneshot::channel();
        inner.queued.entry(kind).or_default().push_back(tx);
        Ok(rx)
    }

    /// The event loop wrote the next request of `kind` with `pkid`.
    pub(crate) fn sent(&self, kind: AckKind, pkid: u16) {
        let mut inner = self.lock();
        let Some(tx) = inner.queued.get_mut(&kind).and_then(VecDeque::pop_front) else {
            tracing::debug!(?kind, pkid, "outgoing packet without a waiter");
            return;
        };
        inner.in_flight.insert((kind, pkid), tx);
    }

    /// The broker answered `pkid`.
    pub(crate) fn acked(&self, kind: AckKind, pkid: u16, verdict: Verdict) {
        if let Some(tx) = self.lock().in_flight.remove(&(kind, pkid)) {
            let _ = tx.send(verdict);
        }
    }

    /// Fail every outstanding waiter, e.g. when the session ends.
    pub(crate) fn fail_all(&self, reason: &str) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let queued = inner.queued.drain().flat_map(|(_, q)| q);
        let in_flight = inner.in_flight.drain().map(|(_, tx)| tx);
        for tx in queued.chain(in_flight).collect::<Vec<_>>() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        let inner = self.lock();
        inner.queued.values().map(VecDeque::len).sum::<usize>() + inner.in_flight.len()
    }
}

/// Wait for the verdict on one request.
pub(crate) async fn wait(
    rx: oneshot::Receiver<Verdict>,
    timeout: Duration,
) -> Result<(), AckFailure> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(reason))) => Err(AckFailure::Rejected(reason)),
        Ok(Err(_)) => Err(AckFailure::Closed),
        Err(_) => Err(AckFailure::TimedOut(timeout)),
    }
}
