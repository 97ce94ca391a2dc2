//! Progressive Readiness state machine (spec.md §3 `ReadinessState`, §4.1,
//! §9).
//!
//! `SubscribeToReadiness` is a lazy single-shot fan-out: each subscriber gets
//! its own completion, firing immediately if the system is already Ready.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{ControllerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    NotStarted,
    Starting,
    Ready,
    Failed,
    Stopping,
    Stopped,
}

struct Inner {
    state: ReadinessState,
    tx: broadcast::Sender<()>,
}

pub struct ReadinessTracker {
    inner: Mutex<Inner>,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { inner: Mutex::new(Inner { state: ReadinessState::NotStarted, tx }) }
    }

    pub fn set_starting(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ReadinessState::NotStarted || inner.state == ReadinessState::Stopped {
            inner.state = ReadinessState::Starting;
        }
    }

    /// Transition into Ready and wake every current and future subscriber.
    /// Sticky: once Ready, state never regresses except via `set_stopping`.
    pub fn set_ready(&self) {
        let mut inner = self.inner.lock();
        if inner.state != ReadinessState::Ready {
            inner.state = ReadinessState::Ready;
            let _ = inner.tx.send(());
        }
    }

    pub fn set_failed(&self) {
        let mut inner = self.inner.lock();
        inner.state = ReadinessState::Failed;
    }

    pub fn set_stopping(&self) {
        let mut inner = self.inner.lock();
        inner.state = ReadinessState::Stopping;
    }

    pub fn set_stopped(&self) {
        let mut inner = self.inner.lock();
        inner.state = ReadinessState::Stopped;
        let (tx, _rx) = broadcast::channel(1);
        inner.tx = tx;
    }

    pub fn state(&self) -> ReadinessState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }

    /// Resolves once, either immediately (already Ready), on the next
    /// `set_ready()` call, or with `Cancelled` if `token` fires first
    /// (spec.md §5, "suspends the caller until the one-shot signal fires or
    /// its ctx is cancelled").
    pub async fn subscribe(&self, token: &CancellationToken) -> Result<()> {
        let mut rx = {
            let inner = self.inner.lock();
            if inner.state == ReadinessState::Ready {
                return Ok(());
            }
            inner.tx.subscribe()
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ControllerError::Cancelled),
            _ = rx.recv() => Ok(()),
        }
    }
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn subscribe_resolves_immediately_when_already_ready() {
        let tracker = ReadinessTracker::new();
        tracker.set_ready();
        let token = CancellationToken::new();
        tokio::time::timeout(std::time::Duration::from_millis(50), tracker.subscribe(&token))
            .await
            .expect("subscribe should resolve immediately")
            .unwrap();
    }

    #[tokio::test]
    async fn subscribe_fires_exactly_once_per_subscriber_after_ready_signal() {
        let tracker = Arc::new(ReadinessTracker::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let t = tracker.clone();
            handles.push(tokio::spawn(async move { t.subscribe(&CancellationToken::new()).await }));
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tracker.set_ready();
        for h in handles {
            tokio::time::timeout(std::time::Duration::from_millis(200), h).await.unwrap().unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn subscribe_returns_cancelled_when_token_fires_first() {
        let tracker = ReadinessTracker::new();
        let token = CancellationToken::new();
        token.cancel();
        let result = tracker.subscribe(&token).await;
        assert!(matches!(result, Err(crate::error::ControllerError::Cancelled)));
    }

    #[test]
    fn is_ready_reflects_state() {
        let tracker = ReadinessTracker::new();
        assert!(!tracker.is_ready());
        tracker.set_starting();
        assert!(!tracker.is_ready());
        tracker.set_ready();
        assert!(tracker.is_ready());
    }
}
