//! ErrorRecoveryManager + built-in strategies (spec.md §4.8).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ControllerError, Result};
use crate::models::ErrorContext;
use crate::path_manager::{CreatePathOptions, PathManager};
use crate::recording_manager::RecordingManager;
use crate::stream_manager::StreamManager;

/// A pluggable recovery action for one failure class (spec.md §4.8).
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn can_recover(&self, err: &ControllerError) -> bool;
    async fn recover(&self, ctx: &ErrorContext, err: &ControllerError, token: &CancellationToken) -> Result<()>;
    fn recovery_delay(&self) -> Duration;
    fn strategy_name(&self) -> &'static str;
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

pub struct ErrorRecoveryManager {
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    in_flight: Mutex<HashSet<String>>,
    counters: Counters,
}

impl ErrorRecoveryManager {
    pub fn new(strategies: Vec<Arc<dyn RecoveryStrategy>>) -> Self {
        Self { strategies, in_flight: Mutex::new(HashSet::new()), counters: Counters::default() }
    }

    fn key(ctx: &ErrorContext) -> String {
        format!("{}:{}:{}", ctx.component, ctx.operation, ctx.camera_id.as_deref().unwrap_or("-"))
    }

    /// Serialises concurrent recoveries keyed by `component:operation:cameraID`;
    /// tries every applicable strategy in registration order without
    /// short-circuiting on first success (spec.md §4.8).
    pub async fn recover(&self, ctx: &ErrorContext, err: ControllerError, token: &CancellationToken) -> Result<()> {
        let key = Self::key(ctx);
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains(&key) {
                return Err(err);
            }
            in_flight.insert(key.clone());
        }

        self.counters.attempts.fetch_add(1, Ordering::SeqCst);

        let mut any_succeeded = false;
        let mut last_err = Some(err);
        for strategy in &self.strategies {
            let Some(current) = &last_err else { break };
            if !strategy.can_recover(current) {
                continue;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.in_flight.lock().remove(&key);
                    return Err(ControllerError::Cancelled);
                }
                _ = tokio::time::sleep(strategy.recovery_delay()) => {}
            }
            match strategy.recover(ctx, current, token).await {
                Ok(()) => {
                    info!(strategy = strategy.strategy_name(), key, "recovery succeeded");
                    any_succeeded = true;
                    last_err = None;
                }
                Err(e) => {
                    warn!(strategy = strategy.strategy_name(), key, error = %e, "recovery attempt failed");
                    last_err = Some(e);
                }
            }
        }

        self.in_flight.lock().remove(&key);

        if any_succeeded {
            self.counters.successes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            self.counters.failures.fetch_add(1, Ordering::SeqCst);
            Err(last_err.unwrap_or(ControllerError::NotImplemented("recovery exhausted with no error carried".to_string())))
        }
    }

    pub fn attempts(&self) -> u64 {
        self.counters.attempts.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u64 {
        self.counters.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.counters.failures.load(Ordering::SeqCst)
    }
}

/// Handles path-not-found (recreate with recording conf), path-conflict
/// (treat as success), and keepalive/RTSP errors (stop, wait, restart)
/// for recording paths (spec.md §4.8).
pub struct RecordingRecoveryStrategy {
    path_manager: Arc<PathManager>,
    recording_manager: Arc<RecordingManager>,
}

impl RecordingRecoveryStrategy {
    pub fn new(path_manager: Arc<PathManager>, recording_manager: Arc<RecordingManager>) -> Self {
        Self { path_manager, recording_manager }
    }
}

#[async_trait]
impl RecoveryStrategy for RecordingRecoveryStrategy {
    fn can_recover(&self, err: &ControllerError) -> bool {
        matches!(
            err,
            ControllerError::PathNotFound(_)
                | ControllerError::Conflict { .. }
                | ControllerError::Context { .. }
                | ControllerError::Timeout(_)
        )
    }

    async fn recover(&self, ctx: &ErrorContext, err: &ControllerError, token: &CancellationToken) -> Result<()> {
        let camera_id = ctx.camera_id.as_deref().ok_or(ControllerError::CameraNotFound)?;
        match err {
            ControllerError::Conflict { .. } => Ok(()),
            ControllerError::PathNotFound(_) => {
                let device = self.path_manager.get_device_path_for_camera(camera_id);
                let command = crate::transcoder::run_on_demand_command(&device, "127.0.0.1", 8554, camera_id);
                self.path_manager
                    .create_path(
                        camera_id,
                        "",
                        CreatePathOptions { run_on_demand: Some(command), use_case: Some(crate::models::UseCase::Recording) },
                        token,
                    )
                    .await
            }
            _ => {
                self.recording_manager.force_stop_recording(camera_id).await;
                tokio::time::sleep(self.recovery_delay()).await;
                Err(ControllerError::NotImplemented(
                    "recording restart after keepalive failure must be re-initiated by the caller".to_string(),
                ))
            }
        }
    }

    fn recovery_delay(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn strategy_name(&self) -> &'static str {
        "RecordingRecoveryStrategy"
    }
}

/// Handles FFmpeg/process errors and stream-creation errors by stopping,
/// waiting, and restarting the stream (spec.md §4.8).
pub struct StreamRecoveryStrategy {
    stream_manager: Arc<StreamManager>,
}

impl StreamRecoveryStrategy {
    pub fn new(stream_manager: Arc<StreamManager>) -> Self {
        Self { stream_manager }
    }
}

#[async_trait]
impl RecoveryStrategy for StreamRecoveryStrategy {
    fn can_recover(&self, err: &ControllerError) -> bool {
        matches!(err, ControllerError::GStreamer(_) | ControllerError::Io(_) | ControllerError::Context { .. })
    }

    async fn recover(&self, ctx: &ErrorContext, _err: &ControllerError, token: &CancellationToken) -> Result<()> {
        let camera_id = ctx.camera_id.as_deref().ok_or(ControllerError::CameraNotFound)?;
        let device = crate::identity::device_from_camera_id(camera_id);
        let _ = self.stream_manager.stop_streaming(&device, token).await;
        tokio::time::sleep(self.recovery_delay()).await;
        self.stream_manager.start_recording_stream(&device, token).await.map(|_| ())
    }

    fn recovery_delay(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn strategy_name(&self) -> &'static str {
        "StreamRecoveryStrategy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl RecoveryStrategy for AlwaysSucceeds {
        fn can_recover(&self, _err: &ControllerError) -> bool {
            true
        }
        async fn recover(&self, _ctx: &ErrorContext, _err: &ControllerError, _token: &CancellationToken) -> Result<()> {
            Ok(())
        }
        fn recovery_delay(&self) -> Duration {
            Duration::from_millis(1)
        }
        fn strategy_name(&self) -> &'static str {
            "AlwaysSucceeds"
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl RecoveryStrategy for AlwaysFails {
        fn can_recover(&self, _err: &ControllerError) -> bool {
            true
        }
        async fn recover(&self, _ctx: &ErrorContext, _err: &ControllerError, _token: &CancellationToken) -> Result<()> {
            Err(ControllerError::NotImplemented("deliberate test failure".to_string()))
        }
        fn recovery_delay(&self) -> Duration {
            Duration::from_millis(1)
        }
        fn strategy_name(&self) -> &'static str {
            "AlwaysFails"
        }
    }

    fn ctx() -> ErrorContext {
        ErrorContext::new("RecordingManager", "StartRecording", Severity::Error, true).with_camera("camera0")
    }

    #[tokio::test]
    async fn one_success_among_many_strategies_is_overall_success() {
        let mgr = ErrorRecoveryManager::new(vec![Arc::new(AlwaysFails), Arc::new(AlwaysSucceeds)]);
        let result = mgr.recover(&ctx(), ControllerError::Timeout("x".to_string()), &token()).await;
        assert!(result.is_ok());
        assert_eq!(mgr.successes(), 1);
    }

    #[tokio::test]
    async fn all_failing_strategies_yield_failure() {
        let mgr = ErrorRecoveryManager::new(vec![Arc::new(AlwaysFails)]);
        let result = mgr.recover(&ctx(), ControllerError::Timeout("x".to_string()), &token()).await;
        assert!(result.is_err());
        assert_eq!(mgr.failures(), 1);
    }

    #[tokio::test]
    async fn concurrent_recovery_for_same_key_is_rejected() {
        let mgr = Arc::new(ErrorRecoveryManager::new(vec![Arc::new(AlwaysSucceeds)]));
        mgr.in_flight.lock().insert(ErrorRecoveryManager::key(&ctx()));
        let result = mgr.recover(&ctx(), ControllerError::Timeout("x".to_string()), &token()).await;
        assert!(result.is_err());
    }
}
