//! Controller (spec.md §4.1) — owns lifecycle, resolves identifiers,
//! broadcasts readiness, dispatches to managers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::camera_monitor::{CameraMonitor, DeviceNodeMonitor};
use crate::config::Config;
use crate::error::{ControllerError, Result};
use crate::error_recovery::{ErrorRecoveryManager, RecordingRecoveryStrategy, StreamRecoveryStrategy};
use crate::health_monitor::{HealthMonitor, HealthSnapshot};
use crate::http_client::MediaServerClient;
use crate::identity::{camera_id_from_device, device_from_camera_id, CameraId};
use crate::models::{
    RecordingOptions, RecordingStatus, SnapshotOptions, SnapshotRecord, SystemEvent, SystemEventNotifier,
};
use crate::path_manager::{CameraListEntry, PathManager};
use crate::readiness::{ReadinessState, ReadinessTracker};
use crate::recording_manager::RecordingManager;
use crate::rtsp_connection_manager::{ConnectionHealth, ConnectionMetrics, RtspConnectionManager, RtspConnection, RtspSession};
use crate::snapshot_manager::SnapshotManager;
use crate::stream_manager::{StreamDescriptor, StreamManager};
use crate::transcoder::FfmpegTranscoder;

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub active_recordings: usize,
    pub recovery_attempts: u64,
    pub recovery_successes: u64,
    pub recovery_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub recordings_path: String,
    pub snapshots_path: String,
}

pub struct Controller {
    path_manager: Arc<PathManager>,
    stream_manager: Arc<StreamManager>,
    recording_manager: Arc<RecordingManager>,
    snapshot_manager: Arc<SnapshotManager>,
    health_monitor: Arc<HealthMonitor>,
    rtsp_connection_manager: Arc<RtspConnectionManager>,
    error_recovery: Arc<ErrorRecoveryManager>,
    readiness: Arc<ReadinessTracker>,
    notifier: RwLock<Option<Arc<dyn SystemEventNotifier>>>,
    recordings_path: String,
    snapshots_path: String,
}

impl Controller {
    pub fn new(config: &Config) -> Result<Self> {
        let client = MediaServerClient::new(&config.media_server)?;
        let camera_monitor: Arc<dyn CameraMonitor> = Arc::new(DeviceNodeMonitor::new());

        let path_manager = Arc::new(PathManager::new(client.clone(), &config.media_server, camera_monitor.clone()));
        let stream_manager = Arc::new(StreamManager::new(path_manager.clone(), &config.media_server));
        let recording_manager = Arc::new(RecordingManager::new(
            client.clone(),
            path_manager.clone(),
            &config.media_server,
            config.recording_defaults.clone(),
        ));
        let snapshot_manager = Arc::new(SnapshotManager::new(
            path_manager.clone(),
            stream_manager.clone(),
            camera_monitor,
            Arc::new(FfmpegTranscoder),
            config.snapshot_defaults.clone(),
        ));
        let health_monitor = Arc::new(HealthMonitor::new(client.clone(), &config.media_server, true));
        let rtsp_connection_manager = Arc::new(RtspConnectionManager::new(
            client,
            config.media_server.rtsp_monitoring.enabled,
            config.media_server.rtsp_monitoring.max_connections,
        ));

        let strategies: Vec<Arc<dyn crate::error_recovery::RecoveryStrategy>> = vec![
            Arc::new(RecordingRecoveryStrategy::new(path_manager.clone(), recording_manager.clone())),
            Arc::new(StreamRecoveryStrategy::new(stream_manager.clone())),
        ];
        let error_recovery = Arc::new(ErrorRecoveryManager::new(strategies));
        recording_manager.set_error_recovery(error_recovery.clone());
        stream_manager.set_error_recovery(error_recovery.clone());

        Ok(Self {
            path_manager,
            stream_manager,
            recording_manager,
            snapshot_manager,
            health_monitor,
            rtsp_connection_manager,
            error_recovery,
            readiness: Arc::new(ReadinessTracker::new()),
            notifier: RwLock::new(None),
            recordings_path: config.media_server.recordings_path.clone(),
            snapshots_path: config.snapshot_defaults.snapshots_dir.clone(),
        })
    }

    /// Starts dependents in dependency order (spec.md §2, §5) and signals
    /// Ready once started. Idempotent while already Started. `token`
    /// governs the health monitor's probe loop for the remainder of its
    /// life, not just this call.
    pub async fn start(&self, token: CancellationToken) {
        if self.readiness.state() != ReadinessState::NotStarted && self.readiness.state() != ReadinessState::Stopped {
            return;
        }
        self.readiness.set_starting();
        self.health_monitor.start(token);
        info!("controller started, dependencies initialised in order");
        self.readiness.set_ready();
    }

    /// Stops dependents in reverse order, honouring `deadline`
    /// (spec.md §4.1, §5).
    pub async fn stop(&self, token: CancellationToken, deadline: Duration) {
        let _ = token;
        if self.readiness.state() == ReadinessState::Stopped {
            return;
        }
        self.readiness.set_stopping();
        self.health_monitor.stop(deadline).await;
        self.readiness.set_stopped();
        info!("controller stopped");
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub async fn subscribe_to_readiness(&self, token: &CancellationToken) -> Result<()> {
        self.readiness.subscribe(token).await
    }

    fn require_ready(&self, component: &str) -> Result<()> {
        if self.readiness.is_ready() {
            Ok(())
        } else {
            Err(ControllerError::NotReady { component: component.to_string() })
        }
    }

    pub fn get_health(&self) -> HealthSnapshot {
        self.health_monitor.snapshot()
    }

    pub fn get_system_metrics(&self) -> SystemMetrics {
        SystemMetrics {
            active_recordings: self.recording_manager.active_recordings().len(),
            recovery_attempts: self.error_recovery.attempts(),
            recovery_successes: self.error_recovery.successes(),
            recovery_failures: self.error_recovery.failures(),
        }
    }

    pub fn get_storage_info(&self) -> StorageInfo {
        StorageInfo { recordings_path: self.recordings_path.clone(), snapshots_path: self.snapshots_path.clone() }
    }

    pub async fn get_metrics(&self, token: &CancellationToken) -> Result<ConnectionMetrics> {
        self.rtsp_connection_manager.get_connection_metrics(token).await
    }

    // --- Identifier resolution (spec.md §4.1) ---

    pub fn camera_id_from_device(&self, device: &str) -> CameraId {
        camera_id_from_device(device)
    }

    pub fn device_from_camera_id(&self, camera_id: &str) -> String {
        device_from_camera_id(camera_id)
    }

    // --- Paths / streams ---

    pub async fn get_paths(&self, token: &CancellationToken) -> Result<Vec<crate::models::PathDescriptor>> {
        self.require_ready("PathManager")?;
        self.path_manager.list_paths(token).await
    }

    pub async fn get_stream(&self, name: &str, token: &CancellationToken) -> Result<StreamDescriptor> {
        self.require_ready("StreamManager")?;
        self.stream_manager.get_stream(name, token).await
    }

    pub async fn get_streams(&self, token: &CancellationToken) -> Result<Vec<StreamDescriptor>> {
        self.require_ready("StreamManager")?;
        self.stream_manager.list_streams(token).await
    }

    pub async fn create_stream(&self, name: &str, source: &str, token: &CancellationToken) -> Result<StreamDescriptor> {
        self.require_ready("StreamManager")?;
        self.stream_manager.create_stream(name, source, token).await
    }

    pub async fn delete_stream(&self, name: &str, token: &CancellationToken) -> Result<()> {
        self.require_ready("StreamManager")?;
        self.stream_manager.delete_stream(name, token).await
    }

    pub async fn start_streaming(&self, camera_id: &str, token: &CancellationToken) -> Result<StreamDescriptor> {
        self.require_ready("StreamManager")?;
        let device = device_from_camera_id(camera_id);
        self.stream_manager.start_viewing_stream(&device, token).await
    }

    pub async fn get_stream_status(&self, camera_id: &str, token: &CancellationToken) -> Result<bool> {
        self.require_ready("StreamManager")?;
        self.stream_manager.get_stream_status(camera_id, token).await
    }

    pub fn get_stream_url(&self, camera_id: &str) -> String {
        self.stream_manager.get_stream_url(camera_id)
    }

    // --- Recording ---

    pub async fn start_recording(&self, camera_id: &str, opts: RecordingOptions, token: &CancellationToken) -> Result<RecordingStatus> {
        self.require_ready("RecordingManager")?;
        self.recording_manager.start_recording(camera_id, opts, token).await
    }

    pub async fn stop_recording(&self, camera_id: &str, token: &CancellationToken) -> Result<RecordingStatus> {
        self.require_ready("RecordingManager")?;
        self.recording_manager.stop_recording(camera_id, token).await
    }

    pub async fn list_recordings(&self, limit: usize, offset: usize, token: &CancellationToken) -> Result<Vec<RecordingStatus>> {
        self.require_ready("RecordingManager")?;
        self.recording_manager.list_recordings(limit, offset, token).await
    }

    pub fn is_device_recording(&self, camera_id: &str) -> bool {
        self.recording_manager.is_recording(camera_id)
    }

    pub fn get_active_recordings(&self) -> Vec<CameraId> {
        self.recording_manager.active_recordings()
    }

    pub fn get_active_recording(&self, camera_id: &str) -> Option<CameraId> {
        self.recording_manager.active_recordings().into_iter().find(|c| c == camera_id)
    }

    // --- Snapshots ---

    pub async fn take_advanced_snapshot(&self, camera_id: &str, opts: SnapshotOptions, token: &CancellationToken) -> Result<SnapshotRecord> {
        self.require_ready("SnapshotManager")?;
        self.snapshot_manager.take_advanced_snapshot(camera_id, opts, token).await
    }

    pub fn list_advanced_snapshots(&self) -> Vec<SnapshotRecord> {
        self.snapshot_manager.list_advanced_snapshots()
    }

    pub fn get_advanced_snapshot(&self, id: &str) -> Result<SnapshotRecord> {
        self.snapshot_manager.get_advanced_snapshot(id)
    }

    pub fn get_snapshot_settings(&self) -> crate::config::SnapshotDefaults {
        self.snapshot_manager.get_snapshot_settings()
    }

    pub fn update_snapshot_settings(&self, settings: crate::config::SnapshotDefaults) -> Result<()> {
        self.snapshot_manager.update_snapshot_settings(settings)
    }

    // --- Cameras ---

    pub async fn get_camera_list(&self) -> Vec<CameraListEntry> {
        self.path_manager.get_camera_list().await
    }

    pub async fn get_camera_status(&self, camera_id: &str) -> Result<CameraListEntry> {
        self.path_manager.get_camera_status(camera_id).await
    }

    // --- RTSP connections ---

    pub async fn list_rtsp_connections(&self, page: i64, items_per_page: i64, token: &CancellationToken) -> Result<Vec<RtspConnection>> {
        self.rtsp_connection_manager.list_connections(page, items_per_page, token).await
    }

    pub async fn list_rtsp_sessions(&self, page: i64, items_per_page: i64, token: &CancellationToken) -> Result<Vec<RtspSession>> {
        self.rtsp_connection_manager.list_sessions(page, items_per_page, token).await
    }

    pub async fn get_rtsp_connection_health(&self, token: &CancellationToken) -> ConnectionHealth {
        self.rtsp_connection_manager.get_connection_health(token).await
    }

    pub async fn get_rtsp_connection_metrics(&self, token: &CancellationToken) -> Result<ConnectionMetrics> {
        self.rtsp_connection_manager.get_connection_metrics(token).await
    }

    // --- System events ---

    pub fn set_system_event_notifier(&self, notifier: Arc<dyn SystemEventNotifier>) {
        *self.notifier.write() = Some(notifier);
    }

    pub fn notify_system_event(&self, event: SystemEvent) {
        if let Some(notifier) = self.notifier.read().as_ref() {
            notifier.notify(event);
        } else {
            warn!("system event raised with no notifier installed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    fn test_config(base_url: String) -> Config {
        Config {
            media_server: crate::config::MediaServerConfig {
                base_url,
                health_check_url: "/v3/paths/list".to_string(),
                timeout_secs: 5,
                health_check_interval_secs: 30,
                health_check_timeout_secs: 5,
                health_failure_threshold: 3,
                connection_pool: Default::default(),
                host: "127.0.0.1".to_string(),
                rtsp_port: 8554,
                webrtc_port: 8889,
                hls_port: 8888,
                recordings_path: "./recordings".to_string(),
                rtsp_monitoring: Default::default(),
            },
            recording_defaults: Default::default(),
            snapshot_defaults: Default::default(),
        }
    }

    #[tokio::test]
    async fn start_then_is_ready_then_stop_round_trips() {
        let controller = Controller::new(&test_config("http://127.0.0.1:9997".to_string())).unwrap();
        assert!(!controller.is_ready());
        controller.start(token()).await;
        assert!(controller.is_ready());
        controller.stop(token(), Duration::from_secs(1)).await;
        assert!(!controller.is_ready());
    }

    #[tokio::test]
    async fn operations_fail_not_ready_before_start() {
        let controller = Controller::new(&test_config("http://127.0.0.1:9997".to_string())).unwrap();
        let result = controller.get_paths(&token()).await;
        assert!(matches!(result, Err(ControllerError::NotReady { .. })));
    }

    #[tokio::test]
    async fn subscribe_to_readiness_resolves_after_start() {
        let controller = Arc::new(Controller::new(&test_config("http://127.0.0.1:9997".to_string())).unwrap());
        let c = controller.clone();
        let waiter = tokio::spawn(async move { c.subscribe_to_readiness(&token()).await });
        controller.start(token()).await;
        tokio::time::timeout(Duration::from_millis(200), waiter).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_under_cancelled_token_still_completes_within_deadline() {
        let controller = Controller::new(&test_config("http://127.0.0.1:9997".to_string())).unwrap();
        let start_token = CancellationToken::new();
        controller.start(start_token.clone()).await;
        start_token.cancel();
        let start = std::time::Instant::now();
        controller.stop(token(), Duration::from_millis(500)).await;
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(!controller.is_ready());
    }
}
