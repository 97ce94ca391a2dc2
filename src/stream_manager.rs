//! StreamManager (spec.md §4.3): turns a (device, use-case) pair into a
//! ready-to-serve media-server path.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::MediaServerConfig;
use crate::error::{ControllerError, Result};
use crate::error_recovery::ErrorRecoveryManager;
use crate::identity::{camera_id_from_device, is_known_device_prefix, DevicePath};
use crate::models::{ErrorContext, Severity, UseCase};
use crate::path_manager::{CreatePathOptions, PathManager};
use crate::transcoder::run_on_demand_command;

pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub name: String,
    pub source: String,
    pub ready: bool,
}

pub struct StreamManager {
    path_manager: Arc<PathManager>,
    host: String,
    rtsp_port: u16,
    error_recovery: RwLock<Option<Arc<ErrorRecoveryManager>>>,
}

impl StreamManager {
    pub fn new(path_manager: Arc<PathManager>, config: &MediaServerConfig) -> Self {
        Self {
            path_manager,
            host: config.host.clone(),
            rtsp_port: config.rtsp_port,
            error_recovery: RwLock::new(None),
        }
    }

    /// Wired by `Controller::new` once the recovery manager (which itself
    /// holds an `Arc<StreamManager>` through its strategies) exists
    /// (spec.md §4.8).
    pub fn set_error_recovery(&self, error_recovery: Arc<ErrorRecoveryManager>) {
        *self.error_recovery.write() = Some(error_recovery);
    }

    /// Retries once through the recovery manager on a recoverable failure
    /// (spec.md §4.8, §7).
    async fn start_use_case_stream(&self, device: &str, use_case: UseCase, token: &CancellationToken) -> Result<StreamDescriptor> {
        match self.try_start_use_case_stream(device, use_case, token).await {
            Err(err) if err.is_recoverable() => {
                let Some(recovery) = self.error_recovery.read().clone() else {
                    return Err(err);
                };
                let camera_id = camera_id_from_device(device);
                let ctx = ErrorContext::new("StreamManager", "StartStream", Severity::Error, true).with_camera(camera_id);
                recovery.recover(&ctx, err, token).await?;
                self.try_start_use_case_stream(device, use_case, token).await
            }
            result => result,
        }
    }

    async fn try_start_use_case_stream(&self, device: &str, use_case: UseCase, token: &CancellationToken) -> Result<StreamDescriptor> {
        if !is_known_device_prefix(device) {
            return Err(ControllerError::Validation {
                field: "device".to_string(),
                reason: format!("'{device}' does not start with /dev/video or /dev/custom"),
            }
            .with_context("StreamManager", "StartStream"));
        }

        let camera_id = camera_id_from_device(device);
        let name = use_case.path_name(&camera_id);
        let command = run_on_demand_command(device, &self.host, self.rtsp_port, &name);

        self.path_manager
            .create_path(&name, "", CreatePathOptions { run_on_demand: Some(command), use_case: Some(use_case) }, token)
            .await
            .map_err(|e| e.with_context("StreamManager", "StartStream"))?;

        self.path_manager.record_camera_path(&camera_id, &name);

        info!(camera = camera_id, path = name, use_case = ?use_case, "on-demand stream path created");
        Ok(StreamDescriptor { name, source: device.to_string(), ready: false })
    }

    pub async fn start_recording_stream(&self, device: &str, token: &CancellationToken) -> Result<StreamDescriptor> {
        self.start_use_case_stream(device, UseCase::Recording, token).await
    }

    pub async fn start_viewing_stream(&self, device: &str, token: &CancellationToken) -> Result<StreamDescriptor> {
        self.start_use_case_stream(device, UseCase::Viewing, token).await
    }

    pub async fn start_snapshot_stream(&self, device: &str, token: &CancellationToken) -> Result<StreamDescriptor> {
        self.start_use_case_stream(device, UseCase::Snapshot, token).await
    }

    /// Legacy direct form (spec.md §4.3): a `/dev/video*` source becomes an
    /// on-demand transcoder path; anything else is treated as a pull URL.
    pub async fn create_stream(&self, name: &str, source: &str, token: &CancellationToken) -> Result<StreamDescriptor> {
        PathManager::validate_name(name).map_err(|e| e.with_context("StreamManager", "CreateStream"))?;

        if source.starts_with("/dev/video") {
            let command = run_on_demand_command(source, &self.host, self.rtsp_port, name);
            self.path_manager
                .create_path(name, "", CreatePathOptions { run_on_demand: Some(command), use_case: None }, token)
                .await
                .map_err(|e| e.with_context("StreamManager", "CreateStream"))?;
        } else {
            self.path_manager
                .create_path(name, source, CreatePathOptions::default(), token)
                .await
                .map_err(|e| e.with_context("StreamManager", "CreateStream"))?;
        }

        Ok(StreamDescriptor { name: name.to_string(), source: source.to_string(), ready: false })
    }

    pub async fn get_stream(&self, name: &str, token: &CancellationToken) -> Result<StreamDescriptor> {
        let desc = self.path_manager.get_path(name, token).await.map_err(|e| e.with_context("StreamManager", "GetStream"))?;
        Ok(StreamDescriptor {
            name: desc.name,
            source: desc.source.and_then(|s| s.source_type).unwrap_or_default(),
            ready: desc.ready,
        })
    }

    pub async fn list_streams(&self, token: &CancellationToken) -> Result<Vec<StreamDescriptor>> {
        let paths = self.path_manager.list_paths(token).await.map_err(|e| e.with_context("StreamManager", "ListStreams"))?;
        Ok(paths
            .into_iter()
            .map(|p| StreamDescriptor {
                name: p.name,
                source: p.source.and_then(|s| s.source_type).unwrap_or_default(),
                ready: p.ready,
            })
            .collect())
    }

    pub async fn delete_stream(&self, name: &str, token: &CancellationToken) -> Result<()> {
        self.path_manager.delete_path(name, token).await.map_err(|e| e.with_context("StreamManager", "DeleteStream"))
    }

    pub fn get_stream_url(&self, name: &str) -> String {
        format!("rtsp://{}:{}/{}", self.host, self.rtsp_port, name)
    }

    pub async fn get_stream_status(&self, name: &str, token: &CancellationToken) -> Result<bool> {
        Ok(self.get_stream(name, token).await?.ready)
    }

    /// Single probe via `ListPaths` (spec.md §4.3).
    pub async fn check_stream_readiness(&self, name: &str, token: &CancellationToken) -> Result<bool> {
        let paths = self.path_manager.list_paths(token).await.map_err(|e| e.with_context("StreamManager", "CheckStreamReadiness"))?;
        Ok(paths.iter().any(|p| p.name == name && p.ready))
    }

    /// Polls at 100ms cadence until ready, `timeout` elapses, or `token` is
    /// cancelled — which returns immediately even mid-sleep (spec.md §4.3,
    /// §5).
    pub async fn wait_for_stream_readiness(&self, name: &str, timeout: Duration, token: &CancellationToken) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.check_stream_readiness(name, token).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ControllerError::Cancelled),
                _ = sleep(READINESS_POLL_INTERVAL) => {}
            }
        }
    }

    /// Tries the viewing suffix first, then the recording suffix
    /// (spec.md §4.3).
    pub async fn stop_streaming(&self, device: &str, token: &CancellationToken) -> Result<()> {
        let camera_id = camera_id_from_device(device);
        let viewing_name = UseCase::Viewing.path_name(&camera_id);
        if self.path_manager.path_exists(&viewing_name, token).await.unwrap_or(false) {
            return self.delete_stream(&viewing_name, token).await;
        }
        let recording_name = UseCase::Recording.path_name(&camera_id);
        self.delete_stream(&recording_name, token).await
    }

    pub async fn stop_viewing_stream(&self, device: &str, token: &CancellationToken) -> Result<()> {
        let camera_id = camera_id_from_device(device);
        let viewing_name = UseCase::Viewing.path_name(&camera_id);
        self.delete_stream(&viewing_name, token).await
    }

    pub fn device_for(&self, camera_id: &str) -> DevicePath {
        self.path_manager.get_device_path_for_camera(camera_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_format_matches_spec() {
        let cfg = test_config();
        let pm = Arc::new(PathManager::new(
            crate::http_client::MediaServerClient::new(&cfg).unwrap(),
            &cfg,
            Arc::new(crate::camera_monitor::DeviceNodeMonitor::new()),
        ));
        let sm = StreamManager::new(pm, &cfg);
        assert_eq!(sm.get_stream_url("camera0"), "rtsp://127.0.0.1:8554/camera0");
    }

    fn test_config() -> crate::config::MediaServerConfig {
        crate::config::MediaServerConfig {
            base_url: "http://127.0.0.1:9997".to_string(),
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
        }
    }
}
