//! SnapshotManager (spec.md §4.5) — four-tier capture fallback plus an
//! in-memory snapshot index.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::camera_monitor::CameraMonitor;
use crate::config::SnapshotDefaults;
use crate::error::{ControllerError, Result};
use crate::identity::{device_from_camera_id, is_known_device_prefix};
use crate::models::{SnapshotOptions, SnapshotRecord, SnapshotStatus};
use crate::path_manager::PathManager;
use crate::stream_manager::StreamManager;
use crate::transcoder::Transcoder;

/// Tier labels accumulated into the aggregate error message (spec.md §4.5,
/// "tried: [T1, T2, ...]").
const TIER_NAMES: [&str; 3] = ["direct-device", "live-stream", "on-demand-path"];

pub struct SnapshotManager {
    path_manager: Arc<PathManager>,
    stream_manager: Arc<StreamManager>,
    camera_monitor: Arc<dyn CameraMonitor>,
    transcoder: Arc<dyn Transcoder>,
    defaults: RwLock<SnapshotDefaults>,
    index: RwLock<VecDeque<SnapshotRecord>>,
}

impl SnapshotManager {
    pub fn new(
        path_manager: Arc<PathManager>,
        stream_manager: Arc<StreamManager>,
        camera_monitor: Arc<dyn CameraMonitor>,
        transcoder: Arc<dyn Transcoder>,
        defaults: SnapshotDefaults,
    ) -> Self {
        Self {
            path_manager,
            stream_manager,
            camera_monitor,
            transcoder,
            defaults: RwLock::new(defaults),
            index: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn take_advanced_snapshot(&self, camera_id: &str, opts: SnapshotOptions, token: &CancellationToken) -> Result<SnapshotRecord> {
        let device = device_from_camera_id(camera_id);
        let (quality, format, snapshots_dir, retention) = {
            let d = self.defaults.read();
            (
                opts.quality.unwrap_or(d.quality),
                opts.format.clone().unwrap_or_else(|| d.format.clone()),
                d.snapshots_dir.clone(),
                d.retention_count,
            )
        };

        let timestamp = Utc::now();
        let filename = format!("{camera_id}_{}.{format}", timestamp.format("%Y-%m-%d_%H-%M-%S"));
        let file_path = format!("{snapshots_dir}/{filename}");

        let mut attempted = Vec::new();

        // Tier 1: direct device capture.
        if is_known_device_prefix(&device) && self.camera_monitor.get_device(&device).await.is_some() {
            attempted.push(TIER_NAMES[0]);
            match self
                .transcoder
                .capture_frame(&device, &file_path, Duration::from_secs(5))
                .await
            {
                Ok(()) => {
                    return Ok(self.record_success(camera_id, &filename, &file_path, timestamp, 1, retention).await);
                }
                Err(e) => warn!(camera = camera_id, error = %e, quality, "tier 1 (direct device) snapshot failed"),
            }
        }

        // Tier 2: read a frame off an already-live media-server stream.
        attempted.push(TIER_NAMES[1]);
        if let Ok(ready) = self.stream_manager.check_stream_readiness(camera_id, token).await {
            if ready {
                match self
                    .transcoder
                    .capture_frame(&self.stream_manager.get_stream_url(camera_id), &file_path, Duration::from_secs(5))
                    .await
                {
                    Ok(()) => {
                        return Ok(self.record_success(camera_id, &filename, &file_path, timestamp, 2, retention).await);
                    }
                    Err(e) => warn!(camera = camera_id, error = %e, "tier 2 (live stream) snapshot failed"),
                }
            }
        }

        // Tier 3: activate an on-demand snapshot path, wait, capture.
        attempted.push(TIER_NAMES[2]);
        match self.stream_manager.start_snapshot_stream(&device, token).await {
            Ok(stream) => {
                let path_name = stream.name;
                let ready = self
                    .stream_manager
                    .wait_for_stream_readiness(&path_name, Duration::from_secs(5), token)
                    .await
                    .unwrap_or(false);
                if ready {
                    let url = self.stream_manager.get_stream_url(&path_name);
                    let captured = self.transcoder.capture_frame(&url, &file_path, Duration::from_secs(5)).await;
                    if captured.is_ok() {
                        return Ok(self.record_success(camera_id, &filename, &file_path, timestamp, 3, retention).await);
                    }
                }
            }
            Err(e) => warn!(camera = camera_id, error = %e, "tier 3 (on-demand path) setup failed"),
        }

        // Tier 4: error.
        let record = SnapshotRecord {
            id: Uuid::new_v4().to_string(),
            device: camera_id.to_string(),
            filename,
            file_path,
            file_size: None,
            timestamp,
            tier_used: 0,
            status: SnapshotStatus::Failed,
        };
        self.push_index(record, retention);
        Err(ControllerError::Conflict {
            operation: "TakeAdvancedSnapshot".to_string(),
            reason: format!("snapshot failed, tried: [{}]", attempted.join(", ")),
        }
        .with_context("SnapshotManager", "TakeAdvancedSnapshot"))
    }

    /// Stats the just-written file to populate the client-facing `fileSize`
    /// field (spec.md §6); best-effort, `None` if the stat fails.
    async fn record_success(
        &self,
        camera_id: &str,
        filename: &str,
        file_path: &str,
        timestamp: chrono::DateTime<Utc>,
        tier_used: u8,
        retention: usize,
    ) -> SnapshotRecord {
        let file_size = tokio::fs::metadata(file_path).await.ok().map(|m| m.len());
        let record = SnapshotRecord {
            id: Uuid::new_v4().to_string(),
            device: camera_id.to_string(),
            filename: filename.to_string(),
            file_path: file_path.to_string(),
            file_size,
            timestamp,
            tier_used,
            status: SnapshotStatus::Success,
        };
        info!(camera = camera_id, tier = tier_used, file_path, "snapshot captured");
        self.push_index(record.clone(), retention);
        record
    }

    fn push_index(&self, record: SnapshotRecord, retention: usize) {
        let mut index = self.index.write();
        index.push_back(record);
        while index.len() > retention {
            index.pop_front();
        }
    }

    pub fn get_advanced_snapshot(&self, id: &str) -> Result<SnapshotRecord> {
        self.index
            .read()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ControllerError::Validation { field: "id".to_string(), reason: "snapshot not found".to_string() })
    }

    pub fn list_advanced_snapshots(&self) -> Vec<SnapshotRecord> {
        self.index.read().iter().cloned().collect()
    }

    pub fn get_snapshot_settings(&self) -> SnapshotDefaults {
        self.defaults.read().clone()
    }

    pub fn update_snapshot_settings(&self, new_defaults: SnapshotDefaults) -> Result<()> {
        if new_defaults.quality == 0 || new_defaults.quality > 100 {
            return Err(ControllerError::Validation {
                field: "quality".to_string(),
                reason: "must be in 1..=100".to_string(),
            });
        }
        *self.defaults.write() = new_defaults;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysFailTranscoder;

    #[async_trait]
    impl Transcoder for AlwaysFailTranscoder {
        async fn capture_frame(&self, _device: &str, _output_path: &str, _timeout: Duration) -> Result<()> {
            Err(ControllerError::Timeout("simulated capture failure".to_string()))
        }
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

    fn manager() -> SnapshotManager {
        let config = test_config();
        let client = crate::http_client::MediaServerClient::new(&config).unwrap();
        let camera_monitor: Arc<dyn CameraMonitor> = Arc::new(crate::camera_monitor::DeviceNodeMonitor::new());
        let path_manager = Arc::new(PathManager::new(client, &config, camera_monitor.clone()));
        let stream_manager = Arc::new(StreamManager::new(path_manager.clone(), &config));
        SnapshotManager::new(path_manager, stream_manager, camera_monitor, Arc::new(AlwaysFailTranscoder), SnapshotDefaults::default())
    }

    #[test]
    fn index_retention_evicts_oldest_first() {
        let mgr = manager();
        for i in 0..5 {
            mgr.push_index(
                SnapshotRecord {
                    id: format!("id{i}"),
                    device: "camera0".to_string(),
                    filename: format!("f{i}.jpg"),
                    file_path: format!("/snap/f{i}.jpg"),
                    file_size: None,
                    timestamp: Utc::now(),
                    tier_used: 1,
                    status: SnapshotStatus::Success,
                },
                3,
            );
        }
        let snapshots = mgr.list_advanced_snapshots();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].id, "id2");
        assert_eq!(snapshots[2].id, "id4");
    }

    #[test]
    fn update_settings_rejects_out_of_range_quality() {
        let mgr = manager();
        let mut bad = mgr.get_snapshot_settings();
        bad.quality = 0;
        assert!(mgr.update_snapshot_settings(bad).is_err());
    }

    #[tokio::test]
    async fn all_tiers_failing_yields_aggregate_error() {
        let mgr = manager();
        let result = mgr.take_advanced_snapshot("camera999", SnapshotOptions::default(), &CancellationToken::new()).await;
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("tried"));
    }
}
