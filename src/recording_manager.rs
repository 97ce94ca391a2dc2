//! RecordingManager (spec.md §4.4) — stateless recording, gated by the
//! media server's own `record` flag and backed locally only by an
//! auto-stop timer map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{MediaServerConfig, RecordingDefaults};
use crate::error::{ControllerError, Result};
use crate::error_recovery::ErrorRecoveryManager;
use crate::http_client::MediaServerClient;
use crate::identity::{device_from_camera_id, is_known_device_prefix, CameraId};
use crate::keepalive::{spawn_keepalive, KeepaliveHandle};
use crate::models::{ErrorContext, PathConf, RecordingOptions, RecordingState, RecordingStatus, Severity, UseCase};
use crate::path_manager::{CreatePathOptions, PathManager};

/// Local bookkeeping for one active recording. Presence of an entry for a
/// `CameraID` is the authoritative *local* indicator that a recording is
/// tracked; the media server remains authoritative for `record=true` itself
/// (spec.md §3, `RecordingTimer`).
struct RecordingTimer {
    start_time: DateTime<Utc>,
    filename: String,
    format: String,
    keepalive: KeepaliveHandle,
    auto_stop: Option<JoinHandle<()>>,
}

pub struct RecordingManager {
    client: MediaServerClient,
    path_manager: Arc<PathManager>,
    host: String,
    rtsp_port: u16,
    recordings_path: String,
    defaults: RecordingDefaults,
    timers: Arc<RwLock<HashMap<CameraId, RecordingTimer>>>,
    error_recovery: RwLock<Option<Arc<ErrorRecoveryManager>>>,
}

impl RecordingManager {
    pub fn new(
        client: MediaServerClient,
        path_manager: Arc<PathManager>,
        config: &MediaServerConfig,
        defaults: RecordingDefaults,
    ) -> Self {
        Self {
            client,
            path_manager,
            host: config.host.clone(),
            rtsp_port: config.rtsp_port,
            recordings_path: config.recordings_path.clone(),
            defaults,
            timers: Arc::new(RwLock::new(HashMap::new())),
            error_recovery: RwLock::new(None),
        }
    }

    /// Wired by `Controller::new` once the recovery manager (which itself
    /// holds an `Arc<RecordingManager>` through its strategies) exists
    /// (spec.md §4.8).
    pub fn set_error_recovery(&self, error_recovery: Arc<ErrorRecoveryManager>) {
        *self.error_recovery.write() = Some(error_recovery);
    }

    /// Retries once through the recovery manager on a recoverable failure
    /// (spec.md §4.8, §7).
    pub async fn start_recording(&self, camera_id: &str, opts: RecordingOptions, token: &CancellationToken) -> Result<RecordingStatus> {
        match self.try_start_recording(camera_id, opts.clone(), token).await {
            Err(err) if err.is_recoverable() => {
                let Some(recovery) = self.error_recovery.read().clone() else {
                    return Err(err);
                };
                let ctx = ErrorContext::new("RecordingManager", "StartRecording", Severity::Error, true).with_camera(camera_id);
                recovery.recover(&ctx, err, token).await?;
                self.try_start_recording(camera_id, opts, token).await
            }
            result => result,
        }
    }

    /// Implements the 7-step flow of spec.md §4.4.
    async fn try_start_recording(&self, camera_id: &str, opts: RecordingOptions, token: &CancellationToken) -> Result<RecordingStatus> {
        let device = device_from_camera_id(camera_id);
        if !is_known_device_prefix(&device) {
            return Err(ControllerError::CameraNotFound.with_context("RecordingManager", "StartRecording"));
        }

        if self.timers.read().contains_key(camera_id) {
            return Err(ControllerError::Conflict {
                operation: "StartRecording".to_string(),
                reason: "already recording".to_string(),
            }
            .with_context("RecordingManager", "StartRecording"));
        }

        if !self.path_manager.path_exists(camera_id, token).await.unwrap_or(false) {
            let command = crate::transcoder::run_on_demand_command(&device, &self.host, self.rtsp_port, camera_id);
            self.path_manager
                .create_path(camera_id, "", CreatePathOptions { run_on_demand: Some(command), use_case: Some(UseCase::Recording) }, token)
                .await
                .map_err(|e| e.with_context("RecordingManager", "StartRecording"))?;
        }

        let existing_conf: PathConf = self
            .client
            .get_json(&format!("/v3/config/paths/get/{camera_id}"), token)
            .await
            .map_err(|e| e.with_context("RecordingManager", "StartRecording"))?;
        if existing_conf.record == Some(true) {
            return Err(ControllerError::Conflict {
                operation: "StartRecording".to_string(),
                reason: "already recording".to_string(),
            }
            .with_context("RecordingManager", "StartRecording"));
        }

        let format = opts.record_format.clone().unwrap_or_else(|| self.defaults.format.clone());
        let patch = PathConf {
            record: Some(true),
            record_path: Some(self.recordings_path.clone()),
            record_part_duration: Some(format!("{}s", opts.record_part_duration_secs.unwrap_or(self.defaults.part_duration_secs))),
            record_max_part_size: Some(opts.record_max_part_size.unwrap_or(self.defaults.max_part_size_bytes)),
            record_format: Some(format.clone()),
            ..Default::default()
        };

        self.client
            .patch(&format!("/v3/config/paths/patch/{camera_id}"), &patch, token)
            .await
            .map_err(|e| e.with_context("RecordingManager", "StartRecording"))?;

        let rtsp_url = format!("rtsp://{}:{}/{camera_id}", self.host, self.rtsp_port);
        let keepalive = spawn_keepalive(rtsp_url, camera_id.to_string());

        let start_time = Utc::now();
        let ext = if format == "mp4" { "mp4" } else { "fmp4" };
        let filename = format!("{camera_id}_{}.{ext}", start_time.format("%Y%m%dT%H%M%SZ"));

        let auto_stop = opts.record_delete_after_secs.filter(|secs| *secs > 0).map(|secs| {
            let camera_id = camera_id.to_string();
            let timers = self.timers.clone();
            let client = self.client.clone();
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                if let Some(timer) = timers.write().remove(&camera_id) {
                    let disable = PathConf { record: Some(false), ..Default::default() };
                    if let Err(e) = client.patch(&format!("/v3/config/paths/patch/{camera_id}"), &disable, &token).await {
                        warn!(camera = camera_id, error = %e, "auto-stop: failed to disable record flag");
                    }
                    timer.keepalive.stop().await;
                    info!(camera = camera_id, "auto-stop timer expired, recording stopped");
                }
            })
        });

        self.timers.write().insert(
            camera_id.to_string(),
            RecordingTimer { start_time, filename: filename.clone(), format: format.clone(), keepalive, auto_stop },
        );

        info!(camera = camera_id, filename, "recording started");
        Ok(RecordingStatus {
            device: camera_id.to_string(),
            filename,
            status: RecordingState::Recording,
            start_time,
            end_time: None,
            duration_secs: None,
            file_size: None,
            format,
        })
    }

    pub async fn stop_recording(&self, camera_id: &str, token: &CancellationToken) -> Result<RecordingStatus> {
        match self.try_stop_recording(camera_id, token).await {
            Err(err) if err.is_recoverable() => {
                let Some(recovery) = self.error_recovery.read().clone() else {
                    return Err(err);
                };
                let ctx = ErrorContext::new("RecordingManager", "StopRecording", Severity::Error, true).with_camera(camera_id);
                recovery.recover(&ctx, err, token).await?;
                self.try_stop_recording(camera_id, token).await
            }
            result => result,
        }
    }

    /// Implements the 6-step flow of spec.md §4.4.
    async fn try_stop_recording(&self, camera_id: &str, token: &CancellationToken) -> Result<RecordingStatus> {
        let conf: PathConf = self
            .client
            .get_json(&format!("/v3/config/paths/get/{camera_id}"), token)
            .await
            .map_err(|e| e.with_context("RecordingManager", "StopRecording"))?;
        if conf.record != Some(true) {
            return Err(ControllerError::Conflict {
                operation: "StopRecording".to_string(),
                reason: "not currently recording".to_string(),
            }
            .with_context("RecordingManager", "StopRecording"));
        }

        let timer = self.timers.write().remove(camera_id);
        let captured = match timer {
            Some(t) => {
                if let Some(auto_stop) = t.auto_stop {
                    auto_stop.abort();
                }
                t.keepalive.stop().await;
                Some((t.start_time, t.filename, t.format))
            }
            None => None,
        };

        let disable = PathConf { record: Some(false), ..Default::default() };
        self.client
            .patch(&format!("/v3/config/paths/patch/{camera_id}"), &disable, token)
            .await
            .map_err(|e| e.with_context("RecordingManager", "StopRecording"))?;

        let end_time = Utc::now();
        let (start_time, filename, format, duration_secs, file_size) = match captured {
            Some((start_time, filename, format)) => {
                let duration = (end_time - start_time).num_seconds().max(0);
                let file_size = std::fs::metadata(format!("{}/{}", self.recordings_path, filename)).ok().map(|m| m.len());
                (start_time, filename, format, Some(duration), file_size)
            }
            None => (end_time, format!("{camera_id}_unknown"), self.defaults.format.clone(), None, None),
        };

        info!(camera = camera_id, "recording stopped");
        Ok(RecordingStatus {
            device: camera_id.to_string(),
            filename,
            status: RecordingState::Stopped,
            start_time,
            end_time: Some(end_time),
            duration_secs,
            file_size,
            format,
        })
    }

    pub fn is_recording(&self, camera_id: &str) -> bool {
        self.timers.read().contains_key(camera_id)
    }

    /// Local cleanup on device disconnect: never talks to the media server
    /// (spec.md §4.4, `forceStopRecording`).
    pub async fn force_stop_recording(&self, camera_id: &str) {
        if let Some(timer) = self.timers.write().remove(camera_id) {
            if let Some(auto_stop) = timer.auto_stop {
                auto_stop.abort();
            }
            timer.keepalive.stop().await;
            warn!(camera = camera_id, "force-stopped recording locally after device disconnect");
        }
    }

    pub fn active_recordings(&self) -> Vec<CameraId> {
        self.timers.read().keys().cloned().collect()
    }

    /// Fetches `offset + limit` items from page 0, sorts by start time, and
    /// slices the requested window locally — the media server's own
    /// page/itemsPerPage granularity is over path/entry objects, not the
    /// flattened per-segment list this returns (spec.md §4.1, §6).
    pub async fn list_recordings(&self, limit: usize, offset: usize, token: &CancellationToken) -> Result<Vec<RecordingStatus>> {
        #[derive(serde::Deserialize)]
        struct RecordingsList {
            #[serde(default)]
            items: Vec<RecordingEntry>,
        }
        #[derive(serde::Deserialize)]
        struct RecordingEntry {
            name: String,
            #[serde(default)]
            segments: Vec<SegmentEntry>,
        }
        #[derive(serde::Deserialize)]
        struct SegmentEntry {
            start: DateTime<Utc>,
        }

        let fetch = (offset + limit).max(1);
        let path = format!("/v3/recordings/list?page=0&itemsPerPage={fetch}");
        let list: RecordingsList =
            self.client.get_json(&path, token).await.map_err(|e| e.with_context("RecordingManager", "ListRecordings"))?;

        let mut out = Vec::new();
        for entry in list.items {
            for segment in entry.segments {
                out.push(RecordingStatus {
                    device: entry.name.clone(),
                    filename: format!("{}_{}.fmp4", entry.name, segment.start.format("%Y%m%dT%H%M%SZ")),
                    status: RecordingState::Stopped,
                    start_time: segment.start,
                    end_time: None,
                    duration_secs: None,
                    file_size: None,
                    format: self.defaults.format.clone(),
                });
            }
        }
        out.sort_by_key(|r| r.start_time);
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    pub fn get_recording_info(&self, filename: &str) -> Result<RecordingStatus> {
        let path = format!("{}/{}", self.recordings_path, filename);
        let metadata = std::fs::metadata(&path).map_err(ControllerError::Io)?;
        let device = filename.split('_').next().unwrap_or(filename).to_string();
        Ok(RecordingStatus {
            device,
            filename: filename.to_string(),
            status: RecordingState::Stopped,
            start_time: metadata.created().ok().map(DateTime::<Utc>::from).unwrap_or_else(Utc::now),
            end_time: None,
            duration_secs: None,
            file_size: Some(metadata.len()),
            format: self.defaults.format.clone(),
        })
    }

    /// Open question resolution (spec.md §9): deletion is an HTTP call
    /// against the media server's `deletesegment` endpoint, idempotent on
    /// 404. Filenames are `{path}_{start}.{ext}`, so the path/start pair is
    /// recovered from the filename before the call.
    pub async fn delete_recording(&self, filename: &str, token: &CancellationToken) -> Result<()> {
        if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
            return Err(ControllerError::Validation {
                field: "filename".to_string(),
                reason: "must not contain path separators or '..'".to_string(),
            }
            .with_context("RecordingManager", "DeleteRecording"));
        }

        let (path, start) = Self::parse_recording_filename(filename)
            .map_err(|e| e.with_context("RecordingManager", "DeleteRecording"))?;
        let query = format!(
            "/v3/recordings/deletesegment?path={}&start={}",
            percent_encode(&path),
            percent_encode(&start)
        );
        self.client.delete_idempotent(&query, token).await.map_err(|e| e.with_context("RecordingManager", "DeleteRecording"))
    }

    /// `{path}_{%Y%m%dT%H%M%SZ}.{ext}` (the format `StartRecording` and
    /// `ListRecordings` both construct) back into `(path, RFC3339 start)`.
    fn parse_recording_filename(filename: &str) -> Result<(String, String)> {
        let (stem, _ext) = filename.rsplit_once('.').ok_or_else(|| ControllerError::Validation {
            field: "filename".to_string(),
            reason: "missing file extension".to_string(),
        })?;
        let (path, ts) = stem.rsplit_once('_').ok_or_else(|| ControllerError::Validation {
            field: "filename".to_string(),
            reason: "missing '_' timestamp separator".to_string(),
        })?;
        let naive = chrono::NaiveDateTime::parse_from_str(ts, "%Y%m%dT%H%M%SZ").map_err(|_| ControllerError::Validation {
            field: "filename".to_string(),
            reason: "malformed timestamp segment".to_string(),
        })?;
        let start = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).to_rfc3339();
        Ok((path.to_string(), start))
    }

    pub async fn cleanup_old_recordings(&self, max_age: Duration, max_count: usize, token: &CancellationToken) -> Result<usize> {
        let recordings = self.list_recordings(10_000, 0, token).await?;
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let mut sorted = recordings;
        sorted.sort_by_key(|r| r.start_time);

        let mut deleted = 0;
        let keep_from = sorted.len().saturating_sub(max_count);
        for (idx, r) in sorted.iter().enumerate() {
            if r.start_time < cutoff || idx < keep_from {
                if self.delete_recording(&r.filename, token).await.is_ok() {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}

/// Percent-encodes query-string values (RFC3339 timestamps carry `:` and
/// `+`, which `reqwest` will not encode for us in a hand-built path+query).
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    fn test_config(base_url: String) -> MediaServerConfig {
        MediaServerConfig {
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
        }
    }

    async fn manager(server: &MockServer) -> RecordingManager {
        let config = test_config(server.uri());
        let client = MediaServerClient::new(&config).unwrap();
        let camera_monitor = Arc::new(crate::camera_monitor::DeviceNodeMonitor::new());
        let path_manager = Arc::new(PathManager::new(client.clone(), &config, camera_monitor));
        RecordingManager::new(client, path_manager, &config, RecordingDefaults::default())
    }

    #[tokio::test]
    async fn start_recording_rejects_unknown_device_shape() {
        let server = MockServer::start().await;
        let mgr = manager(&server).await;
        let result = mgr.start_recording("not-a-camera", RecordingOptions::default(), &token()).await;
        assert!(matches!(result, Err(ControllerError::Context { .. })));
    }

    #[tokio::test]
    async fn stop_recording_fails_when_not_recording() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/config/paths/get/camera0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"record": false})))
            .mount(&server)
            .await;

        let mgr = manager(&server).await;
        let result = mgr.stop_recording("camera0", &token()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn is_recording_reflects_timer_presence() {
        let server = MockServer::start().await;
        let mgr = manager(&server).await;
        assert!(!mgr.is_recording("camera0"));
    }

    #[test]
    fn delete_recording_rejects_path_traversal() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let server = MockServer::start().await;
            let mgr = manager(&server).await;
            let result = mgr.delete_recording("../etc/passwd", &token()).await;
            assert!(result.is_err());
        });
    }

    #[tokio::test]
    async fn delete_recording_parses_filename_and_calls_deletesegment() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v3/recordings/deletesegment"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mgr = manager(&server).await;
        let result = mgr.delete_recording("camera0_20260101T000000Z.fmp4", &token()).await;
        assert!(result.is_ok());
    }

    #[test]
    fn parse_recording_filename_recovers_path_and_rfc3339_start() {
        let (path, start) = RecordingManager::parse_recording_filename("camera0_20260101T000000Z.fmp4").unwrap();
        assert_eq!(path, "camera0");
        assert_eq!(start, "2026-01-01T00:00:00+00:00");
    }
}
