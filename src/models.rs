//! Shared data-model types (spec.md §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{CameraId, DevicePath, PathName};

/// Sum type for the three on-demand path profiles (spec.md §3, `UseCase` table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseCase {
    Recording,
    Viewing,
    Snapshot,
}

impl UseCase {
    pub fn close_after_secs(self) -> u64 {
        match self {
            UseCase::Recording => 0,
            UseCase::Viewing => 300,
            UseCase::Snapshot => 60,
        }
    }

    pub fn restart(self) -> bool {
        match self {
            UseCase::Recording | UseCase::Viewing => true,
            UseCase::Snapshot => false,
        }
    }

    pub fn start_timeout_secs(self) -> u64 {
        match self {
            UseCase::Recording | UseCase::Viewing => 10,
            UseCase::Snapshot => 5,
        }
    }

    pub fn name_suffix(self) -> &'static str {
        match self {
            UseCase::Recording => "",
            UseCase::Viewing => "_viewing",
            UseCase::Snapshot => "_snapshot",
        }
    }

    /// Build the path name for `camera_id` under this use case.
    pub fn path_name(self, camera_id: &str) -> PathName {
        format!("{camera_id}{}", self.name_suffix())
    }
}

/// Configuration payload sent to the media server for a path
/// (spec.md §3, `PathConf`). All fields optional on the wire; only the ones
/// set are marshalled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathConf {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "sourceOnDemand", skip_serializing_if = "Option::is_none")]
    pub source_on_demand: Option<bool>,
    #[serde(rename = "sourceOnDemandStartTimeout", skip_serializing_if = "Option::is_none")]
    pub source_on_demand_start_timeout: Option<String>,
    #[serde(rename = "sourceOnDemandCloseAfter", skip_serializing_if = "Option::is_none")]
    pub source_on_demand_close_after: Option<String>,
    #[serde(rename = "runOnDemand", skip_serializing_if = "Option::is_none")]
    pub run_on_demand: Option<String>,
    #[serde(rename = "runOnDemandRestart", skip_serializing_if = "Option::is_none")]
    pub run_on_demand_restart: Option<bool>,
    #[serde(rename = "runOnDemandStartTimeout", skip_serializing_if = "Option::is_none")]
    pub run_on_demand_start_timeout: Option<String>,
    #[serde(rename = "runOnDemandCloseAfter", skip_serializing_if = "Option::is_none")]
    pub run_on_demand_close_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<bool>,
    #[serde(rename = "recordPath", skip_serializing_if = "Option::is_none")]
    pub record_path: Option<String>,
    #[serde(rename = "recordFormat", skip_serializing_if = "Option::is_none")]
    pub record_format: Option<String>,
    #[serde(rename = "recordSegmentDuration", skip_serializing_if = "Option::is_none")]
    pub record_segment_duration: Option<String>,
    #[serde(rename = "recordPartDuration", skip_serializing_if = "Option::is_none")]
    pub record_part_duration: Option<String>,
    #[serde(rename = "recordMaxPartSize", skip_serializing_if = "Option::is_none")]
    pub record_max_part_size: Option<u64>,
    #[serde(rename = "recordDeleteAfter", skip_serializing_if = "Option::is_none")]
    pub record_delete_after: Option<String>,
    #[serde(rename = "publishUser", skip_serializing_if = "Option::is_none")]
    pub publish_user: Option<String>,
    #[serde(rename = "publishPass", skip_serializing_if = "Option::is_none")]
    pub publish_pass: Option<String>,
    #[serde(rename = "readUser", skip_serializing_if = "Option::is_none")]
    pub read_user: Option<String>,
    #[serde(rename = "readPass", skip_serializing_if = "Option::is_none")]
    pub read_pass: Option<String>,
}

impl PathConf {
    /// Merge `patch` on top of `self`, `patch`'s `Some` values winning.
    /// Used by `StartRecording` to merge caller options over the defaults
    /// (spec.md §4.4, step 4).
    pub fn merge(mut self, patch: PathConf) -> PathConf {
        macro_rules! take {
            ($field:ident) => {
                if patch.$field.is_some() {
                    self.$field = patch.$field;
                }
            };
        }
        take!(source);
        take!(source_on_demand);
        take!(source_on_demand_start_timeout);
        take!(source_on_demand_close_after);
        take!(run_on_demand);
        take!(run_on_demand_restart);
        take!(run_on_demand_start_timeout);
        take!(run_on_demand_close_after);
        take!(record);
        take!(record_path);
        take!(record_format);
        take!(record_segment_duration);
        take!(record_part_duration);
        take!(record_max_part_size);
        take!(record_delete_after);
        take!(publish_user);
        take!(publish_pass);
        take!(read_user);
        take!(read_pass);
        self
    }
}

/// Descriptor returned for a path read back from the media server
/// (spec.md §3, `Path`).
#[derive(Debug, Clone, Deserialize)]
pub struct PathDescriptor {
    pub name: PathName,
    #[serde(default)]
    pub source: Option<PathSource>,
    #[serde(default)]
    pub ready: bool,
    #[serde(rename = "confName", default)]
    pub conf_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathSource {
    #[serde(rename = "type", default)]
    pub source_type: Option<String>,
}

/// `GET /v3/paths/list` / `/v3/config/paths/list` envelope
/// (spec.md §6, "Required list fields").
#[derive(Debug, Clone, Deserialize)]
pub struct PathList {
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub item_count: u32,
    pub items: Vec<PathDescriptor>,
}

/// Client-facing recording response (spec.md §6).
#[derive(Debug, Clone, Serialize)]
pub struct RecordingStatus {
    pub device: CameraId,
    pub filename: String,
    pub status: RecordingState,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordingState {
    Recording,
    Stopped,
    Failed,
}

/// Client-facing snapshot response (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub device: CameraId,
    pub filename: String,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub tier_used: u8,
    pub status: SnapshotStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SnapshotStatus {
    Success,
    Failed,
}

/// Options accepted by `TakeAdvancedSnapshot` (spec.md §4.5).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotOptions {
    pub format: Option<String>,
    pub quality: Option<u8>,
}

/// Options accepted by `StartRecording` (spec.md §4.4). A bag of PathConf
/// overrides, plus the convenience `record_delete_after` used to arm the
/// auto-stop timer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingOptions {
    pub record_format: Option<String>,
    pub record_delete_after_secs: Option<u64>,
    pub record_part_duration_secs: Option<u64>,
    pub record_max_part_size: Option<u64>,
}

/// Per-component severity used in [`ErrorContext`] (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Context passed to the recovery manager (spec.md §3, `ErrorContext`).
/// Immutable after construction.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub camera_id: Option<CameraId>,
    pub path_name: Option<PathName>,
    pub filename: Option<String>,
    pub severity: Severity,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: &str, operation: &str, severity: Severity, recoverable: bool) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            camera_id: None,
            path_name: None,
            filename: None,
            severity,
            recoverable,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_camera(mut self, camera_id: impl Into<CameraId>) -> Self {
        self.camera_id = Some(camera_id.into());
        self
    }

    pub fn with_path(mut self, path_name: impl Into<PathName>) -> Self {
        self.path_name = Some(path_name.into());
        self
    }
}

/// Aggregate system events surfaced via the notifier slot
/// (spec.md §4.1, `SetSystemEventNotifier`). Not named as a concrete type
/// in spec.md, but the operation it drives is — modeled on the severity
/// classes already present in [`ErrorContext`].
#[derive(Debug, Clone)]
pub enum SystemEvent {
    StorageLow { available_bytes: u64, threshold_bytes: u64 },
    CpuHigh { percent: f64, threshold_percent: f64 },
    ComponentDegraded { component: String, reason: String },
}

/// Trait object installed via `Controller::set_system_event_notifier`.
pub trait SystemEventNotifier: Send + Sync {
    fn notify(&self, event: SystemEvent);
}

pub type DeviceOrCameraId = (DevicePath, CameraId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_case_table_matches_spec() {
        assert_eq!(UseCase::Recording.close_after_secs(), 0);
        assert!(UseCase::Recording.restart());
        assert_eq!(UseCase::Recording.start_timeout_secs(), 10);
        assert_eq!(UseCase::Recording.name_suffix(), "");

        assert_eq!(UseCase::Viewing.close_after_secs(), 300);
        assert!(UseCase::Viewing.restart());
        assert_eq!(UseCase::Viewing.name_suffix(), "_viewing");

        assert_eq!(UseCase::Snapshot.close_after_secs(), 60);
        assert!(!UseCase::Snapshot.restart());
        assert_eq!(UseCase::Snapshot.start_timeout_secs(), 5);
        assert_eq!(UseCase::Snapshot.name_suffix(), "_snapshot");
    }

    #[test]
    fn path_conf_merge_prefers_patch() {
        let base = PathConf { record: Some(false), record_format: Some("fmp4".into()), ..Default::default() };
        let patch = PathConf { record: Some(true), ..Default::default() };
        let merged = base.merge(patch);
        assert_eq!(merged.record, Some(true));
        assert_eq!(merged.record_format, Some("fmp4".into()));
    }
}
