//! Configuration (spec.md §6, "Configuration (recognised keys)").
//!
//! Loaded from a TOML file via [`Config::from_file`], following the
//! teacher crate's `Config`/`validate` shape.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ControllerError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub media_server: MediaServerConfig,
    #[serde(default)]
    pub recording_defaults: RecordingDefaults,
    #[serde(default)]
    pub snapshot_defaults: SnapshotDefaults,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaServerConfig {
    /// Base URL of the media server's HTTP control API, e.g. `http://127.0.0.1:9997`.
    pub base_url: String,
    #[serde(default = "default_health_check_url")]
    pub health_check_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,
    #[serde(default = "default_health_failure_threshold")]
    pub health_failure_threshold: u32,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    #[serde(default = "default_webrtc_port")]
    pub webrtc_port: u16,
    #[serde(default = "default_hls_port")]
    pub hls_port: u16,
    #[serde(default = "default_recordings_path")]
    pub recordings_path: String,
    #[serde(default)]
    pub rtsp_monitoring: RtspMonitoringConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,
    #[serde(default = "default_max_idle_conns_per_host")]
    pub max_idle_conns_per_host: usize,
    #[serde(default = "default_idle_conn_timeout_secs")]
    pub idle_conn_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_conns: default_max_idle_conns(),
            max_idle_conns_per_host: default_max_idle_conns_per_host(),
            idle_conn_timeout_secs: default_idle_conn_timeout_secs(),
        }
    }
}

impl ConnectionPoolConfig {
    pub fn idle_conn_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_conn_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RtspMonitoringConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub bandwidth_threshold: Option<u64>,
    #[serde(default)]
    pub packet_loss_threshold: Option<f64>,
    #[serde(default)]
    pub jitter_threshold: Option<f64>,
}

impl Default for RtspMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_connections: default_max_connections(),
            bandwidth_threshold: None,
            packet_loss_threshold: None,
            jitter_threshold: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordingDefaults {
    #[serde(default = "default_record_format")]
    pub format: String,
    #[serde(default = "default_part_duration_secs")]
    pub part_duration_secs: u64,
    #[serde(default = "default_max_part_size_bytes")]
    pub max_part_size_bytes: u64,
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u64,
    /// 0 = never auto-delete.
    #[serde(default)]
    pub delete_after_secs: u64,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            format: default_record_format(),
            part_duration_secs: default_part_duration_secs(),
            max_part_size_bytes: default_max_part_size_bytes(),
            segment_duration_secs: default_segment_duration_secs(),
            delete_after_secs: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotDefaults {
    #[serde(default = "default_snapshot_quality")]
    pub quality: u8,
    #[serde(default = "default_snapshot_format")]
    pub format: String,
    #[serde(default = "default_retention_count")]
    pub retention_count: usize,
    /// Directory snapshots are written under (spec.md §6, on-disk layout).
    #[serde(default = "default_snapshots_dir")]
    pub snapshots_dir: String,
}

impl Default for SnapshotDefaults {
    fn default() -> Self {
        Self {
            quality: default_snapshot_quality(),
            format: default_snapshot_format(),
            retention_count: default_retention_count(),
            snapshots_dir: default_snapshots_dir(),
        }
    }
}

fn default_health_check_url() -> String { "/v3/paths/list".to_string() }
fn default_timeout_secs() -> u64 { 10 }
fn default_health_check_interval_secs() -> u64 { 30 }
fn default_health_check_timeout_secs() -> u64 { 5 }
fn default_health_failure_threshold() -> u32 { 3 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_rtsp_port() -> u16 { 8554 }
fn default_webrtc_port() -> u16 { 8889 }
fn default_hls_port() -> u16 { 8888 }
fn default_recordings_path() -> String { "./recordings".to_string() }
fn default_max_idle_conns() -> usize { 100 }
fn default_max_idle_conns_per_host() -> usize { 10 }
fn default_idle_conn_timeout_secs() -> u64 { 90 }
fn default_max_connections() -> usize { 100 }
fn default_record_format() -> String { "fmp4".to_string() }
fn default_part_duration_secs() -> u64 { 10 }
fn default_max_part_size_bytes() -> u64 { 100 * 1024 * 1024 }
fn default_segment_duration_secs() -> u64 { 3600 }
fn default_snapshot_quality() -> u8 { 85 }
fn default_snapshot_format() -> String { "jpg".to_string() }
fn default_retention_count() -> usize { 500 }
fn default_snapshots_dir() -> String { "./snapshots".to_string() }

impl MediaServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn rtsp_url(&self, path_name: &str) -> String {
        format!("rtsp://{}:{}/{}", self.host, self.rtsp_port, path_name)
    }
}

impl RecordingDefaults {
    pub fn part_duration(&self) -> Duration {
        Duration::from_secs(self.part_duration_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ControllerError::Io)?;
        let config: Config = toml::from_str(&content).map_err(|e| ControllerError::Validation {
            field: "config".to_string(),
            reason: format!("invalid TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.media_server.base_url.is_empty() {
            return Err(ControllerError::Validation {
                field: "media_server.base_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.media_server.health_failure_threshold == 0 {
            return Err(ControllerError::Validation {
                field: "media_server.health_failure_threshold".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.snapshot_defaults.quality == 0 || self.snapshot_defaults.quality > 100 {
            return Err(ControllerError::Validation {
                field: "snapshot_defaults.quality".to_string(),
                reason: "must be in 1..=100".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(base_url: &str) -> Config {
        Config {
            media_server: MediaServerConfig {
                base_url: base_url.to_string(),
                health_check_url: default_health_check_url(),
                timeout_secs: default_timeout_secs(),
                health_check_interval_secs: default_health_check_interval_secs(),
                health_check_timeout_secs: default_health_check_timeout_secs(),
                health_failure_threshold: default_health_failure_threshold(),
                connection_pool: ConnectionPoolConfig::default(),
                host: default_host(),
                rtsp_port: default_rtsp_port(),
                webrtc_port: default_webrtc_port(),
                hls_port: default_hls_port(),
                recordings_path: default_recordings_path(),
                rtsp_monitoring: RtspMonitoringConfig::default(),
            },
            recording_defaults: RecordingDefaults::default(),
            snapshot_defaults: SnapshotDefaults::default(),
        }
    }

    #[test]
    fn rejects_empty_base_url() {
        assert!(base_config("").validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(base_config("http://127.0.0.1:9997").validate().is_ok());
    }
}
