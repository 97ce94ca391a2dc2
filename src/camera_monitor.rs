//! External camera-hardware monitor (spec.md §1, §6 — "deliberately out of
//! scope", reached "through narrow interfaces only").
//!
//! The discovery/monitoring daemon itself is someone else's component; this
//! module only defines the narrow trait the Controller drives it through,
//! plus one production implementation that scans `/dev/video*` nodes
//! directly (sufficient when no separate monitor process is wired in).

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::identity::DevicePath;

#[derive(Debug, Clone, Serialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rates: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraDevice {
    pub path: DevicePath,
    pub status: DeviceStatus,
    pub name: String,
    pub formats: Vec<VideoFormat>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
}

#[async_trait]
pub trait CameraMonitor: Send + Sync {
    async fn get_connected_cameras(&self) -> Vec<CameraDevice>;
    async fn get_device(&self, device_path: &str) -> Option<CameraDevice>;
}

/// Scans `/dev/video*` nodes directly. Formats/capabilities are left empty
/// since querying them requires a v4l2 ioctl layer outside this crate's
/// scope (spec.md §1, camera-hardware discovery is an external collaborator).
pub struct DeviceNodeMonitor {
    scan_root: String,
}

impl DeviceNodeMonitor {
    pub fn new() -> Self {
        Self { scan_root: "/dev".to_string() }
    }

    #[cfg(test)]
    pub fn with_scan_root(scan_root: impl Into<String>) -> Self {
        Self { scan_root: scan_root.into() }
    }

    fn scan(&self) -> Vec<CameraDevice> {
        let dir = Path::new(&self.scan_root);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("video") {
                let path = entry.path().to_string_lossy().to_string();
                devices.push(CameraDevice {
                    path,
                    status: DeviceStatus::Connected,
                    name: name.to_string(),
                    formats: Vec::new(),
                    capabilities: Vec::new(),
                });
            }
        }
        devices.sort_by(|a, b| a.path.cmp(&b.path));
        devices
    }
}

impl Default for DeviceNodeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraMonitor for DeviceNodeMonitor {
    async fn get_connected_cameras(&self) -> Vec<CameraDevice> {
        self.scan()
    }

    async fn get_device(&self, device_path: &str) -> Option<CameraDevice> {
        self.scan().into_iter().find(|d| d.path == device_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scans_video_nodes_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("video0")).unwrap();
        std::fs::File::create(dir.path().join("video10")).unwrap();
        std::fs::File::create(dir.path().join("custom0")).unwrap();

        let monitor = DeviceNodeMonitor::with_scan_root(dir.path().to_string_lossy().to_string());
        let devices = monitor.get_connected_cameras().await;
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.path.contains("video")));
    }

    #[tokio::test]
    async fn get_device_returns_none_for_unknown_path() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = DeviceNodeMonitor::with_scan_root(dir.path().to_string_lossy().to_string());
        assert!(monitor.get_device("/dev/video0").await.is_none());
    }
}
