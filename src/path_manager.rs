//! PathManager (spec.md §4.2): media-server path CRUD, validation, and
//! camera↔path bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::camera_monitor::CameraMonitor;
use crate::config::MediaServerConfig;
use crate::error::{ControllerError, Result};
use crate::http_client::MediaServerClient;
use crate::identity::{camera_id_from_device, device_from_camera_id, CameraId, DevicePath, PathName};
use crate::models::{PathConf, PathDescriptor, PathList, UseCase};

const RESERVED_NAMES: [&str; 3] = ["all", "~all", "~internal"];
const MAX_NAME_LEN: usize = 64;

/// Options accepted by `CreatePath` (spec.md §4.2). `use_case` drives the
/// `restart`/`closeAfter`/`startTimeout` triple of the `UseCase` table
/// (spec.md §3) when `run_on_demand` is set; `None` falls back to the
/// conservative recording-profile defaults.
#[derive(Debug, Clone, Default)]
pub struct CreatePathOptions {
    pub run_on_demand: Option<String>,
    pub use_case: Option<UseCase>,
}

pub struct PathManager {
    client: MediaServerClient,
    host: String,
    camera_monitor: Arc<dyn CameraMonitor>,
    /// camera_id -> path_name, populated as paths are created through this manager.
    camera_to_path: RwLock<HashMap<CameraId, PathName>>,
    rtsp_port: u16,
    webrtc_port: u16,
    hls_port: u16,
}

impl PathManager {
    pub fn new(
        client: MediaServerClient,
        config: &MediaServerConfig,
        camera_monitor: Arc<dyn CameraMonitor>,
    ) -> Self {
        Self {
            client,
            host: config.host.clone(),
            camera_monitor,
            camera_to_path: RwLock::new(HashMap::new()),
            rtsp_port: config.rtsp_port,
            webrtc_port: config.webrtc_port,
            hls_port: config.hls_port,
        }
    }

    /// Name validation (spec.md §3, §4.2, §8 boundary behaviours).
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(ControllerError::Validation {
                field: "name".to_string(),
                reason: format!("length must be in 1..={MAX_NAME_LEN}"),
            });
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(ControllerError::Validation {
                field: "name".to_string(),
                reason: "must match ^[A-Za-z0-9_-]{1,64}$".to_string(),
            });
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(ControllerError::Validation {
                field: "name".to_string(),
                reason: format!("'{name}' is a reserved name"),
            });
        }
        Ok(())
    }

    /// Source validation (spec.md §4.2, §8 boundary behaviours).
    pub fn validate_source(source: &str, run_on_demand_set: bool) -> Result<()> {
        if source.is_empty() {
            if run_on_demand_set {
                return Ok(());
            }
            return Err(ControllerError::Validation {
                field: "source".to_string(),
                reason: "must be non-empty unless runOnDemand is set".to_string(),
            });
        }

        const DENY_CHARS: [char; 8] = ['<', '>', '|', '&', ';', '`', '$', '\\'];
        if source.contains("..") || source.chars().any(|c| DENY_CHARS.contains(&c)) {
            return Err(ControllerError::Validation {
                field: "source".to_string(),
                reason: "contains a disallowed character or path-traversal sequence".to_string(),
            });
        }

        let recognised_scheme = source.starts_with("/dev/")
            || source.starts_with("rtsp://")
            || source.starts_with("rtmp://")
            || source.starts_with("http://")
            || source.starts_with("https://");

        if source.contains("//") && !recognised_scheme {
            return Err(ControllerError::Validation {
                field: "source".to_string(),
                reason: "'//' is only allowed within a recognised URL scheme".to_string(),
            });
        }

        if !recognised_scheme && source.len() < 3 {
            return Err(ControllerError::Validation {
                field: "source".to_string(),
                reason: "generic source tokens must be at least 3 characters".to_string(),
            });
        }

        Ok(())
    }

    /// Create a path. Idempotent: "already exists" is absorbed as success
    /// (spec.md §4.2, §6).
    pub async fn create_path(
        &self,
        name: &str,
        source: &str,
        options: CreatePathOptions,
        token: &CancellationToken,
    ) -> Result<()> {
        Self::validate_name(name).map_err(|e| e.with_context("PathManager", "CreatePath"))?;
        Self::validate_source(source, options.run_on_demand.is_some())
            .map_err(|e| e.with_context("PathManager", "CreatePath"))?;

        let conf = if let Some(run_on_demand) = options.run_on_demand {
            let use_case = options.use_case.unwrap_or(UseCase::Recording);
            let close_after = use_case.close_after_secs();
            PathConf {
                run_on_demand: Some(run_on_demand),
                run_on_demand_restart: Some(use_case.restart()),
                run_on_demand_start_timeout: Some(format!("{}s", use_case.start_timeout_secs())),
                run_on_demand_close_after: (close_after > 0).then(|| format!("{close_after}s")),
                ..Default::default()
            }
        } else {
            PathConf { source: Some(source.to_string()), ..Default::default() }
        };

        self.client
            .post_idempotent(&format!("/v3/config/paths/add/{name}"), &conf, token)
            .await
            .map_err(|e| e.with_context("PathManager", "CreatePath"))?;

        info!(path = name, "path created (or already existed)");
        Ok(())
    }

    pub async fn delete_path(&self, name: &str, token: &CancellationToken) -> Result<()> {
        self.client
            .delete_idempotent(&format!("/v3/config/paths/delete/{name}"), token)
            .await
            .map_err(|e| e.with_context("PathManager", "DeletePath"))?;
        self.camera_to_path.write().retain(|_, v| v != name);
        Ok(())
    }

    pub async fn get_path(&self, name: &str, token: &CancellationToken) -> Result<PathDescriptor> {
        self.client
            .get_json(&format!("/v3/paths/get/{name}"), token)
            .await
            .map_err(|e| e.with_context("PathManager", "GetPath"))
    }

    pub async fn list_paths(&self, token: &CancellationToken) -> Result<Vec<PathDescriptor>> {
        let list: PathList = self
            .client
            .get_json("/v3/paths/list", token)
            .await
            .map_err(|e| e.with_context("PathManager", "ListPaths"))?;
        Ok(list.items)
    }

    /// Configuration-level existence, not runtime activity (spec.md §4.2).
    pub async fn path_exists(&self, name: &str, token: &CancellationToken) -> Result<bool> {
        let found: Option<PathDescriptor> = self
            .client
            .get_json_optional(&format!("/v3/config/paths/get/{name}"), token)
            .await
            .map_err(|e| e.with_context("PathManager", "PathExists"))?;
        Ok(found.is_some())
    }

    pub async fn validate_path(&self, name: &str, token: &CancellationToken) -> Result<PathDescriptor> {
        self.get_path(name, token).await.map_err(|e| e.with_context("PathManager", "ValidatePath"))
    }

    pub fn record_camera_path(&self, camera_id: &str, path_name: &str) {
        self.camera_to_path.write().insert(camera_id.to_string(), path_name.to_string());
    }

    pub fn get_path_for_camera(&self, camera_id: &str) -> Option<PathName> {
        self.camera_to_path.read().get(camera_id).cloned()
    }

    pub fn get_camera_for_path(&self, path_name: &str) -> Option<CameraId> {
        self.camera_to_path
            .read()
            .iter()
            .find(|(_, v)| v.as_str() == path_name)
            .map(|(k, _)| k.clone())
    }

    pub fn get_device_path_for_camera(&self, camera_id: &str) -> DevicePath {
        device_from_camera_id(camera_id)
    }

    pub fn get_camera_for_device_path(&self, device_path: &str) -> CameraId {
        camera_id_from_device(device_path)
    }

    /// Client-facing camera list, built from the external camera monitor
    /// (spec.md §4.2).
    pub async fn get_camera_list(&self) -> Vec<CameraListEntry> {
        self.camera_monitor
            .get_connected_cameras()
            .await
            .into_iter()
            .map(|device| {
                let camera_id = camera_id_from_device(&device.path);
                CameraListEntry {
                    stream_url: format!("rtsp://{}:{}/{}", self.host, self.rtsp_port, camera_id),
                    webrtc_url: format!("http://{}:{}/{}/whep", self.host, self.webrtc_port, camera_id),
                    hls_url: format!("http://{}:{}/{}/index.m3u8", self.host, self.hls_port, camera_id),
                    camera_id,
                    device,
                }
            })
            .collect()
    }

    pub async fn get_camera_status(&self, camera_id: &str) -> Result<CameraListEntry> {
        let device_path = device_from_camera_id(camera_id);
        let device = self
            .camera_monitor
            .get_device(&device_path)
            .await
            .ok_or(ControllerError::CameraNotFound)?;
        Ok(CameraListEntry {
            stream_url: format!("rtsp://{}:{}/{}", self.host, self.rtsp_port, camera_id),
            webrtc_url: format!("http://{}:{}/{}/whep", self.host, self.webrtc_port, camera_id),
            hls_url: format!("http://{}:{}/{}/index.m3u8", self.host, self.hls_port, camera_id),
            camera_id: camera_id.to_string(),
            device,
        })
    }

    pub async fn validate_camera_device(&self, camera_id: &str) -> Result<()> {
        self.get_camera_status(camera_id).await.map(|_| ())
    }
}

#[derive(Debug, Clone)]
pub struct CameraListEntry {
    pub camera_id: CameraId,
    pub device: crate::camera_monitor::CameraDevice,
    pub stream_url: String,
    pub webrtc_url: String,
    pub hls_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_matches_spec_boundaries() {
        for bad in ["all", "~all", "~internal", "", "with space"] {
            assert!(PathManager::validate_name(bad).is_err(), "{bad} should be rejected");
        }
        let too_long = "a".repeat(65);
        assert!(PathManager::validate_name(&too_long).is_err());
        assert!(PathManager::validate_name("camera0").is_ok());
        assert!(PathManager::validate_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn source_validation_rejects_dangerous_tokens() {
        for bad in ["../etc/passwd", "a&b", "a|b", "a;b", "a`b", "a$b", "a<b", "a>b", "a\\b"] {
            assert!(PathManager::validate_source(bad, false).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn source_validation_allows_recognised_schemes() {
        assert!(PathManager::validate_source("rtsp://host/stream", false).is_ok());
        assert!(PathManager::validate_source("/dev/video0", false).is_ok());
        assert!(PathManager::validate_source("http://host/x//y", false).is_ok());
    }

    #[test]
    fn source_validation_requires_runondemand_when_empty() {
        assert!(PathManager::validate_source("", false).is_err());
        assert!(PathManager::validate_source("", true).is_ok());
    }

    #[test]
    fn source_validation_rejects_bare_double_slash() {
        assert!(PathManager::validate_source("foo//bar", false).is_err());
    }
}
