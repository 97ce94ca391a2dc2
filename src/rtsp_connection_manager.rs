//! RTSPConnectionManager (spec.md §4.7) — paginated read-only views of
//! media-server RTSP connections/sessions, plus derived metrics cached with
//! a short TTL.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ControllerError, Result};
use crate::http_client::MediaServerClient;

const METRICS_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RtspConnection {
    pub id: String,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RtspSession {
    pub id: String,
    #[serde(default)]
    pub rtp_packets_sent: u64,
    #[serde(default)]
    pub rtp_packets_lost: u64,
    #[serde(default)]
    pub jitter_ms: f64,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default, rename = "pageCount")]
    page_count: u32,
    #[serde(default, rename = "itemCount")]
    item_count: u32,
    items: Vec<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub healthy: bool,
    pub unhealthy: bool,
    pub overloaded: bool,
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_rtp_packets: u64,
    pub average_jitter_ms: f64,
    pub packet_loss_ratio: f64,
}

struct MetricsCache {
    computed_at: Instant,
    metrics: ConnectionMetrics,
}

pub struct RtspConnectionManager {
    client: MediaServerClient,
    monitoring_enabled: bool,
    max_connections: usize,
    metrics_cache: RwLock<Option<MetricsCache>>,
}

impl RtspConnectionManager {
    pub fn new(client: MediaServerClient, monitoring_enabled: bool, max_connections: usize) -> Self {
        Self { client, monitoring_enabled, max_connections, metrics_cache: RwLock::new(None) }
    }

    fn validate_pagination(page: i64, items_per_page: i64) -> Result<()> {
        if page < 0 {
            return Err(ControllerError::Validation { field: "page".to_string(), reason: "must be >= 0".to_string() });
        }
        if !(1..=1000).contains(&items_per_page) {
            return Err(ControllerError::Validation {
                field: "itemsPerPage".to_string(),
                reason: "must be in 1..=1000".to_string(),
            });
        }
        Ok(())
    }

    pub async fn list_connections(&self, page: i64, items_per_page: i64, token: &CancellationToken) -> Result<Vec<RtspConnection>> {
        Self::validate_pagination(page, items_per_page).map_err(|e| e.with_context("RTSPConnectionManager", "ListConnections"))?;
        let path = format!("/v3/rtspconns/list?page={page}&itemsPerPage={items_per_page}");
        let list: ListEnvelope<RtspConnection> =
            self.client.get_json(&path, token).await.map_err(|e| e.with_context("RTSPConnectionManager", "ListConnections"))?;
        let _ = (list.page_count, list.item_count);
        Ok(list.items)
    }

    pub async fn list_sessions(&self, page: i64, items_per_page: i64, token: &CancellationToken) -> Result<Vec<RtspSession>> {
        Self::validate_pagination(page, items_per_page).map_err(|e| e.with_context("RTSPConnectionManager", "ListSessions"))?;
        let path = format!("/v3/rtspsessions/list?page={page}&itemsPerPage={items_per_page}");
        let list: ListEnvelope<RtspSession> =
            self.client.get_json(&path, token).await.map_err(|e| e.with_context("RTSPConnectionManager", "ListSessions"))?;
        Ok(list.items)
    }

    pub async fn get_connection(&self, id: &str, token: &CancellationToken) -> Result<RtspConnection> {
        self.client
            .get_json(&format!("/v3/rtspconns/get/{id}"), token)
            .await
            .map_err(|e| e.with_context("RTSPConnectionManager", "GetConnection"))
    }

    pub async fn get_session(&self, id: &str, token: &CancellationToken) -> Result<RtspSession> {
        self.client
            .get_json(&format!("/v3/rtspsessions/get/{id}"), token)
            .await
            .map_err(|e| e.with_context("RTSPConnectionManager", "GetSession"))
    }

    pub async fn kick_session(&self, id: &str, token: &CancellationToken) -> Result<()> {
        self.client
            .post(&format!("/v3/rtspsessions/kick/{id}"), &serde_json::json!({}), token)
            .await
            .map_err(|e| e.with_context("RTSPConnectionManager", "KickSession"))
    }

    pub async fn get_connection_health(&self, token: &CancellationToken) -> ConnectionHealth {
        if !self.monitoring_enabled {
            return ConnectionHealth { healthy: false, unhealthy: false, overloaded: false, disabled: true };
        }
        match self.list_connections(0, 1000, token).await {
            Ok(connections) => {
                let overloaded = connections.len() >= self.max_connections;
                ConnectionHealth { healthy: !overloaded, unhealthy: false, overloaded, disabled: false }
            }
            Err(_) => ConnectionHealth { healthy: false, unhealthy: true, overloaded: false, disabled: false },
        }
    }

    /// Rebuilt at most once per 5 seconds (spec.md §4.7, §5 TTL cache).
    pub async fn get_connection_metrics(&self, token: &CancellationToken) -> Result<ConnectionMetrics> {
        if let Some(cached) = self.metrics_cache.read().as_ref() {
            if cached.computed_at.elapsed() < METRICS_TTL {
                return Ok(cached.metrics.clone());
            }
        }

        let mut cache = self.metrics_cache.write();
        if let Some(cached) = cache.as_ref() {
            if cached.computed_at.elapsed() < METRICS_TTL {
                return Ok(cached.metrics.clone());
            }
        }

        let connections =
            self.list_connections(0, 1000, token).await.map_err(|e| e.with_context("RTSPConnectionManager", "GetConnectionMetrics"))?;
        let sessions =
            self.list_sessions(0, 1000, token).await.map_err(|e| e.with_context("RTSPConnectionManager", "GetConnectionMetrics"))?;

        let total_bytes_sent = connections.iter().map(|c| c.bytes_sent).sum();
        let total_bytes_received = connections.iter().map(|c| c.bytes_received).sum();
        let total_rtp_packets = sessions.iter().map(|s| s.rtp_packets_sent).sum();
        let total_lost: u64 = sessions.iter().map(|s| s.rtp_packets_lost).sum();
        let average_jitter_ms = if sessions.is_empty() {
            0.0
        } else {
            sessions.iter().map(|s| s.jitter_ms).sum::<f64>() / sessions.len() as f64
        };
        let packet_loss_ratio = if total_rtp_packets == 0 {
            0.0
        } else {
            total_lost as f64 / (total_rtp_packets + total_lost) as f64
        };

        let metrics = ConnectionMetrics { total_bytes_sent, total_bytes_received, total_rtp_packets, average_jitter_ms, packet_loss_ratio };
        *cache = Some(MetricsCache { computed_at: Instant::now(), metrics: metrics.clone() });
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_boundaries_match_spec() {
        assert!(RtspConnectionManager::validate_pagination(-1, 10).is_err());
        assert!(RtspConnectionManager::validate_pagination(0, 0).is_err());
        assert!(RtspConnectionManager::validate_pagination(0, 1001).is_err());
        assert!(RtspConnectionManager::validate_pagination(0, 1000).is_ok());
        assert!(RtspConnectionManager::validate_pagination(0, 1).is_ok());
    }
}
