//! HealthMonitor (spec.md §4.6) — background liveness probing with a
//! circuit breaker.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MediaServerConfig;
use crate::http_client::MediaServerClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
}

struct Inner {
    is_healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    last_check: RwLock<DateTime<Utc>>,
    circuit: RwLock<CircuitState>,
}

pub struct HealthMonitor {
    client: MediaServerClient,
    health_check_url: String,
    interval: Duration,
    probe_timeout: Duration,
    failure_threshold: u32,
    enabled: bool,
    inner: Arc<Inner>,
    stop: Arc<Notify>,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(client: MediaServerClient, config: &MediaServerConfig, enabled: bool) -> Self {
        Self {
            client,
            health_check_url: config.health_check_url.clone(),
            interval: config.health_check_interval(),
            probe_timeout: config.health_check_timeout(),
            failure_threshold: config.health_failure_threshold,
            enabled,
            inner: Arc::new(Inner {
                is_healthy: AtomicBool::new(true),
                consecutive_failures: AtomicU32::new(0),
                last_check: RwLock::new(Utc::now()),
                circuit: RwLock::new(CircuitState::Closed),
            }),
            stop: Arc::new(Notify::new()),
            task: RwLock::new(None),
        }
    }

    /// Starts the probe loop (spec.md §4.6). No-op if monitoring is disabled
    /// in configuration. Cancelling `token` stops the loop immediately,
    /// same as calling `stop` (spec.md §5, §8 scenario 5).
    pub fn start(&self, token: CancellationToken) {
        if !self.enabled {
            info!("health monitoring disabled by configuration");
            return;
        }

        let client = self.client.clone();
        let url = self.health_check_url.clone();
        let interval = self.interval;
        let probe_timeout = self.probe_timeout;
        let threshold = self.failure_threshold;
        let inner = self.inner.clone();
        let stop = self.stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        break;
                    }
                    _ = stop.notified() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        Self::probe_once(&client, &url, probe_timeout, threshold, &inner, &token).await;
                    }
                }
            }
        });

        *self.task.write() = Some(handle);
    }

    async fn probe_once(client: &MediaServerClient, url: &str, probe_timeout: Duration, threshold: u32, inner: &Inner, token: &CancellationToken) {
        *inner.last_check.write() = Utc::now();
        let probe = timeout(probe_timeout, client.get_json::<serde_json::Value>(url, token));
        match probe.await {
            Ok(Ok(_)) => {
                inner.consecutive_failures.store(0, Ordering::SeqCst);
                inner.is_healthy.store(true, Ordering::SeqCst);
                let mut circuit = inner.circuit.write();
                if *circuit != CircuitState::Closed {
                    info!("media server probe recovered, circuit closed");
                }
                *circuit = CircuitState::Closed;
            }
            Ok(Err(e)) => Self::record_failure(inner, threshold, &e.to_string()),
            Err(_) => Self::record_failure(inner, threshold, "probe timed out"),
        }
    }

    fn record_failure(inner: &Inner, threshold: u32, reason: &str) {
        let failures = inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= threshold {
            inner.is_healthy.store(false, Ordering::SeqCst);
            *inner.circuit.write() = CircuitState::Open;
            warn!(failures, threshold, reason, "media server circuit opened");
        } else {
            warn!(failures, threshold, reason, "media server probe failed");
        }
    }

    /// Graceful shutdown honouring the caller's deadline (spec.md §4.6,
    /// §5 cancellation contract).
    pub async fn stop(&self, deadline: Duration) {
        self.stop.notify_one();
        let handle = self.task.write().take();
        if let Some(handle) = handle {
            if timeout(deadline, handle).await.is_err() {
                warn!("health monitor did not stop within deadline");
            }
        }
    }

    /// Wait-free read of current health (spec.md §5, "GetHealth is wait-free
    /// on the hot path").
    pub fn snapshot(&self) -> HealthSnapshot {
        let status = if !self.enabled {
            "disabled"
        } else if self.inner.is_healthy.load(Ordering::SeqCst) {
            "healthy"
        } else {
            "unhealthy"
        };
        HealthSnapshot {
            status: status.to_string(),
            timestamp: *self.inner.last_check.read(),
            circuit: *self.inner.circuit.read(),
            consecutive_failures: self.inner.consecutive_failures.load(Ordering::SeqCst),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.enabled || self.inner.is_healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> MediaServerConfig {
        MediaServerConfig {
            base_url,
            health_check_url: "/v3/paths/list".to_string(),
            timeout_secs: 5,
            health_check_interval_secs: 30,
            health_check_timeout_secs: 1,
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

    #[tokio::test]
    async fn disabled_monitor_reports_disabled_status() {
        let server = MockServer::start().await;
        let config = test_config(server.uri());
        let client = MediaServerClient::new(&config).unwrap();
        let monitor = HealthMonitor::new(client, &config, false);
        assert_eq!(monitor.snapshot().status, "disabled");
        assert!(monitor.is_healthy());
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_consecutive_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/v3/paths/list")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let config = test_config(server.uri());
        let client = MediaServerClient::new(&config).unwrap();
        let monitor = HealthMonitor::new(client.clone(), &config, true);

        let token = CancellationToken::new();
        for _ in 0..3 {
            HealthMonitor::probe_once(&client, &config.health_check_url, config.health_check_timeout(), config.health_failure_threshold, &monitor.inner, &token).await;
        }

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.circuit, CircuitState::Open);
        assert_eq!(snapshot.status, "unhealthy");
    }

    #[tokio::test]
    async fn stop_returns_within_deadline_when_never_started() {
        let server = MockServer::start().await;
        let config = test_config(server.uri());
        let client = MediaServerClient::new(&config).unwrap();
        let monitor = HealthMonitor::new(client, &config, true);

        let start = std::time::Instant::now();
        monitor.stop(Duration::from_millis(500)).await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
