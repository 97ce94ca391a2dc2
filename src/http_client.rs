//! Pooled HTTP client to the media server (spec.md §2, "HTTP client", §4,
//! §6 "Media-server HTTP API").
//!
//! Shared, thread-safe (`reqwest::Client` clones cheaply and shares its
//! connection pool), carrying the caller's deadline on every call. Schema
//! sanity is checked at decode time: list endpoints must carry
//! `{pageCount, itemCount, items}`, per spec.md §6.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::MediaServerConfig;
use crate::error::{ControllerError, Result};

/// Thin wrapper around a pooled `reqwest::Client` plus the media server's
/// base URL. Cheap to clone; every manager holds one.
#[derive(Clone)]
pub struct MediaServerClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl MediaServerClient {
    pub fn new(config: &MediaServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.connection_pool.max_idle_conns_per_host)
            .pool_idle_timeout(config.connection_pool.idle_conn_timeout())
            .timeout(config.timeout())
            .build()
            .map_err(ControllerError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Races the request against `token` so a caller that cancels its
    /// context doesn't wait on the network (spec.md §5, "propagate [ctx] to
    /// every HTTP call").
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&(impl Serialize + ?Sized)>,
        token: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        let mut req = self.client.request(method.clone(), &url);
        if let Some(b) = body {
            req = req.json(b);
        }
        debug!(%method, %url, "media-server request");
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ControllerError::Cancelled),
            result = req.send() => result.map_err(ControllerError::Http),
        }
    }

    /// GET and decode a JSON body. A 404 is surfaced as `PathNotFound`-shaped
    /// context by the caller; here it is reported as a generic HTTP error
    /// carrying the status in the message so callers can match on it.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, token: &CancellationToken) -> Result<T> {
        let resp = self.send(Method::GET, path, None::<&()>, token).await?;
        self.decode(resp, path).await
    }

    /// Returns `Ok(None)` on 404 instead of erroring — used by existence
    /// checks (`PathExists`, `GetPath`).
    pub async fn get_json_optional<T: DeserializeOwned>(&self, path: &str, token: &CancellationToken) -> Result<Option<T>> {
        let resp = self.send(Method::GET, path, None::<&()>, token).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.decode(resp, path).await.map(Some)
    }

    /// POST with a JSON body. `already exists` in a 4xx body is treated as
    /// success (spec.md §6), returned as `Ok(())`.
    pub async fn post_idempotent(&self, path: &str, body: &impl Serialize, token: &CancellationToken) -> Result<()> {
        let resp = self.send(Method::POST, path, Some(body), token).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        if status.is_client_error() && text.to_lowercase().contains("already exists") {
            debug!(path, "treating 'already exists' as success");
            return Ok(());
        }
        Err(ControllerError::MalformedResponse {
            operation: format!("POST {path}"),
            reason: format!("{status}: {text}"),
        })
    }

    pub async fn patch(&self, path: &str, body: &impl Serialize, token: &CancellationToken) -> Result<()> {
        let resp = self.send(Method::PATCH, path, Some(body), token).await?;
        self.expect_success(resp, path).await
    }

    pub async fn post(&self, path: &str, body: &impl Serialize, token: &CancellationToken) -> Result<()> {
        let resp = self.send(Method::POST, path, Some(body), token).await?;
        self.expect_success(resp, path).await
    }

    /// DELETE. Idempotent by convention: a 404 is treated as success
    /// (spec.md §9, recording-file deletion open question).
    pub async fn delete_idempotent(&self, path: &str, token: &CancellationToken) -> Result<()> {
        let resp = self.send(Method::DELETE, path, None::<&()>, token).await?;
        if resp.status() == StatusCode::NOT_FOUND || resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Err(ControllerError::MalformedResponse {
            operation: format!("DELETE {path}"),
            reason: format!("{status}: {text}"),
        })
    }

    async fn expect_success(&self, resp: reqwest::Response, path: &str) -> Result<()> {
        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(ControllerError::PathNotFound(path.to_string()));
        }
        Err(ControllerError::MalformedResponse {
            operation: path.to_string(),
            reason: format!("{status}: {text}"),
        })
    }

    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response, path: &str) -> Result<T> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ControllerError::PathNotFound(path.to_string()));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ControllerError::MalformedResponse {
                operation: path.to_string(),
                reason: format!("{status}: {text}"),
            });
        }
        let text = resp.text().await.map_err(ControllerError::Http)?;
        serde_json::from_str(&text).map_err(|e| {
            warn!(path, error = %e, "malformed media-server response");
            ControllerError::MalformedResponse {
                operation: path.to_string(),
                reason: e.to_string(),
            }
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Deserialize)]
    struct Echo {
        ok: bool,
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    fn cfg(base_url: String) -> MediaServerConfig {
        MediaServerConfig {
            base_url,
            health_check_url: "/v3/paths/list".into(),
            timeout_secs: 5,
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            health_failure_threshold: 3,
            connection_pool: Default::default(),
            host: "127.0.0.1".into(),
            rtsp_port: 8554,
            webrtc_port: 8889,
            hls_port: 8888,
            recordings_path: "./recordings".into(),
            rtsp_monitoring: Default::default(),
        }
    }

    #[tokio::test]
    async fn decodes_json_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = MediaServerClient::new(&cfg(server.uri())).unwrap();
        let echo: Echo = client.get_json("/v3/ping", &token()).await.unwrap();
        assert!(echo.ok);
    }

    #[tokio::test]
    async fn treats_already_exists_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/config/paths/add/camera0"))
            .respond_with(ResponseTemplate::new(400).set_body_string("path already exists"))
            .mount(&server)
            .await;

        let client = MediaServerClient::new(&cfg(server.uri())).unwrap();
        let result = client
            .post_idempotent("/v3/config/paths/add/camera0", &serde_json::json!({}), &token())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn delete_on_missing_resource_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v3/recordings/deletesegment"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = MediaServerClient::new(&cfg(server.uri())).unwrap();
        assert!(client.delete_idempotent("/v3/recordings/deletesegment", &token()).await.is_ok());
    }

    #[tokio::test]
    async fn not_found_surfaces_as_path_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/paths/get/camera9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = MediaServerClient::new(&cfg(server.uri())).unwrap();
        let result: Result<Echo> = client.get_json("/v3/paths/get/camera9", &token()).await;
        assert!(matches!(result, Err(ControllerError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_the_request() {
        let server = MockServer::start().await;
        let client = MediaServerClient::new(&cfg(server.uri())).unwrap();
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let result: Result<Echo> = client.get_json("/v3/ping", &cancelled).await;
        assert!(matches!(result, Err(ControllerError::Cancelled)));
    }
}
