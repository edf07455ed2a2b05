//! # HTTP Backend
//!
//! `EnvironmentBackend` over the version-store REST API.
//!
//! Status mapping:
//! - 404 → `NotFound` (or "no neighbor" for next/previous lookups)
//! - 409 → `StaleVersion`
//! - 422 with an `errors` list → `Config`
//! - anything else non-2xx, connection failures, timeouts and undecodable
//!   bodies → `Transport`

use crate::api::{ErrorBody, InSyncResponse, SelectVersion};
use crate::config::ClientConfig;
use archsync_core::{
    ApplyRequest, ArchsyncError, Constraint, Direction, EnvironmentBackend, EnvironmentKey,
    EnvironmentVersion, TopologyDiff,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the version store.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpBackend {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ArchsyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ArchsyncError::InvalidInput(format!("invalid base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ArchsyncError::InvalidInput(format!(
                "'{base_url}' cannot be used as a base URL"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArchsyncError::Transport(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    /// Create a client from the `[client]` configuration section.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ArchsyncError> {
        Self::new(&config.base_url, config.api_key.clone(), config.timeout())
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/architecture/{arch}/environment/{env}/{tail...}`, each segment
    /// percent-encoded.
    fn url(&self, architecture_id: &str, environment_id: &str, tail: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["architecture", architecture_id, "environment", environment_id])
                .extend(tail);
        }
        url
    }

    fn key_url(&self, key: &EnvironmentKey, tail: &[&str]) -> Url {
        self.url(&key.architecture_id, &key.environment_id, tail)
    }

    /// Build a request with optional Bearer auth.
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Send a request; non-2xx responses become errors.
    async fn send(&self, req: RequestBuilder) -> Result<Response, ArchsyncError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ArchsyncError::Transport(format!("{}: {e}", self.base_url)))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp
            .text()
            .await
            .map_err(|e| ArchsyncError::Transport(format!("{status}: unreadable error body: {e}")))?;
        tracing::debug!(status = status.as_u16(), "Request failed: {}", text);
        Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => body.into_error(status),
            // Filled in by `name_missing` where the caller knows the key.
            Err(_) if status == StatusCode::NOT_FOUND => ArchsyncError::NotFound {
                architecture: String::new(),
                environment: String::new(),
                version: None,
            },
            Err(_) => ArchsyncError::Transport(format!("{status}: {}", text.trim())),
        })
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ArchsyncError> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ArchsyncError::Transport(format!("malformed response: {e}")))
    }
}

/// Give an anonymous `NotFound` (404 without a JSON body) the requested key.
fn name_missing(err: ArchsyncError, key: &EnvironmentKey, version: Option<u64>) -> ArchsyncError {
    match err {
        ArchsyncError::NotFound { ref architecture, .. } if architecture.is_empty() => {
            key.not_found(version)
        }
        other => other,
    }
}

impl EnvironmentBackend for HttpBackend {
    async fn fetch(&self, key: &EnvironmentKey, version: Option<u64>) -> Result<EnvironmentVersion, ArchsyncError> {
        let mut req = self.request(Method::GET, self.key_url(key, &[]));
        if let Some(version) = version {
            req = req.query(&[("version", version)]);
        }
        self.json(req).await.map_err(|e| name_missing(e, key, version))
    }

    async fn neighbor(
        &self,
        key: &EnvironmentKey,
        version: u64,
        direction: Direction,
    ) -> Result<Option<u64>, ArchsyncError> {
        let req = self
            .request(Method::GET, self.key_url(key, &[direction.as_str()]))
            .query(&[("version", version)]);
        match self.json::<EnvironmentVersion>(req).await {
            Ok(found) => Ok(Some(found.version)),
            Err(ArchsyncError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn select(&self, key: &EnvironmentKey, version: u64) -> Result<(), ArchsyncError> {
        let req = self
            .request(Method::POST, self.key_url(key, &[]))
            .json(&SelectVersion { version });
        let selected: SelectVersion = self
            .json(req)
            .await
            .map_err(|e| name_missing(e, key, Some(version)))?;
        if selected.version != version {
            return Err(ArchsyncError::Transport(format!(
                "selected v{} but server reports v{}",
                version, selected.version
            )));
        }
        Ok(())
    }

    async fn apply(&self, key: &EnvironmentKey, request: &ApplyRequest) -> Result<EnvironmentVersion, ArchsyncError> {
        let req = self
            .request(Method::POST, self.key_url(key, &["constraints"]))
            .json(request);
        self.json(req)
            .await
            .map_err(|e| name_missing(e, key, Some(request.version)))
    }

    async fn constraints(&self, key: &EnvironmentKey) -> Result<Vec<Constraint>, ArchsyncError> {
        let req = self.request(Method::GET, self.key_url(key, &["constraints"]));
        self.json(req).await.map_err(|e| name_missing(e, key, None))
    }

    async fn diff(&self, architecture_id: &str, source: &str, target: &str) -> Result<TopologyDiff, ArchsyncError> {
        let req = self
            .request(Method::GET, self.url(architecture_id, target, &["diff"]))
            .query(&[("source", source)]);
        self.json(req).await
    }

    async fn in_sync(&self, architecture_id: &str, source: &str, target: &str) -> Result<bool, ArchsyncError> {
        let req = self
            .request(Method::GET, self.url(architecture_id, target, &["insync"]))
            .query(&[("source", source)]);
        let resp: InSyncResponse = self.json(req).await?;
        Ok(resp.in_sync)
    }
}
