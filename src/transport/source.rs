use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    error::{ChartweaveResult, ConfigError, SourceError},
    impl_string_newtype,
};

/// Header carrying the API key on upstream requests.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Base URL of an upstream API.
///
/// # Examples
///
/// ```
/// # use chartweave::prelude::*;
/// let url = Url::from("https://api.example.com");
/// assert_eq!(url.as_str(), "https://api.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Url(pub String);
impl_string_newtype!(Url);

/// API key sent to upstreams that require one.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(pub String);
impl_string_newtype!(ApiKey);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Name of one source within a fan-out (`"tvl"`, `"fees"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceName(pub String);
impl_string_newtype!(SourceName);

// ================================================================================================
// Upstream Boundary
// ================================================================================================

/// An opaque JSON provider. Schema knowledge lives in the caller.
#[async_trait]
pub trait Upstream: Send + Sync + std::fmt::Debug {
    async fn get_json(&self, path: &str) -> Result<Value, SourceError>;
}

#[async_trait]
impl<U: Upstream + ?Sized> Upstream for Arc<U> {
    async fn get_json(&self, path: &str) -> Result<Value, SourceError> {
        (**self).get_json(path).await
    }
}

/// HTTP(S) upstream over `reqwest`. Every request carries its own timeout.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base: Url,
    api_key: Option<ApiKey>,
}

impl HttpUpstream {
    pub fn new(base: Url, api_key: Option<ApiKey>, timeout: Duration) -> ChartweaveResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            base,
            api_key,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    #[tracing::instrument(skip(self), fields(base = %self.base))]
    async fn get_json(&self, path: &str) -> Result<Value, SourceError> {
        let url = self.url_for(path);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::TimedOut(url.clone())
            } else {
                SourceError::Http {
                    url: url.clone(),
                    msg: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::TimedOut(url.clone())
            } else {
                SourceError::Decode(e.to_string())
            }
        })?;
        debug!(%url, "Upstream answered");
        Ok(body)
    }
}

// ================================================================================================
// In-process Upstream
// ================================================================================================

#[derive(Debug, Clone)]
struct Route {
    response: Result<Value, u16>,
    latency: Duration,
    hits: Arc<AtomicUsize>,
}

impl Route {
    fn new(response: Result<Value, u16>) -> Self {
        Self {
            response,
            latency: Duration::ZERO,
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Upstream answering from an in-memory route table.
///
/// Each route can be given a latency and can fail with an HTTP status, which
/// makes partial failure and fan-out timing reproducible without a network.
/// Unknown paths fail with [`SourceError::NotFound`].
#[derive(Debug, Clone, Default)]
pub struct StaticUpstream {
    routes: HashMap<String, Route>,
}

impl StaticUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(mut self, path: impl Into<String>, body: Value) -> Self {
        self.routes.insert(path.into(), Route::new(Ok(body)));
        self
    }

    pub fn with_status(mut self, path: impl Into<String>, status: u16) -> Self {
        self.routes.insert(path.into(), Route::new(Err(status)));
        self
    }

    /// Delays the answer of an already registered `path`.
    pub fn with_latency(mut self, path: &str, latency: Duration) -> Self {
        if let Some(route) = self.routes.get_mut(path) {
            route.latency = latency;
        }
        self
    }

    /// How many times `path` has been requested.
    pub fn hits(&self, path: &str) -> usize {
        self.routes
            .get(path)
            .map_or(0, |r| r.hits.load(Ordering::SeqCst))
    }

    pub fn total_hits(&self) -> usize {
        self.routes
            .values()
            .map(|r| r.hits.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl Upstream for StaticUpstream {
    async fn get_json(&self, path: &str) -> Result<Value, SourceError> {
        let Some(route) = self.routes.get(path) else {
            return Err(SourceError::NotFound(path.to_string()));
        };
        route.hits.fetch_add(1, Ordering::SeqCst);

        if !route.latency.is_zero() {
            tokio::time::sleep(route.latency).await;
        }

        match &route.response {
            Ok(body) => Ok(body.clone()),
            Err(status) => Err(SourceError::Status {
                url: path.to_string(),
                status: *status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn static_upstream_serves_routes_and_counts_hits() {
        let upstream = StaticUpstream::new()
            .with_json("/tvl", json!([[1, 2.0]]))
            .with_status("/fees", 503);

        assert_eq!(upstream.get_json("/tvl").await.unwrap(), json!([[1, 2.0]]));
        assert!(matches!(
            upstream.get_json("/fees").await,
            Err(SourceError::Status { status: 503, .. })
        ));
        assert!(matches!(
            upstream.get_json("/nope").await,
            Err(SourceError::NotFound(_))
        ));

        assert_eq!(upstream.hits("/tvl"), 1);
        assert_eq!(upstream.total_hits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn static_upstream_applies_latency() {
        let upstream = StaticUpstream::new()
            .with_json("/slow", json!({}))
            .with_latency("/slow", Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        upstream.get_json("/slow").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn http_upstream_joins_base_and_path() {
        let upstream = HttpUpstream::new(
            Url::from("https://api.example.com/"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            upstream.url_for("/v2/chains"),
            "https://api.example.com/v2/chains"
        );
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let key = ApiKey::from("secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
    }
}
