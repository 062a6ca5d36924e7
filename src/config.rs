use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

use crate::{
    assemble::policy::AssembleContext,
    cache::store::ObjectStoreCache,
    data::domain::Granularity,
    error::{ChartweaveResult, ConfigError},
    transport::{
        loader::FetchOptions,
        source::{ApiKey, HttpUpstream, Upstream, Url},
    },
};

/// Prefix of every environment variable read by [`PipelineConfig::from_env`].
pub const ENV_PREFIX: &str = "CHARTWEAVE_";

/// Settings shared by every page the dashboard serves.
///
/// # Examples
///
/// ```
/// # use chartweave::prelude::*;
/// # use std::time::Duration;
/// let cfg = PipelineConfig::default()
///     .with_top_k(5)
///     .with_cache_ttl(Duration::from_secs(600));
/// assert_eq!(cfg.top_k(), 5);
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    // ========================================================================
    // Upstream
    // ========================================================================
    api_base: Url,
    api_key: Option<ApiKey>,

    /// Timeout of one upstream request.
    #[serde_as(as = "DurationSeconds<u64>")]
    request_timeout: Duration,

    /// Budget for a whole fan-out. Sources still pending at the deadline fail.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    fetch_deadline: Option<Duration>,

    // ========================================================================
    // Cache
    // ========================================================================
    #[serde_as(as = "DurationSeconds<u64>")]
    cache_ttl: Duration,

    /// Minimum spacing between two background refreshes of the same page.
    #[serde_as(as = "DurationSeconds<u64>")]
    pull_interval: Duration,

    /// Cache files live here; `None` keeps them in memory.
    cache_dir: Option<PathBuf>,

    // ========================================================================
    // Composition
    // ========================================================================
    top_k: usize,
    volume_granularity: Granularity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base: Url::from("https://api.llama.fi"),
            api_key: None,
            request_timeout: Duration::from_secs(10),
            fetch_deadline: None,
            cache_ttl: Duration::from_secs(3600),
            pull_interval: Duration::from_secs(900),
            cache_dir: None,
            top_k: 10,
            volume_granularity: Granularity::Daily,
        }
    }
}

// ================================================================================================
// Builder Methods
// ================================================================================================

impl PipelineConfig {
    pub fn with_api_base(self, api_base: impl Into<Url>) -> Self {
        Self {
            api_base: api_base.into(),
            ..self
        }
    }

    pub fn with_api_key(self, api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self
        }
    }

    pub fn with_request_timeout(self, request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            ..self
        }
    }

    pub fn with_fetch_deadline(self, fetch_deadline: Duration) -> Self {
        Self {
            fetch_deadline: Some(fetch_deadline),
            ..self
        }
    }

    pub fn with_cache_ttl(self, cache_ttl: Duration) -> Self {
        Self { cache_ttl, ..self }
    }

    pub fn with_pull_interval(self, pull_interval: Duration) -> Self {
        Self {
            pull_interval,
            ..self
        }
    }

    pub fn with_cache_dir(self, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..self
        }
    }

    /// Sets how many categories a breakdown keeps before folding into "Others".
    ///
    /// # Behavior
    /// Clamped to at least 1.
    pub fn with_top_k(self, top_k: usize) -> Self {
        Self {
            top_k: top_k.max(1),
            ..self
        }
    }

    pub fn with_volume_granularity(self, volume_granularity: Granularity) -> Self {
        Self {
            volume_granularity,
            ..self
        }
    }
}

// ================================================================================================
// Accessors
// ================================================================================================

impl PipelineConfig {
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn fetch_deadline(&self) -> Option<Duration> {
        self.fetch_deadline
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn pull_interval(&self) -> Duration {
        self.pull_interval
    }

    pub fn cache_dir(&self) -> Option<&PathBuf> {
        self.cache_dir.as_ref()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn volume_granularity(&self) -> Granularity {
        self.volume_granularity
    }
}

// ================================================================================================
// Wiring
// ================================================================================================

impl PipelineConfig {
    /// Reads `CHARTWEAVE_*` variables on top of the defaults.
    ///
    /// | variable | format |
    /// |---|---|
    /// | `CHARTWEAVE_API_BASE` | URL |
    /// | `CHARTWEAVE_API_KEY` | string |
    /// | `CHARTWEAVE_REQUEST_TIMEOUT` | humantime, e.g. `10s` |
    /// | `CHARTWEAVE_FETCH_DEADLINE` | humantime |
    /// | `CHARTWEAVE_CACHE_TTL` | humantime |
    /// | `CHARTWEAVE_PULL_INTERVAL` | humantime |
    /// | `CHARTWEAVE_CACHE_DIR` | path |
    /// | `CHARTWEAVE_TOP_K` | integer |
    /// | `CHARTWEAVE_VOLUME_GRANULARITY` | `daily`, `weekly`, `monthly`, `quarterly` |
    pub fn from_env() -> ChartweaveResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PipelineConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ChartweaveResult<Self> {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        };

        let mut cfg = Self::default();
        if let Some((_, v)) = var("API_BASE") {
            cfg = cfg.with_api_base(v);
        }
        if let Some((_, v)) = var("API_KEY") {
            cfg = cfg.with_api_key(v);
        }
        if let Some((key, v)) = var("REQUEST_TIMEOUT") {
            cfg = cfg.with_request_timeout(parse_duration(&key, &v)?);
        }
        if let Some((key, v)) = var("FETCH_DEADLINE") {
            cfg = cfg.with_fetch_deadline(parse_duration(&key, &v)?);
        }
        if let Some((key, v)) = var("CACHE_TTL") {
            cfg = cfg.with_cache_ttl(parse_duration(&key, &v)?);
        }
        if let Some((key, v)) = var("PULL_INTERVAL") {
            cfg = cfg.with_pull_interval(parse_duration(&key, &v)?);
        }
        if let Some((_, v)) = var("CACHE_DIR") {
            cfg = cfg.with_cache_dir(v);
        }
        if let Some((key, v)) = var("TOP_K") {
            cfg = cfg.with_top_k(parse_value(&key, &v)?);
        }
        if let Some((key, v)) = var("VOLUME_GRANULARITY") {
            cfg = cfg.with_volume_granularity(parse_value(&key, &v)?);
        }
        Ok(cfg)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::new().with_optional_deadline(self.fetch_deadline)
    }

    pub fn http_upstream(&self) -> ChartweaveResult<HttpUpstream> {
        HttpUpstream::new(
            self.api_base.clone(),
            self.api_key.clone(),
            self.request_timeout,
        )
    }

    /// Local cache below [`PipelineConfig::cache_dir`], or an in-memory one.
    pub fn object_cache(&self) -> ChartweaveResult<ObjectStoreCache> {
        match &self.cache_dir {
            Some(dir) => ObjectStoreCache::local(dir),
            None => Ok(ObjectStoreCache::in_memory()),
        }
    }

    pub fn assemble_context(&self, upstream: Arc<dyn Upstream>) -> AssembleContext {
        AssembleContext::new(upstream)
            .with_fetch_options(self.fetch_options())
            .with_top_k(self.top_k)
            .with_granularity(self.volume_granularity)
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|source| ConfigError::InvalidDuration {
        key: key.to_string(),
        source,
    })
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        msg: e.to_string(),
    })
}
