use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::{
    cache::{
        clock::{Clock, SystemClock},
        key::CacheKey,
        store::ObjectCache,
    },
    error::{CacheError, ChartweaveResult},
};

/// A cached payload together with the moment it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub written_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> CacheEntry<T> {
    /// Fresh while `now - written_at <= ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match TimeDelta::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.written_at) <= ttl,
            Err(_) => true,
        }
    }
}

/// Marker recording when `key` was last pulled from upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPulled {
    pub key: CacheKey,
    pub pulled_at: DateTime<Utc>,
}

/// Time-to-live gate in front of an [`ObjectCache`].
///
/// The cache is best-effort: a store that cannot be read or written is
/// logged and bypassed, and a corrupt entry counts as a miss. There is no
/// locking, so concurrent readers of a stale key may all recompute; the last
/// write wins.
#[derive(Debug, Clone)]
pub struct StalenessCache {
    store: Arc<dyn ObjectCache>,
    clock: Arc<dyn Clock>,
}

impl StalenessCache {
    pub fn new(store: impl ObjectCache + 'static) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<dyn ObjectCache>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            ..self
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns the cached value for `key` if it is fresh, otherwise runs
    /// `compute`, stores its result and returns it.
    ///
    /// An error from `compute` is returned as-is and nothing is stored.
    #[tracing::instrument(skip_all, fields(key = %key, ttl = ?ttl))]
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> ChartweaveResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ChartweaveResult<T>>,
    {
        match self.read::<T>(key).await {
            Ok(Some(entry)) if entry.is_fresh(self.now(), ttl) => {
                info!(written_at = %entry.written_at, "Cache hit");
                return Ok(entry.payload);
            }
            Ok(Some(entry)) => info!(written_at = %entry.written_at, "Cache stale: recomputing"),
            Ok(None) => info!("Cache miss: computing"),
            Err(e) => warn!(error = %e, "Cache unavailable: bypassing read"),
        }

        let value = compute().await?;

        if let Err(e) = self.write(key, &value).await {
            warn!(error = %e, "Cache unavailable: result not stored");
        }
        Ok(value)
    }

    /// Reads the entry under `key`. A payload that does not decode is a miss.
    pub async fn read<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry<T>>, CacheError> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(%key, error = %e, "Cache miss: entry failed to decode");
                Ok(None)
            }
        }
    }

    /// Writes `payload` under `key` stamped with the current time.
    pub async fn write<T: Serialize>(&self, key: &CacheKey, payload: &T) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.clone(),
            written_at: self.now(),
            payload,
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.store.set(key, Bytes::from(bytes)).await?;
        debug!(%key, "Cache entry written");
        Ok(())
    }

    // === Last-pulled marker ===

    pub async fn last_pulled(&self, key: &CacheKey) -> Result<Option<DateTime<Utc>>, CacheError> {
        let marker = key.last_pulled();
        let Some(bytes) = self.store.get(&marker).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice::<LastPulled>(&bytes)
            .ok()
            .map(|m| m.pulled_at))
    }

    pub async fn mark_pulled(&self, key: &CacheKey) -> Result<(), CacheError> {
        let marker = LastPulled {
            key: key.clone(),
            pulled_at: self.now(),
        };
        let bytes = serde_json::to_vec(&marker)?;
        self.store.set(&key.last_pulled(), Bytes::from(bytes)).await
    }

    /// `true` if `key` was never pulled or its last pull is older than
    /// `interval`. An unreadable marker means "pull".
    pub async fn should_pull(&self, key: &CacheKey, interval: Duration) -> bool {
        match self.last_pulled(key).await {
            Ok(Some(pulled_at)) => match TimeDelta::from_std(interval) {
                Ok(interval) => self.now().signed_duration_since(pulled_at) > interval,
                Err(_) => false,
            },
            Ok(None) => true,
            Err(e) => {
                warn!(%key, error = %e, "Last-pulled marker unavailable");
                true
            }
        }
    }
}
