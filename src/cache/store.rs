use std::{fmt::Debug, path::Path as FsPath, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, PutPayload, local::LocalFileSystem, memory::InMemory, path::Path};

use crate::{
    cache::key::CacheKey,
    error::{CacheError, ChartweaveResult, IoError},
};

/// The key-value boundary behind the staleness gate.
///
/// Any store works as long as a `set` is observed whole by later `get`s.
#[async_trait]
pub trait ObjectCache: Send + Sync + Debug {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError>;

    async fn set(&self, key: &CacheKey, value: Bytes) -> Result<(), CacheError>;
}

/// [`ObjectCache`] over any `object_store` backend (memory, local disk, S3, GCS, ...).
#[derive(Debug, Clone)]
pub struct ObjectStoreCache {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl ObjectStoreCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Stores objects as files below `root`, creating it if needed.
    pub fn local(root: impl AsRef<FsPath>) -> ChartweaveResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(IoError::Io)?;
        let fs = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| IoError::ObjectStoreBuild(e.to_string()))?;
        Ok(Self::new(Arc::new(fs)))
    }

    /// Namespaces every key under `prefix/`.
    pub fn with_prefix(self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..self
        }
    }

    fn path_for(&self, key: &CacheKey) -> Result<Path, CacheError> {
        let raw = match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key.to_string(),
        };
        Path::parse(&raw).map_err(|_| CacheError::InvalidKey(raw))
    }
}

#[async_trait]
impl ObjectCache for ObjectStoreCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        let path = self.path_for(key)?;
        match self.store.get(&path).await {
            Ok(result) => result
                .bytes()
                .await
                .map(Some)
                .map_err(|e| CacheError::Unavailable(e.to_string())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(CacheError::Unavailable(e.to_string())),
        }
    }

    async fn set(&self, key: &CacheKey, value: Bytes) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        self.store
            .put(&path, PutPayload::from(value))
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache = ObjectStoreCache::in_memory();
        let got = cache.get(&CacheKey::new("chain", "nope")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn set_then_get_returns_the_bytes() {
        let cache = ObjectStoreCache::in_memory().with_prefix("dashboard");
        let key = CacheKey::new("chain", "ethereum");
        cache.set(&key, Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(Bytes::from_static(b"{}")));
    }

    #[tokio::test]
    async fn invalid_key_is_rejected() {
        let cache = ObjectStoreCache::in_memory();
        let err = cache.get(&CacheKey::from("a//b")).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey(_)));
    }
}
