use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    assemble::{
        bridge::{BridgeAssembler, BridgePage},
        chain::{ChainAssembler, ChainPage},
        policy::{AssembleContext, Assembler},
        protocol::{ProtocolAssembler, ProtocolPage},
        stablecoin::{StablecoinAssembler, StablecoinPage},
    },
    cache::{key::CacheKey, stale::StalenessCache},
    config::PipelineConfig,
    data::domain::{EntityKind, Granularity, Timestamp, slug},
    error::ChartweaveResult,
    transport::source::Upstream,
};

/// Everything that changes the content of a page. Hashed into its cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PageRequest {
    kind: EntityKind,
    entity: String,
    top_k: usize,
    granularity: Granularity,
}

/// Serves dashboard pages, each behind the staleness-gated cache.
///
/// A page whose sources all failed is returned as an error and never cached,
/// so the next request tries upstream again.
#[derive(Debug, Clone)]
pub struct Dashboard {
    upstream: Arc<dyn Upstream>,
    cache: StalenessCache,
    config: PipelineConfig,
}

impl Dashboard {
    pub fn new(upstream: impl Upstream + 'static, cache: StalenessCache, config: PipelineConfig) -> Self {
        Self {
            upstream: Arc::new(upstream),
            cache,
            config,
        }
    }

    /// HTTP upstream and object cache as described by `config`.
    pub fn from_config(config: PipelineConfig) -> ChartweaveResult<Self> {
        let upstream = config.http_upstream()?;
        let cache = StalenessCache::new(config.object_cache()?);
        Ok(Self::new(upstream, cache, config))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &StalenessCache {
        &self.cache
    }

    pub async fn chain_page(&self, chain: &str) -> ChartweaveResult<ChainPage> {
        self.page(&ChainAssembler, chain).await
    }

    pub async fn protocol_page(&self, protocol: &str) -> ChartweaveResult<ProtocolPage> {
        self.page(&ProtocolAssembler, protocol).await
    }

    pub async fn bridge_page(&self, bridge: &str) -> ChartweaveResult<BridgePage> {
        self.page(&BridgeAssembler, bridge).await
    }

    pub async fn stablecoin_page(&self, asset: &str) -> ChartweaveResult<StablecoinPage> {
        self.page(&StablecoinAssembler, asset).await
    }

    /// Cached page of `entity`, recomputed once older than the configured TTL.
    #[tracing::instrument(skip_all, fields(kind = %A::KIND, entity = %entity))]
    pub async fn page<A: Assembler>(&self, assembler: &A, entity: &str) -> ChartweaveResult<A::Page> {
        let key = self.page_key(A::KIND, entity)?;
        let ctx = self.context();
        self.cache
            .get_or_compute(&key, self.config.cache_ttl(), || assembler.assemble(&ctx, entity))
            .await
    }

    /// Rebuilds the cached page of `entity` if its last pull is older than the
    /// pull interval. Returns whether a pull happened.
    ///
    /// Meant for a background warmer: it ignores the TTL of the current entry.
    #[tracing::instrument(skip_all, fields(kind = %A::KIND, entity = %entity))]
    pub async fn refresh<A: Assembler>(&self, assembler: &A, entity: &str) -> ChartweaveResult<bool> {
        let key = self.page_key(A::KIND, entity)?;
        if !self.cache.should_pull(&key, self.config.pull_interval()).await {
            return Ok(false);
        }

        let page = assembler.assemble(&self.context(), entity).await?;
        if let Err(e) = self.cache.write(&key, &page).await {
            warn!(error = %e, "Cache unavailable: refreshed page not stored");
            return Ok(true);
        }
        if let Err(e) = self.cache.mark_pulled(&key).await {
            warn!(error = %e, "Failed to record pull");
        }
        info!("Page refreshed");
        Ok(true)
    }

    fn context(&self) -> AssembleContext {
        self.config
            .assemble_context(self.upstream.clone())
            .with_now(Timestamp::from(self.cache.now()))
    }

    fn page_key(&self, kind: EntityKind, entity: &str) -> ChartweaveResult<CacheKey> {
        let request = PageRequest {
            kind,
            entity: slug(entity),
            top_k: self.config.top_k(),
            granularity: self.config.volume_granularity(),
        };
        Ok(CacheKey::hashed(kind.as_str(), &request)?)
    }
}
