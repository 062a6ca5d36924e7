// 1. Traits
pub use crate::assemble::policy::{Assembler, PageSource};
pub use crate::cache::{clock::Clock, store::ObjectCache};
pub use crate::transport::{codec::SeriesPayload, source::Upstream};

// 2. Service & Configuration
pub use crate::config::PipelineConfig;
pub use crate::dashboard::Dashboard;

// 3. Series Types
pub use crate::data::breakdown::Breakdown;
pub use crate::data::domain::{EntityKind, Granularity, Label, NamedSeries, TimePoint, Timestamp};
pub use crate::data::join::{JoinedRow, JoinedTable};

// 4. Series Operations
pub use crate::data::breakdown::breakdown_by_category;
pub use crate::data::bucket::{bucket, cumulative};
pub use crate::data::join::join;

// 5. Fetching
pub use crate::transport::loader::{FetchOptions, FetchResult, FetchResults, SourceSet, fetch_all};
pub use crate::transport::source::{ApiKey, HttpUpstream, SourceName, StaticUpstream, Url};

// 6. Pages
pub use crate::assemble::bridge::{BridgeAssembler, BridgePage};
pub use crate::assemble::chain::{ChainAssembler, ChainPage};
pub use crate::assemble::policy::{AssembleContext, Fallback};
pub use crate::assemble::protocol::{ProtocolAssembler, ProtocolPage};
pub use crate::assemble::stablecoin::{StablecoinAssembler, StablecoinPage};

// 7. Cache
pub use crate::cache::{
    clock::{ManualClock, SystemClock},
    key::CacheKey,
    stale::{CacheEntry, StalenessCache},
    store::ObjectStoreCache,
};

// 8. Errors
pub use crate::error::{
    AssembleError, CacheError, ChartweaveError, ChartweaveResult, ConfigError, DataError,
    ErrorKind, IoError, SourceError,
};
