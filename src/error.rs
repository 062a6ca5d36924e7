use strum::{Display, IntoStaticStr};
use thiserror::Error;

pub type ChartweaveResult<T> = Result<T, ChartweaveError>;

#[derive(Debug, Error)]
pub enum ChartweaveError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Coarse classification used by callers deciding how to react to an error.
///
/// Only [`ErrorKind::AllSourcesFailed`] is meant to reach the web layer as a
/// "no data" response; the other kinds are recovered at a narrower boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ErrorKind {
    SourceFailure,
    ShapeMismatch,
    CacheUnavailable,
    AllSourcesFailed,
    Other,
}

impl ChartweaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Source(_) => ErrorKind::SourceFailure,
            Self::Data(DataError::ShapeMismatch { .. }) => ErrorKind::ShapeMismatch,
            Self::Cache(CacheError::Unavailable(_)) => ErrorKind::CacheUnavailable,
            Self::Assemble(AssembleError::AllSourcesFailed { .. }) => ErrorKind::AllSourcesFailed,
            _ => ErrorKind::Other,
        }
    }

    /// `true` when the surrounding web layer should answer with "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Assemble(AssembleError::AllSourcesFailed { .. })
        )
    }
}

/// Errors raised by the bucketing, joining and decoding of time series.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Shape mismatch at point {index}: expected {expected} fields, found {found}")]
    ShapeMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(i64),

    #[error("Malformed series payload: {0}")]
    MalformedSeries(String),
}

/// Failure of a single upstream source.
///
/// The fetch orchestrator converts every one of these into a
/// `FetchResult::Failed` entry; they never abort sibling sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Request to '{url}' failed: {msg}")]
    Http { url: String, msg: String },

    #[error("Upstream '{url}' answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Request to '{0}' timed out")]
    TimedOut(String),

    #[error("Failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("No upstream data for path '{0}'")]
    NotFound(String),

    #[error("Fetch deadline exceeded")]
    DeadlineExceeded,

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Source task panicked: {0}")]
    Panicked(String),
}

/// Errors related to the object cache backing the staleness gate.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode cache entry")]
    Encoding(#[from] serde_json::Error),

    #[error("Failed to derive cache key")]
    KeyDerivation(#[from] postcard::Error),

    #[error("Invalid cache key: '{0}'")]
    InvalidKey(String),
}

/// Errors surfaced by page data assemblers.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Every source failed for {entity}")]
    AllSourcesFailed { entity: String },
}

/// Errors related to pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for '{key}': {msg}")]
    InvalidValue { key: String, msg: String },

    #[error("Invalid duration for '{key}'")]
    InvalidDuration {
        key: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Errors related to local storage outside the cache protocol.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Failed to build object store: {0}")]
    ObjectStoreBuild(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_the_four_recoverable_categories() {
        let shape: ChartweaveError = DataError::ShapeMismatch {
            index: 3,
            expected: 2,
            found: 1,
        }
        .into();
        assert_eq!(shape.kind(), ErrorKind::ShapeMismatch);

        let source: ChartweaveError = SourceError::DeadlineExceeded.into();
        assert_eq!(source.kind(), ErrorKind::SourceFailure);

        let cache: ChartweaveError = CacheError::Unavailable("down".to_string()).into();
        assert_eq!(cache.kind(), ErrorKind::CacheUnavailable);

        let all: ChartweaveError = AssembleError::AllSourcesFailed {
            entity: "chain/ethereum".to_string(),
        }
        .into();
        assert_eq!(all.kind(), ErrorKind::AllSourcesFailed);
        assert!(all.is_not_found());

        let other: ChartweaveError = ConfigError::HttpClient("x".to_string()).into();
        assert_eq!(other.kind(), ErrorKind::Other);
        assert!(!other.is_not_found());
    }

    #[test]
    fn shape_mismatch_message_names_the_offending_point() {
        let err = DataError::ShapeMismatch {
            index: 4,
            expected: 2,
            found: 3,
        };
        assert_eq!(
            err.to_string(),
            "Shape mismatch at point 4: expected 2 fields, found 3"
        );
    }
}
