use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum::{Display, IntoEnumIterator, IntoStaticStr};
use tracing::warn;

use crate::{
    data::domain::{EntityKind, Granularity, NamedSeries, TimePoint, Timestamp, slug},
    error::{AssembleError, ChartweaveResult, DataError, SourceError},
    transport::{
        codec::SeriesPayload,
        loader::{FetchOptions, FetchResult, SourceSet, fetch_all},
        source::{SourceName, Upstream},
    },
};

/// Value substituted for a source that failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum Fallback {
    Null,
    EmptyObject,
    EmptyList,
}

impl Fallback {
    pub fn value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::EmptyObject => Value::Object(Default::default()),
            Self::EmptyList => Value::Array(Vec::new()),
        }
    }
}

/// One upstream source of a page, with its fallback policy.
pub trait PageSource:
    Debug + Copy + Eq + std::hash::Hash + IntoEnumIterator + Into<&'static str> + Send + Sync + 'static
{
    fn fallback(self) -> Fallback;

    /// Upstream path for `entity` (already slugged).
    fn path(self, entity: &str) -> String;

    fn name(self) -> &'static str {
        self.into()
    }

    /// The full fallback table, in declaration order.
    fn fallback_table() -> Vec<(Self, Fallback)> {
        Self::iter().map(|s| (s, s.fallback())).collect()
    }
}

/// Everything an assembler needs besides the entity name.
#[derive(Debug, Clone)]
pub struct AssembleContext {
    pub upstream: Arc<dyn Upstream>,
    pub fetch: FetchOptions,
    pub top_k: usize,
    pub granularity: Granularity,
    now: Option<Timestamp>,
}

impl AssembleContext {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            fetch: FetchOptions::default(),
            top_k: 10,
            granularity: Default::default(),
            now: None,
        }
    }

    pub fn with_fetch_options(self, fetch: FetchOptions) -> Self {
        Self { fetch, ..self }
    }

    pub fn with_top_k(self, top_k: usize) -> Self {
        Self { top_k, ..self }
    }

    pub fn with_granularity(self, granularity: Granularity) -> Self {
        Self {
            granularity,
            ..self
        }
    }

    /// Pins "now" used to drop the incomplete current day.
    pub fn with_now(self, now: Timestamp) -> Self {
        Self {
            now: Some(now),
            ..self
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now.unwrap_or_else(Timestamp::now)
    }
}

/// A page builder for one [`EntityKind`].
#[async_trait]
pub trait Assembler: Send + Sync {
    const KIND: EntityKind;
    type Source: PageSource;
    type Page: Serialize + DeserializeOwned + Send;

    async fn assemble(&self, ctx: &AssembleContext, entity: &str) -> ChartweaveResult<Self::Page>;
}

// ================================================================================================
// Source Resolution
// ================================================================================================

/// Outcome of fetching every source of a page, with fallbacks applied.
#[derive(Debug)]
pub struct Resolved<S: PageSource> {
    entity: String,
    values: HashMap<S, Value>,
    failed: Vec<SourceName>,
}

/// Fetches every `S` for `entity` concurrently and applies the fallback table.
///
/// Fails with [`AssembleError::AllSourcesFailed`] only if no source succeeded.
#[tracing::instrument(skip_all, fields(kind = %kind, entity = %entity))]
pub async fn resolve<S: PageSource>(
    ctx: &AssembleContext,
    kind: EntityKind,
    entity: &str,
) -> ChartweaveResult<Resolved<S>> {
    let id = slug(entity);
    let mut sources = SourceSet::new();
    for source in S::iter() {
        let upstream = ctx.upstream.clone();
        let path = source.path(&id);
        sources.add(source.name(), move |_| async move { upstream.get_json(&path).await });
    }

    let entity = format!("{kind}/{id}");
    let mut results = fetch_all(sources, &ctx.fetch).await;
    if results.all_failed() {
        return Err(AssembleError::AllSourcesFailed { entity }.into());
    }

    let mut values = HashMap::new();
    let mut failed = Vec::new();
    for source in S::iter() {
        let value = match results.take(source.name()) {
            Some(FetchResult::Ok(v)) => v,
            Some(FetchResult::Failed(_)) | None => {
                failed.push(SourceName::from(source.name()));
                source.fallback().value()
            }
        };
        values.insert(source, value);
    }

    Ok(Resolved {
        entity,
        values,
        failed,
    })
}

impl<S: PageSource> Resolved<S> {
    pub fn value(&self, source: S) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(&source).unwrap_or(&NULL)
    }

    pub fn failed(&self) -> &[SourceName] {
        &self.failed
    }

    pub fn into_failed(self) -> Vec<SourceName> {
        self.failed
    }

    /// Decodes `source` as a point series. A payload that does not decode is
    /// treated like a failed source.
    pub fn points(&mut self, source: S) -> Vec<TimePoint> {
        self.decode(source, SeriesPayload::points)
    }

    pub fn records(&mut self, source: S, value_keys: &[&str]) -> Vec<TimePoint> {
        self.decode(source, |v| v.records(value_keys))
    }

    pub fn labeled(&mut self, source: S) -> Vec<NamedSeries> {
        self.decode(source, SeriesPayload::labeled)
    }

    /// A number, or `None` for a null payload. Anything else fails the source.
    pub fn scalar(&mut self, source: S) -> Option<f64> {
        self.decode(source, |v| match v {
            Value::Null => Ok(None),
            other => other
                .scalar()
                .map(Some)
                .ok_or_else(|| DataError::MalformedSeries("expected a number".to_string())),
        })
    }

    /// Fails with [`AssembleError::AllSourcesFailed`] when no source produced
    /// usable data, counting payloads that did not decode. Call it once every
    /// source has been decoded.
    pub fn ensure_any_ok(&self) -> ChartweaveResult<()> {
        if self.failed.len() >= S::iter().count() {
            return Err(AssembleError::AllSourcesFailed {
                entity: self.entity.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Runs `decode` over the payload of `source`. On error the source is
    /// recorded as failed and `T::default()` is returned.
    pub fn decode<T, F>(&mut self, source: S, decode: F) -> T
    where
        T: Default,
        F: FnOnce(&Value) -> Result<T, DataError>,
    {
        match decode(self.value(source)) {
            Ok(v) => v,
            Err(e) => {
                let err = SourceError::Decode(e.to_string());
                warn!(source = source.name(), error = %err, "Source payload rejected");
                let name = SourceName::from(source.name());
                if !self.failed.contains(&name) {
                    self.failed.push(name);
                }
                T::default()
            }
        }
    }
}

/// Unwraps a derived metric, falling back to empty on a shape error.
pub fn metric_or_empty<T: Default>(metric: &str, result: ChartweaveResult<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!(metric, error = %e, kind = %e.kind(), "Metric dropped");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_values_have_the_documented_shape() {
        assert_eq!(Fallback::Null.value(), Value::Null);
        assert_eq!(Fallback::EmptyObject.value(), serde_json::json!({}));
        assert_eq!(Fallback::EmptyList.value(), serde_json::json!([]));
    }

    #[test]
    fn metric_or_empty_swallows_shape_errors() {
        let err: ChartweaveResult<Vec<TimePoint>> = Err(DataError::ShapeMismatch {
            index: 1,
            expected: 1,
            found: 2,
        }
        .into());
        assert!(metric_or_empty("volume", err).is_empty());
    }
}
