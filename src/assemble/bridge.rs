use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    assemble::policy::{AssembleContext, Assembler, Fallback, PageSource, metric_or_empty, resolve},
    data::{
        bucket::{bucket, cumulative},
        domain::{EntityKind, Granularity, TimePoint},
        normalize::{percent_change, subtract, value_days_before},
    },
    error::ChartweaveResult,
    transport::source::SourceName,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BridgeSource {
    /// `[ts, deposits, withdrawals]` tuples in USD.
    Volume,
    /// `[ts, deposit_txs, withdrawal_txs]` tuples.
    Txs,
}

impl PageSource for BridgeSource {
    fn fallback(self) -> Fallback {
        Fallback::EmptyList
    }

    fn path(self, bridge: &str) -> String {
        match self {
            Self::Volume => format!("/bridges/{bridge}/volume"),
            Self::Txs => format!("/bridges/{bridge}/txs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BridgePage {
    pub bridge: String,
    /// Bucketed `[ts, deposits, withdrawals]`.
    pub volume: Vec<TimePoint>,
    pub cumulative_volume: Vec<TimePoint>,
    /// Deposits minus withdrawals per bucket.
    pub net_flow: Vec<TimePoint>,
    pub txs: Vec<TimePoint>,
    /// Day-over-day change of total (deposits + withdrawals) volume.
    pub volume_change_1d: Option<f64>,
    pub failed_sources: Vec<SourceName>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeAssembler;

#[async_trait]
impl Assembler for BridgeAssembler {
    const KIND: EntityKind = EntityKind::Bridge;
    type Source = BridgeSource;
    type Page = BridgePage;

    #[tracing::instrument(skip_all, fields(bridge = %bridge))]
    async fn assemble(&self, ctx: &AssembleContext, bridge: &str) -> ChartweaveResult<BridgePage> {
        let mut sources = resolve::<BridgeSource>(ctx, Self::KIND, bridge).await?;

        let raw_volume = sources.points(BridgeSource::Volume);
        let volume = metric_or_empty("volume", bucket(&raw_volume, ctx.granularity));
        let cumulative_volume = metric_or_empty("volume", cumulative(&volume));
        let net_flow = subtract(&field(&volume, 0), &field(&volume, 1));

        // Always day over day, whatever the chart granularity.
        let daily_gross = gross(&metric_or_empty(
            "volume",
            bucket(&raw_volume, Granularity::Daily),
        ));
        let volume_change_1d = percent_change(
            value_days_before(&daily_gross, 0),
            value_days_before(&daily_gross, 1),
        );

        let txs = metric_or_empty(
            "txs",
            bucket(&sources.points(BridgeSource::Txs), ctx.granularity),
        );

        sources.ensure_any_ok()?;

        Ok(BridgePage {
            bridge: bridge.to_string(),
            volume,
            cumulative_volume,
            net_flow,
            txs,
            volume_change_1d,
            failed_sources: sources.into_failed(),
        })
    }
}

/// Deposits plus withdrawals per point.
fn gross(points: &[TimePoint]) -> Vec<TimePoint> {
    points
        .iter()
        .map(|p| TimePoint::scalar(p.timestamp.0, p.values.iter().sum()))
        .collect()
}

/// Projects field `index` of every point into a scalar series.
fn field(points: &[TimePoint], index: usize) -> Vec<TimePoint> {
    points
        .iter()
        .filter_map(|p| Some(TimePoint::scalar(p.timestamp.0, p.field(index)?)))
        .collect()
}
