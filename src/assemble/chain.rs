use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    assemble::policy::{AssembleContext, Assembler, Fallback, PageSource, metric_or_empty, resolve},
    data::{
        bucket::{bucket, cumulative},
        domain::{EntityKind, NamedSeries, TimePoint},
        join::{JoinedTable, join},
        normalize::{DailyCollapse, collapse_daily, filter_out_today, percent_change, value_days_before},
    },
    error::ChartweaveResult,
    transport::{codec::SeriesPayload, source::SourceName},
};

/// Sources behind a chain page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChainSource {
    /// `{ "tvl": [...], "staking": [...], ... }`
    Tvl,
    DexVolume,
    Fees,
    Revenue,
    /// Total stablecoin market cap on the chain.
    Stablecoins,
    /// `[ts, deposits, withdrawals]` tuples.
    Inflows,
    ActiveUsers,
}

impl PageSource for ChainSource {
    fn fallback(self) -> Fallback {
        match self {
            Self::Tvl => Fallback::EmptyObject,
            Self::DexVolume | Self::Fees | Self::Revenue | Self::Stablecoins => Fallback::EmptyList,
            Self::Inflows | Self::ActiveUsers => Fallback::Null,
        }
    }

    fn path(self, chain: &str) -> String {
        match self {
            Self::Tvl => format!("/chains/{chain}/tvl"),
            Self::DexVolume => format!("/chains/{chain}/dex-volume"),
            Self::Fees => format!("/chains/{chain}/fees"),
            Self::Revenue => format!("/chains/{chain}/revenue"),
            Self::Stablecoins => format!("/chains/{chain}/stablecoins"),
            Self::Inflows => format!("/chains/{chain}/inflows"),
            Self::ActiveUsers => format!("/chains/{chain}/active-users"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChainPage {
    pub chain: String,
    /// One column per TVL kind (`tvl`, `staking`, `borrowed`, ...).
    pub tvl: JoinedTable,
    pub current_tvl: Option<f64>,
    pub tvl_change_1d: Option<f64>,
    pub dex_volume: Vec<TimePoint>,
    pub cumulative_dex_volume: Vec<TimePoint>,
    /// Columns `Fees` and `Revenue`.
    pub fees_and_revenue: JoinedTable,
    pub stablecoin_mcap: Option<f64>,
    pub stablecoin_change_7d: Option<f64>,
    pub net_inflow: Option<f64>,
    pub active_users: Option<f64>,
    pub failed_sources: Vec<SourceName>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChainAssembler;

#[async_trait]
impl Assembler for ChainAssembler {
    const KIND: EntityKind = EntityKind::Chain;
    type Source = ChainSource;
    type Page = ChainPage;

    #[tracing::instrument(skip_all, fields(chain = %chain))]
    async fn assemble(&self, ctx: &AssembleContext, chain: &str) -> ChartweaveResult<ChainPage> {
        let mut sources = resolve::<ChainSource>(ctx, Self::KIND, chain).await?;
        let now = ctx.now();

        // === TVL ===
        let mut tvl_kinds = sources.labeled(ChainSource::Tvl);
        for s in &mut tvl_kinds {
            let daily = metric_or_empty("tvl", collapse_daily(&s.points, DailyCollapse::Last));
            s.points = filter_out_today(&daily, now);
        }
        let headline = tvl_kinds
            .iter()
            .find(|s| s.label.as_str() == "tvl")
            .map(|s| s.points.as_slice())
            .unwrap_or_default();
        let current_tvl = value_days_before(headline, 0);
        let tvl_change_1d = percent_change(current_tvl, value_days_before(headline, 1));

        // === DEX volume ===
        let raw_volume = sources.points(ChainSource::DexVolume);
        let dex_volume = metric_or_empty("dex_volume", bucket(&raw_volume, ctx.granularity));
        let cumulative_dex_volume = metric_or_empty("dex_volume", cumulative(&dex_volume));

        // === Fees & revenue ===
        let fees = sources.points(ChainSource::Fees);
        let revenue = sources.points(ChainSource::Revenue);
        let fees_and_revenue = join(&[
            NamedSeries::new("Fees", metric_or_empty("fees", bucket(&fees, ctx.granularity))),
            NamedSeries::new(
                "Revenue",
                metric_or_empty("revenue", bucket(&revenue, ctx.granularity)),
            ),
        ]);

        // === Stablecoins ===
        let stables = sources.points(ChainSource::Stablecoins);
        let stablecoin_mcap = value_days_before(&stables, 0);
        let stablecoin_change_7d = percent_change(stablecoin_mcap, value_days_before(&stables, 7));

        // === Inflows & users ===
        let inflows = sources.points(ChainSource::Inflows);
        let net_inflow = inflows
            .last()
            .and_then(|p| Some(p.field(0)? - p.field(1)?));
        // A bare number, or a series whose last point is the latest count.
        let active_users = sources.decode(ChainSource::ActiveUsers, |v| match v.scalar() {
            Some(users) => Ok(Some(users)),
            None => Ok(v.points()?.last().and_then(TimePoint::value)),
        });

        sources.ensure_any_ok()?;

        Ok(ChainPage {
            chain: chain.to_string(),
            tvl: join(&tvl_kinds),
            current_tvl,
            tvl_change_1d,
            dex_volume,
            cumulative_dex_volume,
            fees_and_revenue,
            stablecoin_mcap,
            stablecoin_change_7d,
            net_inflow,
            active_users,
            failed_sources: sources.into_failed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        data::domain::{Granularity, Timestamp},
        error::{AssembleError, ChartweaveError},
        transport::source::StaticUpstream,
    };

    const DAY: i64 = 86_400;

    fn ctx(upstream: StaticUpstream) -> AssembleContext {
        AssembleContext::new(Arc::new(upstream))
            .with_granularity(Granularity::Daily)
            .with_now(Timestamp(10 * DAY))
    }

    fn full_upstream() -> StaticUpstream {
        StaticUpstream::new()
            .with_json(
                "/chains/ethereum/tvl",
                json!({
                    "tvl": [[0, 100.0], [DAY, 110.0], [DAY + 60, 120.0], [10 * DAY, 999.0]],
                    "staking": [[DAY, 7.0]]
                }),
            )
            .with_json("/chains/ethereum/dex-volume", json!([[0, 1.0], [60, 2.0], [DAY, 4.0]]))
            .with_json("/chains/ethereum/fees", json!([[0, 3.0], [DAY, 5.0]]))
            .with_json("/chains/ethereum/revenue", json!([[DAY, 1.0]]))
            .with_json("/chains/ethereum/stablecoins", json!([[0, 50.0], [DAY, 55.0]]))
            .with_json("/chains/ethereum/inflows", json!([[DAY, 30.0, 12.0]]))
            .with_json("/chains/ethereum/active-users", json!(4200))
    }

    #[test]
    fn fallback_table_is_explicit() {
        let table = ChainSource::fallback_table();
        assert_eq!(
            table,
            vec![
                (ChainSource::Tvl, Fallback::EmptyObject),
                (ChainSource::DexVolume, Fallback::EmptyList),
                (ChainSource::Fees, Fallback::EmptyList),
                (ChainSource::Revenue, Fallback::EmptyList),
                (ChainSource::Stablecoins, Fallback::EmptyList),
                (ChainSource::Inflows, Fallback::Null),
                (ChainSource::ActiveUsers, Fallback::Null),
            ]
        );
    }

    #[tokio::test]
    async fn assembles_a_full_chain_page() {
        let page = ChainAssembler
            .assemble(&ctx(full_upstream()), "Ethereum")
            .await
            .unwrap();

        assert!(page.failed_sources.is_empty());
        // today's point is dropped, the day keeps its last observation
        assert_eq!(page.current_tvl, Some(120.0));
        assert!((page.tvl_change_1d.unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(page.tvl.get(Timestamp(DAY), "staking"), Some(Some(7.0)));
        assert_eq!(page.tvl.get(Timestamp(0), "staking"), Some(None));

        assert_eq!(
            page.dex_volume,
            vec![TimePoint::scalar(0, 3.0), TimePoint::scalar(DAY, 4.0)]
        );
        assert_eq!(page.cumulative_dex_volume.last().unwrap().value(), Some(7.0));
        assert_eq!(page.fees_and_revenue.get(Timestamp(0), "Revenue"), Some(None));
        assert_eq!(page.stablecoin_mcap, Some(55.0));
        assert_eq!(page.stablecoin_change_7d, None);
        assert_eq!(page.net_inflow, Some(18.0));
        assert_eq!(page.active_users, Some(4200.0));
    }

    #[tokio::test]
    async fn failed_sources_fall_back_and_are_listed() {
        let upstream = full_upstream()
            .with_status("/chains/ethereum/fees", 500)
            .with_status("/chains/ethereum/inflows", 502);
        let page = ChainAssembler
            .assemble(&ctx(upstream), "ethereum")
            .await
            .unwrap();

        let failed: Vec<_> = page.failed_sources.iter().map(SourceName::as_str).collect();
        assert_eq!(failed, vec!["fees", "inflows"]);
        assert_eq!(page.net_inflow, None);
        assert!(page.fees_and_revenue.column("Fees").is_empty());
        assert_eq!(page.fees_and_revenue.column("Revenue").len(), 1);
    }

    #[tokio::test]
    async fn mixed_arity_volume_drops_only_that_metric() {
        let upstream = full_upstream()
            .with_json("/chains/ethereum/dex-volume", json!([[0, 1.0], [DAY, 4.0, 5.0]]));
        let page = ChainAssembler
            .assemble(&ctx(upstream), "ethereum")
            .await
            .unwrap();

        assert!(page.dex_volume.is_empty());
        assert!(page.cumulative_dex_volume.is_empty());
        assert_eq!(page.current_tvl, Some(120.0));
    }

    #[tokio::test]
    async fn every_source_failing_is_not_found() {
        let err = ChainAssembler
            .assemble(&ctx(StaticUpstream::new()), "atlantis")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(
            err,
            ChartweaveError::Assemble(AssembleError::AllSourcesFailed { .. })
        ));
    }
}
