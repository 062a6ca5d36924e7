use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    assemble::policy::{AssembleContext, Assembler, Fallback, PageSource, metric_or_empty, resolve},
    data::{
        breakdown::{Breakdown, breakdown_by_category},
        bucket::{bucket, cumulative},
        domain::{EntityKind, NamedSeries, TimePoint},
        join::{JoinedTable, join},
        normalize::{DailyCollapse, collapse_daily, filter_out_today, sum_by_timestamp},
    },
    error::{ChartweaveResult, DataError},
    transport::{codec::SeriesPayload, source::SourceName},
};

/// Value key of one TVL record inside `chainTvls`.
const TVL_VALUE_KEY: &str = "totalLiquidityUSD";

/// Sources behind a protocol page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProtocolSource {
    /// `{ "chainTvls": { "<chain>": { "tvl": [{ "date", "totalLiquidityUSD" }] } } }`
    Tvl,
    Fees,
    Revenue,
    Volume,
}

impl PageSource for ProtocolSource {
    fn fallback(self) -> Fallback {
        match self {
            Self::Tvl => Fallback::EmptyObject,
            Self::Fees | Self::Revenue | Self::Volume => Fallback::EmptyList,
        }
    }

    fn path(self, protocol: &str) -> String {
        match self {
            Self::Tvl => format!("/protocols/{protocol}"),
            Self::Fees => format!("/protocols/{protocol}/fees"),
            Self::Revenue => format!("/protocols/{protocol}/revenue"),
            Self::Volume => format!("/protocols/{protocol}/volume"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtocolPage {
    pub protocol: String,
    /// Top chains by TVL, the rest folded into `"Others"`.
    pub tvl_by_chain: Breakdown,
    pub total_tvl: Vec<TimePoint>,
    /// Columns `Fees` and `Revenue`.
    pub fees_and_revenue: JoinedTable,
    pub cumulative_fees: Vec<TimePoint>,
    pub volume: Vec<TimePoint>,
    pub failed_sources: Vec<SourceName>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolAssembler;

#[async_trait]
impl Assembler for ProtocolAssembler {
    const KIND: EntityKind = EntityKind::Protocol;
    type Source = ProtocolSource;
    type Page = ProtocolPage;

    #[tracing::instrument(skip_all, fields(protocol = %protocol))]
    async fn assemble(&self, ctx: &AssembleContext, protocol: &str) -> ChartweaveResult<ProtocolPage> {
        let mut sources = resolve::<ProtocolSource>(ctx, Self::KIND, protocol).await?;
        let now = ctx.now();

        // === TVL by chain ===
        let mut chains = sources.decode(ProtocolSource::Tvl, chain_tvls);
        for s in &mut chains {
            let daily = metric_or_empty("tvl", collapse_daily(&s.points, DailyCollapse::Last));
            s.points = filter_out_today(&daily, now);
        }
        let total_tvl = sum_by_timestamp(&chains);
        let tvl_by_chain = breakdown_by_category(&chains, ctx.top_k);

        // === Fees & revenue ===
        let fees = metric_or_empty(
            "fees",
            bucket(&sources.points(ProtocolSource::Fees), ctx.granularity),
        );
        let revenue = metric_or_empty(
            "revenue",
            bucket(&sources.points(ProtocolSource::Revenue), ctx.granularity),
        );
        let cumulative_fees = metric_or_empty("fees", cumulative(&fees));
        let fees_and_revenue = join(&[
            NamedSeries::new("Fees", fees),
            NamedSeries::new("Revenue", revenue),
        ]);

        // === Volume ===
        let volume = metric_or_empty(
            "volume",
            bucket(&sources.points(ProtocolSource::Volume), ctx.granularity),
        );

        sources.ensure_any_ok()?;

        Ok(ProtocolPage {
            protocol: protocol.to_string(),
            tvl_by_chain,
            total_tvl,
            fees_and_revenue,
            cumulative_fees,
            volume,
            failed_sources: sources.into_failed(),
        })
    }
}

/// `borrowed`, `pool2` and `staking` are reported beside the chain TVL, not in it.
pub fn is_ignored_chain_key(key: &str) -> bool {
    matches!(key, "borrowed" | "pool2" | "staking")
        || key.contains("-borrowed")
        || key.contains("-pool2")
        || key.contains("-staking")
}

/// Decodes the `chainTvls` object into one series per chain.
fn chain_tvls(payload: &Value) -> Result<Vec<NamedSeries>, DataError> {
    let chains = match payload.get("chainTvls") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(chains)) => chains,
        Some(_) => {
            return Err(DataError::MalformedSeries(
                "chainTvls is not an object".to_string(),
            ));
        }
    };

    chains
        .iter()
        .filter(|(chain, _)| !is_ignored_chain_key(chain))
        .map(|(chain, entry)| {
            let points = match entry.get("tvl") {
                Some(records) => records.records(&[TVL_VALUE_KEY])?,
                None => entry.points()?,
            };
            Ok(NamedSeries::new(chain.as_str(), points))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        data::domain::{Granularity, OTHERS_LABEL, Timestamp},
        transport::source::StaticUpstream,
    };

    const DAY: i64 = 86_400;

    fn ctx(upstream: StaticUpstream, top_k: usize) -> AssembleContext {
        AssembleContext::new(Arc::new(upstream))
            .with_granularity(Granularity::Daily)
            .with_top_k(top_k)
            .with_now(Timestamp(5 * DAY))
    }

    fn tvl(values: &[(i64, f64)]) -> Value {
        let records: Vec<_> = values
            .iter()
            .map(|(ts, v)| json!({ "date": ts, TVL_VALUE_KEY: v }))
            .collect();
        json!({ "tvl": records })
    }

    fn upstream() -> StaticUpstream {
        StaticUpstream::new()
            .with_json(
                "/protocols/aave-v3",
                json!({
                    "chainTvls": {
                        "Ethereum": tvl(&[(0, 100.0), (DAY, 120.0)]),
                        "Arbitrum": tvl(&[(0, 30.0), (DAY, 40.0)]),
                        "Polygon": tvl(&[(0, 5.0), (DAY, 6.0), (5 * DAY, 1e9)]),
                        "Base": tvl(&[(DAY, 2.0)]),
                        "Ethereum-borrowed": tvl(&[(0, 80.0)]),
                        "staking": tvl(&[(0, 1.0)])
                    }
                }),
            )
            .with_json("/protocols/aave-v3/fees", json!([[0, 2.0], [3600, 1.0], [DAY, 4.0]]))
            .with_json("/protocols/aave-v3/revenue", json!({ "86400": 1.5 }))
            .with_json("/protocols/aave-v3/volume", json!([[0, 10.0], [DAY, 20.0]]))
    }

    #[test]
    fn ignored_chain_keys() {
        assert!(is_ignored_chain_key("staking"));
        assert!(is_ignored_chain_key("Ethereum-pool2"));
        assert!(is_ignored_chain_key("Arbitrum-borrowed"));
        assert!(!is_ignored_chain_key("Ethereum"));
        assert!(!is_ignored_chain_key("Stakingchain"));
    }

    #[tokio::test]
    async fn breaks_tvl_down_by_chain() {
        let page = ProtocolAssembler
            .assemble(&ctx(upstream(), 2), "Aave V3")
            .await
            .unwrap();

        assert!(page.failed_sources.is_empty());
        let legend: Vec<_> = page.tvl_by_chain.legend.iter().map(|l| l.as_str()).collect();
        assert_eq!(legend, vec!["Ethereum", "Arbitrum", OTHERS_LABEL]);
        assert_eq!(page.tvl_by_chain.others_count, 2);
        assert_eq!(
            page.tvl_by_chain.table.get(Timestamp(DAY), OTHERS_LABEL),
            Some(Some(8.0))
        );

        // Ignored keys and today's point stay out of the total.
        assert_eq!(
            page.total_tvl,
            vec![TimePoint::scalar(0, 135.0), TimePoint::scalar(DAY, 168.0)]
        );
    }

    #[tokio::test]
    async fn fees_are_bucketed_joined_and_accumulated() {
        let page = ProtocolAssembler
            .assemble(&ctx(upstream(), 10), "aave-v3")
            .await
            .unwrap();

        assert_eq!(page.fees_and_revenue.get(Timestamp(0), "Fees"), Some(Some(3.0)));
        assert_eq!(page.fees_and_revenue.get(Timestamp(0), "Revenue"), Some(None));
        assert_eq!(page.fees_and_revenue.get(Timestamp(DAY), "Revenue"), Some(Some(1.5)));
        assert_eq!(
            page.cumulative_fees,
            vec![TimePoint::scalar(0, 3.0), TimePoint::scalar(DAY, 7.0)]
        );
        assert_eq!(page.volume.len(), 2);
    }

    #[tokio::test]
    async fn malformed_chain_tvls_is_a_failed_source() {
        let upstream = upstream().with_json("/protocols/aave-v3", json!({ "chainTvls": [1, 2] }));
        let page = ProtocolAssembler
            .assemble(&ctx(upstream, 10), "aave-v3")
            .await
            .unwrap();

        let failed: Vec<_> = page.failed_sources.iter().map(SourceName::as_str).collect();
        assert_eq!(failed, vec!["tvl"]);
        assert!(page.tvl_by_chain.table.is_empty());
        assert!(!page.fees_and_revenue.is_empty());
    }
}
