use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    assemble::policy::{AssembleContext, Assembler, Fallback, PageSource, metric_or_empty, resolve},
    data::{
        breakdown::{Breakdown, breakdown_by_category},
        domain::{EntityKind, TimePoint},
        normalize::{
            DailyCollapse, collapse_daily, dominance_percent, filter_out_today, percent_change,
            sum_by_timestamp, value_days_before,
        },
    },
    error::ChartweaveResult,
    transport::source::SourceName,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum StablecoinSource {
    /// `{ "<chain>": [[ts, circulating], ...] }`
    ChainBalances,
    Price,
    /// Market cap of every stablecoin combined.
    TotalMcap,
}

impl PageSource for StablecoinSource {
    fn fallback(self) -> Fallback {
        match self {
            Self::ChainBalances => Fallback::EmptyObject,
            Self::Price => Fallback::EmptyList,
            Self::TotalMcap => Fallback::Null,
        }
    }

    fn path(self, asset: &str) -> String {
        match self {
            Self::ChainBalances => format!("/stablecoins/{asset}/chains"),
            Self::Price => format!("/stablecoins/{asset}/price"),
            Self::TotalMcap => "/stablecoins/total-mcap".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StablecoinPage {
    pub asset: String,
    pub circulating_by_chain: Breakdown,
    pub total_circulating: Vec<TimePoint>,
    pub price: Vec<TimePoint>,
    pub supply_change_7d: Option<f64>,
    /// Latest circulating supply times latest price, or the supply alone at peg.
    pub mcap: Option<f64>,
    /// Share of the whole stablecoin market, in percent.
    pub dominance: Option<f64>,
    pub failed_sources: Vec<SourceName>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StablecoinAssembler;

#[async_trait]
impl Assembler for StablecoinAssembler {
    const KIND: EntityKind = EntityKind::Stablecoin;
    type Source = StablecoinSource;
    type Page = StablecoinPage;

    #[tracing::instrument(skip_all, fields(asset = %asset))]
    async fn assemble(&self, ctx: &AssembleContext, asset: &str) -> ChartweaveResult<StablecoinPage> {
        let mut sources = resolve::<StablecoinSource>(ctx, Self::KIND, asset).await?;
        let now = ctx.now();

        let mut chains = sources.labeled(StablecoinSource::ChainBalances);
        for s in &mut chains {
            let daily =
                metric_or_empty("circulating", collapse_daily(&s.points, DailyCollapse::Last));
            s.points = filter_out_today(&daily, now);
        }
        let total_circulating = sum_by_timestamp(&chains);
        let circulating_by_chain = breakdown_by_category(&chains, ctx.top_k);

        let supply = value_days_before(&total_circulating, 0);
        let supply_change_7d = percent_change(supply, value_days_before(&total_circulating, 7));

        let price = sources.points(StablecoinSource::Price);
        let mcap = supply.map(|s| match price.last().and_then(TimePoint::value) {
            Some(p) => s * p,
            None => s,
        });
        let dominance = mcap
            .zip(sources.scalar(StablecoinSource::TotalMcap))
            .map(|(mcap, total)| dominance_percent(mcap, total));

        sources.ensure_any_ok()?;

        Ok(StablecoinPage {
            asset: asset.to_string(),
            circulating_by_chain,
            total_circulating,
            price,
            supply_change_7d,
            mcap,
            dominance,
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
        data::domain::{OTHERS_LABEL, Timestamp},
        transport::source::StaticUpstream,
    };

    const DAY: i64 = 86_400;

    fn ctx(upstream: StaticUpstream) -> AssembleContext {
        AssembleContext::new(Arc::new(upstream))
            .with_top_k(1)
            .with_now(Timestamp(9 * DAY))
    }

    fn balances() -> serde_json::Value {
        let eth: Vec<_> = (0..9).map(|d| json!([d * DAY, 100.0 + d as f64])).collect();
        json!({
            "Ethereum": eth,
            "Tron": [[0, 50.0], [8 * DAY, 60.0]],
            "Solana": [[8 * DAY, 10.0]]
        })
    }

    #[tokio::test]
    async fn supply_is_broken_down_and_priced() {
        let upstream = StaticUpstream::new()
            .with_json("/stablecoins/usdt/chains", balances())
            .with_json("/stablecoins/usdt/price", json!([[8 * DAY, 0.5]]))
            .with_json("/stablecoins/total-mcap", json!(356.0));
        let page = StablecoinAssembler
            .assemble(&ctx(upstream), "USDT")
            .await
            .unwrap();

        assert!(page.failed_sources.is_empty());
        assert_eq!(page.circulating_by_chain.legend.len(), 2);
        assert_eq!(page.circulating_by_chain.others_count, 2);

        // 108 + 60 + 10 on the last day, 101 + 0 on the day 7 points earlier
        assert_eq!(page.total_circulating.last(), Some(&TimePoint::scalar(8 * DAY, 178.0)));
        assert_eq!(page.mcap, Some(89.0));
        assert_eq!(page.dominance, Some(25.0));
        let change = page.supply_change_7d.unwrap();
        assert!((change - (178.0 - 101.0) / 101.0 * 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tied_chains_rank_in_payload_order() {
        let upstream = StaticUpstream::new().with_json(
            "/stablecoins/usdd/chains",
            json!({ "Tron": [[0, 5.0]], "Ethereum": [[0, 5.0]] }),
        );
        let page = StablecoinAssembler
            .assemble(&ctx(upstream), "usdd")
            .await
            .unwrap();

        let legend: Vec<_> = page.circulating_by_chain.legend.iter().map(|l| l.as_str()).collect();
        assert_eq!(legend, vec!["Tron", OTHERS_LABEL]);
    }

    #[tokio::test]
    async fn missing_price_assumes_the_peg() {
        let upstream = StaticUpstream::new()
            .with_json("/stablecoins/usdc/chains", balances())
            .with_status("/stablecoins/usdc/price", 500);
        let page = StablecoinAssembler
            .assemble(&ctx(upstream), "usdc")
            .await
            .unwrap();

        assert_eq!(page.mcap, Some(178.0));
        assert_eq!(page.dominance, None);
        let failed: Vec<_> = page.failed_sources.iter().map(SourceName::as_str).collect();
        assert_eq!(failed, vec!["price", "total_mcap"]);
    }
}
