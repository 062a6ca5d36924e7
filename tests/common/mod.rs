#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use chartweave::prelude::*;
use serde_json::{Value, json};

pub const DAY: i64 = 86_400;

/// Pinned "now" of every fixture: day 30 at 00:00 UTC.
pub const NOW: i64 = 30 * DAY;

pub fn series(points: &[(i64, f64)]) -> Value {
    Value::Array(points.iter().map(|(ts, v)| json!([ts, v])).collect())
}

pub fn protocol_upstream() -> StaticUpstream {
    let record = |ts: i64, v: f64| json!({ "date": ts, "totalLiquidityUSD": v });
    StaticUpstream::new()
        .with_json(
            "/protocols/uniswap",
            json!({
                "chainTvls": {
                    "Ethereum": { "tvl": [record(0, 400.0), record(DAY, 420.0)] },
                    "Arbitrum": { "tvl": [record(0, 80.0), record(DAY, 90.0)] },
                    "Optimism": { "tvl": [record(DAY, 20.0)] },
                    "Ethereum-staking": { "tvl": [record(0, 5.0)] }
                }
            }),
        )
        .with_json("/protocols/uniswap/fees", series(&[(0, 10.0), (DAY, 12.0)]))
        .with_json("/protocols/uniswap/revenue", series(&[(DAY, 2.0)]))
        .with_json("/protocols/uniswap/volume", series(&[(0, 1000.0), (DAY / 2, 500.0)]))
}

pub fn dashboard(upstream: &StaticUpstream, clock: &ManualClock) -> Dashboard {
    let cache = StalenessCache::new(ObjectStoreCache::in_memory()).with_clock(clock.clone());
    let config = PipelineConfig::default()
        .with_cache_ttl(Duration::from_secs(3600))
        .with_top_k(1);
    Dashboard::new(Arc::new(upstream.clone()), cache, config)
}
