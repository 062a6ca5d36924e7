use std::{env, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chartweave::prelude::*;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DAY: i64 = 86_400;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // `CHARTWEAVE_LIVE=1` talks to the configured API instead of canned data.
    let dashboard = if env::var("CHARTWEAVE_LIVE").is_ok() {
        let cfg = PipelineConfig::from_env().context("Invalid CHARTWEAVE_* configuration")?;
        Dashboard::from_config(cfg)?
    } else {
        let cfg = PipelineConfig::default()
            .with_fetch_deadline(Duration::from_secs(2))
            .with_top_k(3);
        Dashboard::new(
            canned_upstream(),
            StalenessCache::new(cfg.object_cache()?),
            cfg,
        )
    };

    let page = dashboard.chain_page("Ethereum").await?;
    info!(
        current_tvl = ?page.current_tvl,
        failed = ?page.failed_sources,
        "Chain page assembled"
    );

    // Served from the cache this time.
    let again = dashboard.chain_page("ethereum").await?;
    assert_eq!(page, again);

    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

// ================================================================================================
// Tracing Configuration
// ================================================================================================

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .with_current_span(true)
        .with_thread_ids(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn canned_upstream() -> Arc<StaticUpstream> {
    let today = Timestamp::now().day_start().0;
    let days = |n: i64, f: fn(i64) -> f64| -> Vec<serde_json::Value> {
        (1..=n)
            .rev()
            .map(|d| json!([today - d * DAY, f(d)]))
            .collect()
    };

    let upstream = StaticUpstream::new()
        .with_json(
            "/chains/ethereum/tvl",
            json!({
                "tvl": days(30, |d| 60e9 - d as f64 * 1e8),
                "staking": days(30, |_| 12e9),
            }),
        )
        .with_json("/chains/ethereum/dex-volume", json!(days(30, |d| 1e9 + d as f64 * 1e7)))
        .with_json("/chains/ethereum/fees", json!(days(30, |_| 4e6)))
        .with_json("/chains/ethereum/revenue", json!(days(30, |_| 1.5e6)))
        .with_json("/chains/ethereum/stablecoins", json!(days(30, |d| 80e9 + d as f64)))
        .with_json("/chains/ethereum/inflows", json!([[today - DAY, 3.2e8, 2.9e8]]))
        // Unreachable on purpose: the page still renders, listing it as failed.
        .with_status("/chains/ethereum/active-users", 503)
        .with_latency("/chains/ethereum/fees", Duration::from_millis(150));

    Arc::new(upstream)
}
