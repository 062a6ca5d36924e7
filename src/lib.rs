//! Cross-source metric aggregation for DeFi dashboards.
//!
//! A page (chain, protocol, bridge, stablecoin) is assembled by fetching all of
//! its upstream sources concurrently, substituting a fallback for each source
//! that fails, normalizing the series onto a common time axis and joining them
//! into chart-ready tables. Finished pages sit behind a TTL-gated object cache.
//!
//! See [`dashboard::Dashboard`] for the entry point.

mod macros;

pub mod assemble;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod error;
pub mod prelude;
pub mod transport;
