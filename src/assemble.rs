pub mod bridge;
pub mod chain;
pub mod policy;
pub mod protocol;
pub mod stablecoin;
