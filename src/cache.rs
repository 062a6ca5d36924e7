pub mod clock;
pub mod key;
pub mod stale;
pub mod store;
