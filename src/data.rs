pub mod breakdown;
pub mod bucket;
pub mod domain;
pub mod join;
pub mod normalize;
