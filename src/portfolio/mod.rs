pub mod analysis;
pub mod export;
pub mod metrics;
pub mod optimizer;
