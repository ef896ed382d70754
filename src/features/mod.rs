pub mod engine;
pub mod zscore;

pub use engine::{FeatureConfig, FeatureEngine};
pub use zscore::{trailing_zscore, ZScore};
