pub mod pipeline;
pub mod runner;

pub use pipeline::{PipelineReport, RegimePipeline};
pub use runner::{RegimeRunner, RunSummary};
