//! Pipeline orchestration for research-digest.
//!
//! This crate ties the collector registry, external processing steps,
//! same-run content dedup, and the run report into one staged run.

pub mod dedup;
pub mod external;
pub mod pipeline;
pub mod report;
mod scan;

pub use pipeline::{Pipeline, PipelineRun, ProgressReporter, SilentProgress, Stage, resolve_output_root};
