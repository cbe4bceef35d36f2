//! Declarative pipeline files: parse, validate, build.

pub mod build;
pub mod parser;
pub mod types;
pub mod validator;

pub use build::{build_pipeline, build_steps};
pub use parser::{parse_pipeline, parse_pipeline_str};
pub use types::{PipelineConfig, StepConfig};
pub use validator::validate_pipeline;

use std::path::Path;

use crate::pipeline::Pipeline;

/// Parse, validate, and build the pipeline at `path`.
///
/// # Errors
///
/// Returns parse or validation failures.
pub fn load_pipeline(path: &Path) -> anyhow::Result<Pipeline> {
    let config = parse_pipeline(path)?;
    validate_pipeline(&config)?;
    Ok(build_pipeline(&config))
}
