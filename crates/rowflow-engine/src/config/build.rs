//! Turn a validated [`PipelineConfig`] into a runnable [`Pipeline`].

use std::sync::Arc;

use crate::config::types::{PipelineConfig, StepConfig};
use crate::fork::{Fork, ForkMerge, SplitIn};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::source::Transformer;
use crate::transforms::{
    AddColumn, Normalize, ProbeCapture, ProbeRestore, RemoveColumns, RenameColumn, Select,
};

/// Build transformers for `steps`. Fork stages take their channel buffer
/// from the context they run in.
#[must_use]
pub fn build_steps(steps: &[StepConfig]) -> Vec<Arc<dyn Transformer>> {
    steps.iter().map(build_step).collect()
}

fn build_branches(branches: &[Vec<StepConfig>]) -> Vec<Vec<Arc<dyn Transformer>>> {
    branches.iter().map(|steps| build_steps(steps)).collect()
}

fn build_step(step: &StepConfig) -> Arc<dyn Transformer> {
    match step {
        StepConfig::Select {
            columns,
            reorder,
            add_missing,
        } => Arc::new(
            Select::new(columns.clone())
                .reorder(*reorder)
                .add_missing(*add_missing),
        ),
        StepConfig::Remove { columns } => Arc::new(RemoveColumns::new(columns.clone())),
        StepConfig::Rename {
            from,
            to,
            occurrence,
        } => {
            let rename = RenameColumn::new(from.clone(), to.clone());
            match occurrence {
                Some(n) => Arc::new(rename.occurrence(*n)),
                None => Arc::new(rename),
            }
        }
        StepConfig::Add { column, value } => Arc::new(AddColumn::new(column.clone(), value.clone())),
        StepConfig::Normalize => Arc::new(Normalize),
        StepConfig::ProbeCapture { name, column } => {
            Arc::new(ProbeCapture::new(name.clone(), column.clone()))
        }
        StepConfig::ProbeRestore { name, column } => {
            Arc::new(ProbeRestore::new(name.clone(), column.clone()))
        }
        StepConfig::Fork { steps } => Arc::new(Fork::new(build_steps(steps))),
        StepConfig::ForkMerge {
            output_columns,
            branches,
        } => Arc::new(ForkMerge::new(
            build_branches(branches),
            output_columns.clone(),
        )),
        StepConfig::MergeFork {
            output_columns,
            branches,
        } => Arc::new(ForkMerge::merge_fork(
            build_branches(branches),
            output_columns.clone(),
        )),
        StepConfig::SplitIn { keys, steps } => {
            Arc::new(SplitIn::new(keys.clone(), build_steps(steps)))
        }
    }
}

/// Assemble a pipeline from its file model.
#[must_use]
pub fn build_pipeline(config: &PipelineConfig) -> Pipeline {
    let error = config.error.clone().unwrap_or_default();
    let options = PipelineOptions {
        input_header: config.input.header,
        force_columns_count: config.input.force_columns_count,
        force_columns: config.output.force_columns.clone(),
        skip_header_row: config.output.skip_header_row,
        error_column: error.column,
        channel_buffer: config.resources.channel_buffer,
    };
    Pipeline::new(config.pipeline.clone())
        .options(options)
        .transforms(build_steps(&config.steps))
        .recovery(build_steps(&error.recovery))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;
    use crate::context::Context;
    use rowflow_types::{row, RowBatch};

    #[tokio::test]
    async fn builds_and_runs_declared_steps() {
        let config = parse_pipeline_str(
            r#"
version: "1.0"
pipeline: shape
steps:
  - rename: { from: a, to: x }
  - add: { column: tag, value: t }
  - remove: { columns: [b] }
  - normalize
  - select: { columns: [tag, x] }
"#,
        )
        .unwrap();
        let pipeline = build_pipeline(&config);
        assert_eq!(pipeline.name(), "shape");
        let out = pipeline
            .run_batches(
                vec![RowBatch::new(vec![row!["a", "b"], row![1, 2]])],
                Context::root(),
            )
            .await
            .unwrap();
        let rows = out.collect_rows().await.unwrap();
        assert_eq!(rows, vec![row!["tag", "x"], row!["t", 1]]);
    }

    #[tokio::test]
    async fn split_in_and_output_options_from_yaml() {
        let config = parse_pipeline_str(
            r#"
version: "1.0"
pipeline: groups
input:
  header: column_num
output:
  force_columns: [Col1, group]
  skip_header_row: true
resources:
  channel_buffer: 2
steps:
  - split_in:
      keys: [Col1]
      steps:
        - add: { column: group, value: 1 }
"#,
        )
        .unwrap();
        assert_eq!(config.resources.channel_buffer, 2);
        let out = build_pipeline(&config)
            .run_batches(
                vec![RowBatch::new(vec![row![1], row![1], row![2]])],
                Context::root(),
            )
            .await
            .unwrap();
        let rows = out.collect_rows().await.unwrap();
        assert_eq!(rows, vec![row![1, 1], row![1, 1], row![2, 1]]);
    }

    #[tokio::test]
    async fn construction_errors_bypass_error_column() {
        let config = parse_pipeline_str(
            r#"
version: "1.0"
pipeline: reroute
error:
  column: failure
steps:
  - select: { columns: [missing] }
"#,
        )
        .unwrap();
        let err = build_pipeline(&config)
            .run_batches(
                vec![RowBatch::new(vec![row!["a"], row![1]])],
                Context::root(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "COLUMNS_NOT_FOUND");
    }
}
