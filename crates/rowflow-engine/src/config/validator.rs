//! Semantic validation for parsed pipeline configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::{PipelineConfig, StepConfig};
use crate::ingest::{InputHeaderMode, MAX_EXCEL_COLUMNS};

fn validate_columns(columns: &[String], context: &str, errors: &mut Vec<String>) {
    if columns.is_empty() {
        errors.push(format!("{context}: at least one column is required"));
    }
    if columns.iter().any(|c| c.trim().is_empty()) {
        errors.push(format!("{context}: column names must not be empty"));
    }
}

/// Validate a list of steps, recursing into branch steps.
fn validate_steps(steps: &[StepConfig], path: &str, errors: &mut Vec<String>) {
    for (i, step) in steps.iter().enumerate() {
        let context = format!("{path}[{i}] ({})", step.kind());
        match step {
            StepConfig::Select { columns, .. } | StepConfig::Remove { columns } => {
                validate_columns(columns, &context, errors);
            }
            StepConfig::Rename { from, to, .. } => {
                if from.trim().is_empty() || to.trim().is_empty() {
                    errors.push(format!("{context}: 'from' and 'to' must not be empty"));
                }
            }
            StepConfig::Add { column, .. } => {
                if column.trim().is_empty() {
                    errors.push(format!("{context}: column must not be empty"));
                }
            }
            StepConfig::Normalize => {}
            StepConfig::ProbeCapture { name, column } | StepConfig::ProbeRestore { name, column } => {
                if name.trim().is_empty() {
                    errors.push(format!("{context}: probe name must not be empty"));
                }
                if column.trim().is_empty() {
                    errors.push(format!("{context}: column must not be empty"));
                }
            }
            StepConfig::Fork { steps } => {
                validate_steps(steps, &format!("{path}[{i}].steps"), errors);
            }
            StepConfig::ForkMerge {
                output_columns,
                branches,
            }
            | StepConfig::MergeFork {
                output_columns,
                branches,
            } => {
                // merge_fork always has the main stream as a branch.
                if branches.is_empty() && matches!(step, StepConfig::ForkMerge { .. }) {
                    errors.push(format!("{context}: at least one branch is required"));
                }
                if output_columns.is_empty() {
                    errors.push(format!("{context}: output_columns must not be empty"));
                }
                let mut seen = HashSet::new();
                for column in output_columns {
                    if !seen.insert(column.as_str()) {
                        errors.push(format!("{context}: duplicate output column '{column}'"));
                    }
                }
                for (b, branch) in branches.iter().enumerate() {
                    validate_steps(branch, &format!("{path}[{i}].branches[{b}]"), errors);
                }
            }
            StepConfig::SplitIn { keys, steps } => {
                if keys.is_empty() {
                    errors.push(format!("{context}: at least one key column is required"));
                }
                validate_steps(steps, &format!("{path}[{i}].steps"), errors);
            }
        }
    }
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if let Some(count) = config.input.force_columns_count {
        if config.input.header == InputHeaderMode::ExcelStyle && count > MAX_EXCEL_COLUMNS {
            errors.push(format!(
                "force_columns_count {count} exceeds the {MAX_EXCEL_COLUMNS} excel-style column limit"
            ));
        }
    }

    if let Some(columns) = &config.output.force_columns {
        validate_columns(columns, "output.force_columns", &mut errors);
    }

    if let Some(error) = &config.error {
        match &error.column {
            Some(column) if column.trim().is_empty() => {
                errors.push("error.column must not be empty".to_string());
            }
            Some(_) => {}
            None if !error.recovery.is_empty() => {
                errors.push("error.recovery requires error.column".to_string());
            }
            None => {}
        }
        validate_steps(&error.recovery, "error.recovery", &mut errors);
    }

    validate_steps(&config.steps, "steps", &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
pipeline: test_pipeline
output:
  force_columns: [id, name, source]
steps:
  - rename: { from: full_name, to: name }
  - fork_merge:
      output_columns: [id, name, source]
      branches:
        - [ { add: { column: source, value: left } } ]
        - [ { add: { column: source, value: right } } ]
  - split_in:
      keys: [id]
      steps:
        - normalize
"#
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let config = parse_pipeline_str(valid_yaml()).unwrap();
        assert!(validate_pipeline(&config).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let yaml = valid_yaml().replace("\"1.0\"", "\"2.0\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported pipeline version"));
    }

    #[test]
    fn test_empty_pipeline_name_fails() {
        let yaml = valid_yaml().replace("test_pipeline", "\"\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Pipeline name must not be empty"));
    }

    #[test]
    fn test_split_in_without_keys_fails() {
        let yaml = valid_yaml().replace("keys: [id]", "keys: []");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("steps[2] (split_in): at least one key column is required"));
    }

    #[test]
    fn test_fork_merge_without_branches_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test_pipeline
steps:
  - fork_merge:
      output_columns: []
      branches: []
  - merge_fork:
      output_columns: [id]
      branches: []
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("steps[0] (fork_merge): at least one branch is required"));
        assert!(err.contains("output_columns must not be empty"));
        assert!(!err.contains("steps[1]"));
    }

    #[test]
    fn test_nested_branch_steps_are_validated() {
        let yaml = r#"
version: "1.0"
pipeline: nested
steps:
  - fork:
      steps:
        - split_in:
            keys: []
            steps: []
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("steps[0].steps[0] (split_in)"));
    }

    #[test]
    fn test_recovery_requires_error_column() {
        let yaml = r#"
version: "1.0"
pipeline: test_pipeline
error:
  recovery:
    - normalize
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("error.recovery requires error.column"));
    }

    #[test]
    fn test_excel_style_column_limit() {
        let yaml = r#"
version: "1.0"
pipeline: test_pipeline
input:
  header: excel_style
  force_columns_count: 1001
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("excel-style column limit"));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let yaml = r#"
version: "2.0"
pipeline: ""
steps:
  - remove: { columns: [] }
  - rename: { from: a, to: "" }
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported pipeline version"));
        assert!(err.contains("Pipeline name must not be empty"));
        assert!(err.contains("steps[0] (remove)"));
        assert!(err.contains("steps[1] (rename)"));
    }
}
