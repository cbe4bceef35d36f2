//! Reading pipeline files.
//!
//! A pipeline file is YAML. `${NAME}` placeholders anywhere in the text are
//! replaced from the process environment before the YAML is parsed, so step
//! parameters such as split keys or added values can come from the shell.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::types::PipelineConfig;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

/// Replace every `${NAME}` in `text` with the value of the environment
/// variable `NAME`.
///
/// # Errors
///
/// Fails listing every unset variable, each named once.
pub fn substitute_env_vars(text: &str) -> Result<String> {
    let mut unset: Vec<String> = Vec::new();
    let substituted = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| {
            if !unset.iter().any(|n| n == name) {
                unset.push(name.to_string());
            }
            String::new()
        })
    });
    if !unset.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", unset.join(", "));
    }
    Ok(substituted.into_owned())
}

/// Parse pipeline YAML text.
///
/// # Errors
///
/// Fails on unset placeholders, malformed YAML, or unknown step kinds.
pub fn parse_pipeline_str(text: &str) -> Result<PipelineConfig> {
    let text = substitute_env_vars(text)?;
    serde_yaml::from_str(&text).context("Failed to parse pipeline YAML")
}

/// Read and parse a pipeline file.
///
/// # Errors
///
/// Fails if the file is unreadable, otherwise as [`parse_pipeline_str`].
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::StepConfig;
    use crate::ingest::InputHeaderMode;
    use rowflow_types::Value;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("RF_TEST_HOST", "myhost.example.com");
        let input = "pipeline: ${RF_TEST_HOST}\nversion: 1.0";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("myhost.example.com"));
        assert!(!result.contains("${RF_TEST_HOST}"));
        std::env::remove_var("RF_TEST_HOST");
    }

    #[test]
    fn test_multiple_env_vars() {
        std::env::set_var("RF_TEST_A", "alpha");
        std::env::set_var("RF_TEST_B", "beta");
        let input = "${RF_TEST_A} and ${RF_TEST_B}";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "alpha and beta");
        std::env::remove_var("RF_TEST_A");
        std::env::remove_var("RF_TEST_B");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "pipeline: local\nversion: 1.0";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_missing_env_var_errors() {
        let input = "pipeline: ${RF_DEFINITELY_NOT_SET_12345}";
        let result = substitute_env_vars(input);
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("RF_DEFINITELY_NOT_SET_12345"));
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let input = "${RF_MISSING_X} and ${RF_MISSING_Y}";
        let result = substitute_env_vars(input);
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("RF_MISSING_X"));
        assert!(err_msg.contains("RF_MISSING_Y"));
    }

    #[test]
    fn test_parse_pipeline_from_string() {
        std::env::set_var("RF_TEST_KEY", "region");
        std::env::set_var("RF_TEST_LABEL", "eu-west");
        let yaml = r#"
version: "1.0"
pipeline: test
steps:
  - split_in:
      keys: [${RF_TEST_KEY}]
      steps:
        - add: { column: label, value: ${RF_TEST_LABEL} }
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.pipeline, "test");
        let StepConfig::SplitIn { keys, steps } = &config.steps[0] else {
            panic!("expected split_in, got {}", config.steps[0].kind());
        };
        assert_eq!(keys, &vec!["region".to_string()]);
        assert!(matches!(
            &steps[0],
            StepConfig::Add { value, .. } if *value == Value::from("eu-west")
        ));
        std::env::remove_var("RF_TEST_KEY");
        std::env::remove_var("RF_TEST_LABEL");
    }

    #[test]
    fn test_defaults_when_sections_omitted() {
        let config = parse_pipeline_str("version: \"1.0\"\npipeline: bare\n").unwrap();
        assert!(config.steps.is_empty());
        assert!(config.error.is_none());
        assert_eq!(config.resources.channel_buffer, 0);
        assert_eq!(config.input.header, InputHeaderMode::FirstRow { trim: false });
        assert!(!config.output.skip_header_row);
    }

    #[test]
    fn test_header_modes_parse() {
        let yaml = r#"
version: "1.0"
pipeline: modes
input:
  header:
    first_row: { trim: true }
  force_columns_count: 4
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.input.header, InputHeaderMode::FirstRow { trim: true });
        assert_eq!(config.input.force_columns_count, Some(4));

        let config =
            parse_pipeline_str("version: \"1.0\"\npipeline: x\ninput:\n  header: excel_style\n")
                .unwrap();
        assert_eq!(config.input.header, InputHeaderMode::ExcelStyle);
    }

    #[test]
    fn test_unknown_step_kind_errors() {
        let yaml = "version: \"1.0\"\npipeline: x\nsteps:\n  - explode: { columns: [a] }\n";
        let err = parse_pipeline_str(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse pipeline YAML"));
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        let result = parse_pipeline_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_pipeline_file_not_found() {
        let result = parse_pipeline(Path::new("/nonexistent/pipeline.yaml"));
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Failed to read pipeline file"));
    }

    #[test]
    fn test_unset_variable_reported_once() {
        let err = substitute_env_vars("${RF_MISSING_Z}/${RF_MISSING_Z}").unwrap_err();
        assert_eq!(err.to_string(), "Missing environment variable(s): RF_MISSING_Z");
    }

    #[test]
    fn test_step_lists_use_single_key_maps() {
        let yaml = r#"
version: "1.0"
pipeline: shapes
input:
  header: column_num
steps:
  - normalize
  - rename: { from: Col1, to: id }
  - fork:
      steps:
        - probe_capture: { name: ids, column: id }
  - fork_merge:
      output_columns: [id, tag]
      branches:
        - - add: { column: tag, value: left }
        - []
error:
  column: error
  recovery:
    - select: { columns: [error] }
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.input.header, InputHeaderMode::ColumnNum);
        let kinds: Vec<_> = config.steps.iter().map(StepConfig::kind).collect();
        assert_eq!(kinds, vec!["normalize", "rename", "fork", "fork_merge"]);
        let StepConfig::ForkMerge { branches, .. } = &config.steps[3] else {
            panic!("expected fork_merge");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0][0].kind(), "add");
        assert!(branches[1].is_empty());
        let error = config.error.unwrap();
        assert_eq!(error.recovery[0].kind(), "select");
    }
}
