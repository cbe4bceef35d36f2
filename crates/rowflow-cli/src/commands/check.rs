use std::path::Path;

use anyhow::{Context, Result};

use rowflow_engine::config::{build_pipeline, parser, validator, StepConfig};

/// Execute the `check` command: validate pipeline config and print its steps.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate pipeline structure
    validator::validate_pipeline(&config)?;
    println!("Pipeline structure: OK");

    // 3. Report the step tree
    let pipeline = build_pipeline(&config);
    println!("Pipeline '{}':", pipeline.name());
    print_steps(&config.steps, 1);
    if let Some(error) = &config.error {
        println!(
            "  error column: {}",
            error.column.as_deref().unwrap_or("<none>")
        );
        print_steps(&error.recovery, 2);
    }

    println!("\nAll checks passed.");
    Ok(())
}

fn print_steps(steps: &[StepConfig], depth: usize) {
    let indent = "  ".repeat(depth);
    for step in steps {
        println!("{indent}- {}", step.kind());
        match step {
            StepConfig::Fork { steps } | StepConfig::SplitIn { steps, .. } => {
                print_steps(steps, depth + 1);
            }
            StepConfig::ForkMerge { branches, .. } | StepConfig::MergeFork { branches, .. } => {
                for (i, branch) in branches.iter().enumerate() {
                    println!("{indent}  branch {i}:");
                    print_steps(branch, depth + 2);
                }
            }
            _ => {}
        }
    }
}
