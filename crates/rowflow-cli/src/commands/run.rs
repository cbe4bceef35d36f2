use std::io::Write;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use rowflow_engine::config::{build_pipeline, parser, validator};
use rowflow_engine::Context as PipelineContext;
use rowflow_types::{Row, RowBatch};

/// Read a JSON array of rows and chunk it into batches.
fn read_input(path: &Path, batch_size: usize) -> Result<Vec<RowBatch>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    let rows: Vec<Row> =
        serde_json::from_str(&content).context("Input must be a JSON array of row arrays")?;
    Ok(rows
        .chunks(batch_size.max(1))
        .map(|chunk| RowBatch::new(chunk.to_vec()))
        .collect())
}

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(
    pipeline_path: &Path,
    input_path: &Path,
    batch_size: usize,
    limit: Option<u64>,
) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate
    validator::validate_pipeline(&config)?;

    tracing::info!(
        pipeline = config.pipeline,
        steps = config.steps.len(),
        reroute = config.error.is_some(),
        "Pipeline validated"
    );

    // 3. Run
    let start = Instant::now();
    let batches = read_input(input_path, batch_size)?;
    let mut source = build_pipeline(&config)
        .run_batches(batches, PipelineContext::root())
        .await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut rows = 0u64;
    let mut printed = 0u64;
    while let Some(batch) = source.next_batch().await {
        for row in batch?.rows() {
            rows += 1;
            if limit.is_some_and(|max| printed >= max) {
                continue;
            }
            serde_json::to_writer(&mut out, row)?;
            writeln!(out)?;
            printed += 1;
        }
    }
    out.flush()?;

    let duration_secs = start.elapsed().as_secs_f64();
    eprintln!("Pipeline '{}' completed successfully.", config.pipeline);
    eprintln!("  Columns:         {}", source.header().names().join(", "));
    eprintln!("  Rows emitted:    {rows}");
    if printed < rows {
        eprintln!("  Rows printed:    {printed} (limit)");
    }
    eprintln!("  Duration:        {duration_secs:.3}s");

    Ok(())
}
