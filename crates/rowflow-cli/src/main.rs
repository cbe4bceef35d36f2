mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "rowflow",
    version,
    about = "Streaming row-batch transformation pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline over a JSON array of rows and print output rows as JSON lines
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Path to input rows (JSON array of arrays)
        #[arg(short, long)]
        input: PathBuf,
        /// Rows per ingested batch
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
        /// Maximum output rows to print
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Validate pipeline configuration
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            pipeline,
            input,
            batch_size,
            limit,
        } => commands::run::execute(&pipeline, &input, batch_size, limit).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
    }
}
