use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pt_engine::{RunLog, Tuner, TunerConfig};

/// Tune planner hyperparameters against a suite of test problems.
#[derive(Debug, Parser)]
#[command(name = "pt-tune", version)]
struct Args {
    /// JSON run configuration
    config: PathBuf,

    /// Continue from the checkpoint in the output directory
    #[arg(long)]
    resume: bool,

    /// Seed for the sampling RNG (overrides the config)
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = TunerConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    let log_path = config.run_log_path();
    let log = if args.resume {
        RunLog::append(&log_path)
    } else {
        RunLog::create(&log_path)
    }
    .with_context(|| format!("opening run log {}", log_path.display()))?;

    let mut tuner = Tuner::new(config)?.with_run_log(log);
    let mut state = tuner.initial_state(args.resume, args.seed)?;
    tuner.run(&mut state).await?;

    info!(
        "Best-known parameters written to {}",
        tuner.params_path().display()
    );
    println!("{}", serde_json::to_string_pretty(&state.status)?);
    Ok(())
}
