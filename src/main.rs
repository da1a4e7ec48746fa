// src/main.rs
// Command-line entry point

use clap::Parser;
use segment_digest::config::{AppConfig, Credentials};
use segment_digest::pipeline::{
    PipelineError, RunReport, RunStatus, SegmentFailure, SegmentProgress,
};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Transcribe a directory of audio segments and write one composite summary
#[derive(Debug, Parser)]
#[command(name = "segment-digest", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the audio segments
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Directory for per-job staged results
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Composite summary output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum number of segments in flight at once
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Skip transcription and rebuild the composite from staged results
    #[arg(long)]
    aggregate_only: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let credentials = match Credentials::from_env() {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<SegmentProgress>();
    let pipeline = segment_digest::build_pipeline(&config, &credentials).with_progress(tx);

    let progress_task = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            tracing::debug!("[{}] {}", update.segment_id, update.status);
        }
    });

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = || async { tokio::signal::ctrl_c().await.is_ok() };
        if watch_interrupts(ctrl_c, signal_token).await {
            tracing::error!("Second interrupt received, exiting without waiting for in-flight jobs");
            std::process::exit(130);
        }
    });

    let outcome = if cli.aggregate_only {
        pipeline.aggregate_staged().await
    } else {
        pipeline.run(&cancel).await
    };

    drop(pipeline);
    let _ = progress_task.await;

    match outcome {
        Ok(report) => report_success(&report),
        Err(e) => report_failure(&e),
    }
}

/// Cancel `token` on the first interrupt. Returns `true` once a second
/// interrupt arrives, `false` if the signal source goes away first.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, token: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !next_interrupt().await {
        return false;
    }
    tracing::warn!("Interrupt received, letting in-flight segments reach a safe point (press Ctrl-C again to exit now)");
    token.cancel();

    next_interrupt().await
}

fn load_config(cli: &Cli) -> Result<AppConfig, segment_digest::config::ConfigError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Some(dir) = &cli.input_dir {
        config.input_dir = dir.clone();
    }
    if let Some(dir) = &cli.staging_dir {
        config.staging_dir = dir.clone();
    }
    if let Some(path) = &cli.output {
        config.output_path = path.clone();
    }
    if let Some(n) = cli.max_in_flight {
        config.max_in_flight = n;
    }

    config.validate()?;
    Ok(config)
}

fn report_success(report: &RunReport) -> ExitCode {
    println!("Composite Summary:");
    println!("{}", report.composite);

    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }

    match &report.status {
        RunStatus::Success => {
            tracing::info!(
                "Done: {} segment(s) summarized into {}",
                report.succeeded.len(),
                report.output_path.display()
            );
            ExitCode::SUCCESS
        }
        RunStatus::Degraded { failed } => {
            for failure in &report.failures {
                tracing::warn!("Segment {} failed: {}", failure.segment_id, failure.error);
            }
            tracing::warn!(
                "Degraded run: {} segment(s) summarized, failed: {}",
                report.succeeded.len(),
                failed.join(", ")
            );
            ExitCode::from(2)
        }
    }
}

fn report_failure(error: &PipelineError) -> ExitCode {
    let failures: &[SegmentFailure] = match error {
        PipelineError::AllSegmentsFailed { failures }
        | PipelineError::Generation { failures, .. }
        | PipelineError::Cancelled { failures, .. } => failures.as_slice(),
        _ => &[],
    };

    for failure in failures {
        tracing::error!("Segment {} failed: {}", failure.segment_id, failure.error);
    }

    tracing::error!("{}", error);

    if matches!(
        error,
        PipelineError::Generation { .. } | PipelineError::Cancelled { .. } | PipelineError::Store(_)
    ) {
        tracing::error!("Staged results were kept; rerun with --aggregate-only to retry aggregation");
    }

    ExitCode::FAILURE
}
