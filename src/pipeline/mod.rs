// src/pipeline/mod.rs
// Segment fan-out, join barrier and composite aggregation

use crate::store::{Segment, SegmentStore, StagedResult, StoreError};
use crate::stt::TranscriptionClient;
use crate::summary::SummaryClient;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use self::circuit_breaker::CircuitBreaker;
use self::metrics::PipelineMetrics;
use self::retry::RetryPolicy;
use self::worker::SegmentWorker;

pub mod circuit_breaker;
pub mod metrics;
pub mod progress;
pub mod prompt;
pub mod report;
pub mod retry;
mod worker;

pub use metrics::Stage;
pub use progress::{SegmentProgress, SegmentStatus};
pub use report::{
    PipelineError, RunReport, RunStatus, SegmentError, SegmentFailure, SegmentSuccess,
};

/// Knobs that shape one run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_in_flight: usize,
    pub submit_max_retries: u8,
    pub submit_retry_base_delay: Duration,
    pub breaker_threshold: u32,
    pub breaker_window: Duration,
    pub breaker_cooldown: Duration,
    pub target_languages: Vec<String>,
    pub instruction: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            submit_max_retries: 2,
            submit_retry_base_delay: Duration::from_secs(2),
            breaker_threshold: 5,
            breaker_window: Duration::from_secs(300),
            breaker_cooldown: Duration::from_secs(600),
            target_languages: vec!["en".to_string()],
            instruction: prompt::DEFAULT_INSTRUCTION.to_string(),
        }
    }
}

pub struct Pipeline {
    store: Arc<SegmentStore>,
    transcriber: Arc<dyn TranscriptionClient>,
    summarizer: Arc<dyn SummaryClient>,
    settings: PipelineSettings,
    progress: Option<UnboundedSender<SegmentProgress>>,
}

impl Pipeline {
    pub fn new(
        store: SegmentStore,
        transcriber: Arc<dyn TranscriptionClient>,
        summarizer: Arc<dyn SummaryClient>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store: Arc::new(store),
            transcriber,
            summarizer,
            settings,
            progress: None,
        }
    }

    /// Stream per-segment state changes to `tx`
    pub fn with_progress(mut self, tx: UnboundedSender<SegmentProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Transcribe every pending segment and build the composite summary.
    ///
    /// Only results staged by this run are aggregated. Staged files are
    /// removed only once the composite has been written.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
        let segments = self.store.list_pending_segments().await?;
        if segments.is_empty() {
            return Err(PipelineError::NoPendingSegments(
                self.store.input_dir().to_path_buf(),
            ));
        }

        match self.store.list_staged_results().await {
            Ok(stale) if !stale.is_empty() => tracing::warn!(
                "{} staged result(s) from an earlier run found in {}; they are not part of this run",
                stale.len(),
                self.store.staging_dir().display()
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not inspect staging area: {}", e),
        }

        let metrics = Arc::new(Mutex::new(PipelineMetrics::new()));
        let (successes, mut failures) = self.transcribe_all(segments, &metrics, cancel).await;

        if cancel.is_cancelled() {
            tracing::warn!(
                "Run cancelled after {} segment(s) were staged",
                successes.len()
            );
            return Err(PipelineError::Cancelled {
                staged: successes.len(),
                failures,
            });
        }

        if successes.is_empty() {
            tracing::error!("All {} segment(s) failed, skipping aggregation", failures.len());
            return Err(PipelineError::AllSegmentsFailed { failures });
        }

        let mut staged = Vec::with_capacity(successes.len());
        for success in successes {
            match self.read_back(&success).await {
                Ok(record) => staged.push(record),
                Err(error) => {
                    tracing::warn!("Segment {} dropped from aggregation: {}", success.segment_id, error);
                    failures.push(SegmentFailure {
                        segment_id: success.segment_id,
                        error,
                    });
                }
            }
        }
        staged.sort_by(|a, b| {
            a.segment_id
                .cmp(&b.segment_id)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        failures.sort_by(|a, b| a.segment_id.cmp(&b.segment_id));

        if staged.is_empty() {
            return Err(PipelineError::AllSegmentsFailed { failures });
        }

        let metrics = metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

        self.aggregate(staged, failures, metrics).await
    }

    /// Build the composite from whatever complete results are already staged,
    /// without transcribing anything. Used to recover after a failed
    /// generation or write.
    pub async fn aggregate_staged(&self) -> Result<RunReport, PipelineError> {
        let scan = self.store.scan_staged().await?;
        let mut staged = Vec::new();
        let mut warnings: Vec<String> = scan
            .skipped
            .iter()
            .map(|e| format!("Ignored staging file: {}", e))
            .collect();

        for record in scan.records {
            let missing = record.result.missing_fields(&self.settings.target_languages);
            if missing.is_empty() {
                staged.push(record);
            } else {
                let warning = format!(
                    "Skipping staged job {} (segment {}): missing {}",
                    record.job_id,
                    record.segment_id,
                    missing.join(", ")
                );
                tracing::warn!("{}", warning);
                warnings.push(warning);
            }
        }

        if staged.is_empty() {
            return Err(PipelineError::NothingStaged);
        }

        tracing::info!("Aggregating {} staged result(s)", staged.len());

        let mut report = self
            .aggregate(staged, Vec::new(), PipelineMetrics::new())
            .await?;
        warnings.append(&mut report.warnings);
        report.warnings = warnings;
        Ok(report)
    }

    /// Load the record a worker staged, checking it is the one it wrote
    async fn read_back(&self, success: &SegmentSuccess) -> Result<StagedResult, SegmentError> {
        let missing = || SegmentError::StagedResultMissing {
            job_id: success.job_id.clone(),
        };

        match self.store.read_staged(&success.staged_path).await {
            Ok(record) if record.job_id == success.job_id => Ok(record),
            Ok(_) => Err(missing()),
            Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Err(missing())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn transcribe_all(
        &self,
        segments: Vec<Segment>,
        metrics: &Arc<Mutex<PipelineMetrics>>,
        cancel: &CancellationToken,
    ) -> (Vec<SegmentSuccess>, Vec<SegmentFailure>) {
        let worker = SegmentWorker {
            client: Arc::clone(&self.transcriber),
            store: Arc::clone(&self.store),
            breaker: Arc::new(Mutex::new(CircuitBreaker::new(
                self.settings.breaker_threshold,
                self.settings.breaker_window,
                self.settings.breaker_cooldown,
            ))),
            metrics: Arc::clone(metrics),
            retry: RetryPolicy::new(
                self.settings.submit_max_retries,
                self.settings.submit_retry_base_delay,
            ),
            target_languages: self.settings.target_languages.clone().into(),
            cancel: cancel.clone(),
            progress: self.progress.clone(),
        };

        let limit = self.settings.max_in_flight.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        tracing::info!(
            "Dispatching {} segment(s) to {} with at most {} in flight",
            segments.len(),
            self.transcriber.name(),
            limit
        );

        let mut handles = Vec::with_capacity(segments.len());
        for segment in segments {
            if let Some(tx) = &self.progress {
                let _ = tx.send(SegmentProgress {
                    segment_id: segment.id.clone(),
                    job_id: None,
                    status: SegmentStatus::Pending,
                });
            }

            let segment_id = segment.id.clone();
            let worker = worker.clone();
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Err(SegmentError::Cancelled),
                };
                worker.process(segment).await
            });

            handles.push((segment_id, handle));
        }

        let mut successes = Vec::new();
        let mut failures = Vec::new();

        for (segment_id, handle) in handles {
            match handle.await {
                Ok(Ok(success)) => successes.push(success),
                Ok(Err(error)) => failures.push(SegmentFailure { segment_id, error }),
                Err(join_error) => {
                    tracing::error!("Segment {} task aborted: {}", segment_id, join_error);
                    failures.push(SegmentFailure {
                        segment_id,
                        error: SegmentError::Panicked(join_error.to_string()),
                    });
                }
            }
        }

        tracing::info!(
            "All segment tasks settled: {} succeeded, {} failed",
            successes.len(),
            failures.len()
        );

        (successes, failures)
    }

    async fn aggregate(
        &self,
        staged: Vec<StagedResult>,
        failures: Vec<SegmentFailure>,
        metrics: PipelineMetrics,
    ) -> Result<RunReport, PipelineError> {
        let prompt = prompt::build_composite_prompt(
            &self.settings.instruction,
            &staged,
            &self.settings.target_languages,
        );

        let composite = match self.summarizer.generate_composite(&prompt).await {
            Ok(text) => text,
            Err(source) => {
                tracing::error!(
                    "Composite generation via {} failed, keeping {} staged result(s): {}",
                    self.summarizer.name(),
                    staged.len(),
                    source
                );
                return Err(PipelineError::Generation {
                    source,
                    staged: staged.len(),
                    failures,
                });
            }
        };

        self.store.write_composite(&composite).await?;

        let mut warnings = Vec::new();
        if let Err(e) = self.store.clear_staged().await {
            tracing::warn!("Composite written but staging cleanup failed: {}", e);
            warnings.push(format!("staging cleanup failed: {}", e));
        }

        let succeeded: Vec<String> = staged.iter().map(|r| r.segment_id.clone()).collect();
        let status = if failures.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Degraded {
                failed: failures.iter().map(|f| f.segment_id.clone()).collect(),
            }
        };

        match &status {
            RunStatus::Success => tracing::info!(
                "Composite summary built from {} segment(s)",
                succeeded.len()
            ),
            RunStatus::Degraded { failed } => tracing::warn!(
                "Composite summary built from {} segment(s); failed: {:?}",
                succeeded.len(),
                failed
            ),
        }

        Ok(RunReport {
            status,
            composite,
            output_path: self.store.output_path().to_path_buf(),
            succeeded,
            failures,
            metrics,
            warnings,
        })
    }
}
