// src/pipeline/worker.rs
// Single-segment processing stages

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::metrics::{PipelineMetrics, Stage};
use super::progress::{SegmentProgress, SegmentStatus};
use super::report::{SegmentError, SegmentSuccess};
use super::retry::RetryPolicy;
use crate::store::{Segment, SegmentStore};
use crate::stt::{JobId, SubmissionError, TranscriptionClient};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Everything one segment task needs. Cloned into each spawned task.
#[derive(Clone)]
pub(crate) struct SegmentWorker {
    pub client: Arc<dyn TranscriptionClient>,
    pub store: Arc<SegmentStore>,
    pub breaker: Arc<Mutex<CircuitBreaker>>,
    pub metrics: Arc<Mutex<PipelineMetrics>>,
    pub retry: RetryPolicy,
    pub target_languages: Arc<[String]>,
    pub cancel: CancellationToken,
    pub progress: Option<UnboundedSender<SegmentProgress>>,
}

impl SegmentWorker {
    /// Drive one segment to a terminal state
    pub async fn process(&self, segment: Segment) -> Result<SegmentSuccess, SegmentError> {
        let mut job_id = None;
        let outcome = self.run_stages(&segment, &mut job_id).await;

        match &outcome {
            Ok(success) => {
                tracing::info!("Segment {} done (job {})", segment.id, success.job_id);
                self.emit(&segment, job_id, SegmentStatus::Done);
            }
            Err(e) => {
                tracing::warn!("Segment {} failed: {}", segment.id, e);
                self.emit(&segment, job_id, SegmentStatus::Failed(e.to_string()));
            }
        }

        outcome
    }

    async fn run_stages(
        &self,
        segment: &Segment,
        job_slot: &mut Option<JobId>,
    ) -> Result<SegmentSuccess, SegmentError> {
        self.emit(segment, None, SegmentStatus::Submitting);
        let job_id = self.submit_with_retry(segment).await?;
        *job_slot = Some(job_id.clone());

        self.emit(segment, Some(job_id.clone()), SegmentStatus::Polling);
        let result = match self.client.await_completion(&job_id).await {
            Ok(result) => {
                self.record(Stage::Poll, true);
                result
            }
            Err(e) => {
                self.record(Stage::Poll, false);
                return Err(e.into());
            }
        };

        let missing = result.missing_fields(&self.target_languages);
        if !missing.is_empty() {
            self.record(Stage::Validate, false);
            return Err(SegmentError::IncompleteResult { job_id, missing });
        }
        self.record(Stage::Validate, true);

        self.emit(segment, Some(job_id.clone()), SegmentStatus::Persisting);
        let staged_path = match self.store.persist_result(&job_id, &segment.id, &result).await {
            Ok(path) => {
                self.record(Stage::Persist, true);
                path
            }
            Err(e) => {
                self.record(Stage::Persist, false);
                return Err(e.into());
            }
        };

        self.emit(segment, Some(job_id.clone()), SegmentStatus::Cleaning);
        if let Err(e) = self.store.remove_segment_source(segment).await {
            self.record(Stage::Cleanup, false);
            return Err(e.into());
        }
        self.record(Stage::Cleanup, true);

        Ok(SegmentSuccess {
            segment_id: segment.id.clone(),
            job_id,
            staged_path,
        })
    }

    async fn submit_with_retry(&self, segment: &Segment) -> Result<JobId, SegmentError> {
        let mut attempt = 0u8;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SegmentError::Cancelled);
            }

            let trial = {
                let mut breaker = self.lock_breaker();
                if !breaker.is_request_allowed() {
                    drop(breaker);
                    tracing::warn!("Segment {} skipped: circuit breaker open", segment.id);
                    self.record(Stage::Submit, false);
                    return Err(SubmissionError::CircuitOpen.into());
                }
                breaker.state() == CircuitState::HalfOpen
            };

            match self.client.submit(segment).await {
                Ok(job_id) => {
                    self.lock_breaker().record_success();
                    self.record(Stage::Submit, true);
                    return Ok(job_id);
                }
                Err(e) => {
                    tracing::warn!(
                        "Segment {} submit attempt {}/{} to {} failed: {}",
                        segment.id,
                        attempt + 1,
                        self.retry.max_retries() + 1,
                        self.client.name(),
                        e
                    );

                    if self.retry.should_retry(attempt, &e) {
                        if trial {
                            self.lock_breaker().release_trial();
                        }
                        self.lock_metrics().record_retry();
                        if !self.retry.wait_before_retry(attempt, &self.cancel).await {
                            return Err(SegmentError::Cancelled);
                        }
                        attempt += 1;
                        continue;
                    }

                    if counts_against_service(&e) {
                        self.lock_breaker().record_failure();
                    } else if trial {
                        self.lock_breaker().release_trial();
                    }
                    self.record(Stage::Submit, false);
                    return Err(e.into());
                }
            }
        }
    }

    fn emit(&self, segment: &Segment, job_id: Option<JobId>, status: SegmentStatus) {
        tracing::debug!("Segment {} -> {}", segment.id, status);

        if let Some(tx) = &self.progress {
            let _ = tx.send(SegmentProgress {
                segment_id: segment.id.clone(),
                job_id,
                status,
            });
        }
    }

    fn record(&self, stage: Stage, ok: bool) {
        let mut metrics = self.lock_metrics();
        if ok {
            metrics.record_success(stage);
        } else {
            metrics.record_failure(stage);
        }
    }

    fn lock_breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, PipelineMetrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Segment-specific rejections say nothing about the service's health
fn counts_against_service(error: &SubmissionError) -> bool {
    !matches!(
        error,
        SubmissionError::InvalidAudio(_)
            | SubmissionError::UnreadableSegment(_)
            | SubmissionError::CircuitOpen
    )
}
