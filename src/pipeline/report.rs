// src/pipeline/report.rs
// Run outcomes and pipeline errors

use super::metrics::PipelineMetrics;
use crate::store::StoreError;
use crate::stt::{JobId, SubmissionError, TranscriptionError};
use crate::summary::GenerationError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single segment ended in `Failed`
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("Submission failed: {0}")]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error("Job {job_id} returned an incomplete result (missing {})", missing.join(", "))]
    IncompleteResult { job_id: JobId, missing: Vec<String> },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Staged result for job {job_id} was not found after the run")]
    StagedResultMissing { job_id: JobId },

    #[error("Cancelled before submission")]
    Cancelled,

    #[error("Worker task aborted: {0}")]
    Panicked(String),
}

#[derive(Debug)]
pub struct SegmentFailure {
    pub segment_id: String,
    pub error: SegmentError,
}

#[derive(Debug, Clone)]
pub struct SegmentSuccess {
    pub segment_id: String,
    pub job_id: JobId,
    pub staged_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Composite produced from a subset; lists the failed segment ids
    Degraded { failed: Vec<String> },
}

#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub composite: String,
    pub output_path: PathBuf,
    /// Segment ids included in the composite, in prompt order
    pub succeeded: Vec<String>,
    pub failures: Vec<SegmentFailure>,
    pub metrics: PipelineMetrics,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.segment_id.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No pending segments in {}", .0.display())]
    NoPendingSegments(PathBuf),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("All {} segment(s) failed; nothing to aggregate", failures.len())]
    AllSegmentsFailed { failures: Vec<SegmentFailure> },

    #[error("No staged results to aggregate")]
    NothingStaged,

    #[error("Composite generation failed ({staged} staged result(s) kept): {source}")]
    Generation {
        #[source]
        source: GenerationError,
        staged: usize,
        failures: Vec<SegmentFailure>,
    },

    #[error("Run cancelled ({staged} staged result(s) kept)")]
    Cancelled {
        staged: usize,
        failures: Vec<SegmentFailure>,
    },
}
