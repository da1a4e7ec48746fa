// src/stt/mod.rs
// Remote transcription job adapters

mod neuralspace;
pub mod poll;
mod types;

pub use neuralspace::{NeuralSpaceAdapter, TranscriptionOptions};
pub use poll::{PollBackoff, PollStep};
pub use types::{
    JobFailure, JobId, JobStatus, SubmissionError, TranscriptionError, TranscriptionResult,
};

use crate::store::Segment;
use async_trait::async_trait;

/// Submit-then-poll access to an asynchronous transcription service.
///
/// Implementations never retry `submit` on their own; the pipeline owns
/// retry and circuit-breaking across all segments.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Upload a segment and return the job id assigned by the service
    async fn submit(&self, segment: &Segment) -> Result<JobId, SubmissionError>;

    /// Wait (this task only) until the job completes, fails or times out
    async fn await_completion(&self, job_id: &JobId) -> Result<TranscriptionResult, TranscriptionError>;

    /// Get provider name
    fn name(&self) -> &str;
}
