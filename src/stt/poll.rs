// src/stt/poll.rs
// Poll-with-backoff loop shared by transcription adapters

use super::{JobFailure, JobId, TranscriptionError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};

/// Status-query pacing for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on the total time spent waiting for one job
    pub timeout: Duration,
}

impl PollBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            timeout,
        }
    }

    /// Delay after the given (zero-based) unsuccessful poll
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(2),
            Duration::from_secs(30),
            Duration::from_secs(15 * 60),
        )
    }
}

/// Outcome of a single status check
#[derive(Debug)]
pub enum PollStep<T> {
    Pending,
    Done(T),
}

/// Probe until the job reaches a terminal state or the backoff's timeout
/// elapses. Network errors are polled through; any other failure ends the
/// wait immediately.
pub async fn poll_until_terminal<T, F, Fut>(
    job_id: &JobId,
    backoff: &PollBackoff,
    mut check: F,
) -> Result<T, TranscriptionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStep<T>, JobFailure>>,
{
    let started = Instant::now();
    let deadline = started + backoff.timeout;
    let timed_out =
        || TranscriptionError::new(job_id.clone(), JobFailure::TimedOut(started.elapsed()));

    let mut attempt = 0u32;

    loop {
        match timeout_at(deadline, check()).await {
            Err(_) => return Err(timed_out()),
            Ok(Ok(PollStep::Done(value))) => {
                tracing::debug!("Job {} finished after {} polls", job_id, attempt + 1);
                return Ok(value);
            }
            Ok(Ok(PollStep::Pending)) => {}
            Ok(Err(JobFailure::Network(e))) => {
                tracing::warn!("Job {} status query failed, will retry: {}", job_id, e);
            }
            Ok(Err(cause)) => return Err(TranscriptionError::new(job_id.clone(), cause)),
        }

        let next = Instant::now() + backoff.delay_for(attempt);
        if next >= deadline {
            sleep_until(deadline).await;
            return Err(timed_out());
        }

        tracing::trace!(
            "Job {} still running, next poll in {:?}",
            job_id,
            backoff.delay_for(attempt)
        );
        sleep_until(next).await;
        attempt = attempt.saturating_add(1);
    }
}
