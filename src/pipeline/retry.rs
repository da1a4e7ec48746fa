// src/pipeline/retry.rs
// Submission retry policy

use crate::stt::SubmissionError;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u8,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u8, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    pub fn should_retry(&self, attempt: u8, error: &SubmissionError) -> bool {
        if attempt >= self.max_retries {
            return false;
        }

        error.is_retryable()
    }

    pub fn delay_for(&self, attempt: u8) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt as u32);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Sleep before the next attempt. Returns false if cancelled meanwhile.
    pub async fn wait_before_retry(&self, attempt: u8, cancel: &CancellationToken) -> bool {
        let delay = self.delay_for(attempt);

        tracing::info!(
            "Retrying in {:.1}s (attempt {})",
            delay.as_secs_f32(),
            attempt + 2
        );

        tokio::select! {
            _ = sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
