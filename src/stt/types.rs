// src/stt/types.rs
// Transcription job types and error definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Identifier assigned to a job by the remote transcription service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote job state as reported by a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed(String),
}

impl JobStatus {
    /// Map a provider status string onto a job state.
    ///
    /// Unknown values count as still running so polling continues until the
    /// deadline decides.
    pub fn from_remote(status: &str, message: Option<&str>) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" | "submitted" => JobStatus::Queued,
            "completed" | "complete" | "succeeded" | "success" => JobStatus::Completed,
            "failed" | "failure" | "error" | "cancelled" => JobStatus::Failed(
                message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or("remote job failed")
                    .to_string(),
            ),
            _ => JobStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed(_))
    }
}

/// Structured output of one transcription job.
///
/// The remote service may report success with parts of the payload missing,
/// so every field stays optional here and completeness is checked with
/// [`TranscriptionResult::missing_fields`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Translated text keyed by target language code
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
    /// Sentiment metadata, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<serde_json::Value>,
}

impl TranscriptionResult {
    /// Names of the required fields this result lacks
    pub fn missing_fields(&self, target_languages: &[String]) -> Vec<String> {
        let mut missing = Vec::new();

        if self.transcript.is_none() {
            missing.push("transcript".to_string());
        }

        if target_languages.is_empty() {
            if self.translations.is_empty() {
                missing.push("translation".to_string());
            }
        } else {
            for lang in target_languages {
                if self.translation(lang).is_none() {
                    missing.push(format!("translation.{}", lang));
                }
            }
        }

        if self.summary.is_none() {
            missing.push("summary".to_string());
        }

        missing
    }

    pub fn is_complete(&self, target_languages: &[String]) -> bool {
        self.missing_fields(target_languages).is_empty()
    }

    pub fn transcript_text(&self) -> &str {
        self.transcript.as_deref().unwrap_or_default()
    }

    pub fn summary_text(&self) -> &str {
        self.summary.as_deref().unwrap_or_default()
    }

    pub fn translation_text(&self, lang: &str) -> &str {
        self.translation(lang).unwrap_or_default()
    }

    /// Language tags are matched without regard to case
    fn translation(&self, lang: &str) -> Option<&str> {
        self.translations
            .get(lang)
            .or_else(|| {
                self.translations
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(lang))
                    .map(|(_, text)| text)
            })
            .map(String::as_str)
    }
}

/// Submission errors with retry classification
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Segment unreadable: {0}")]
    UnreadableSegment(String),

    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("Authentication failed")]
    Authentication,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Job rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Circuit breaker open, submission skipped")]
    CircuitOpen,
}

impl SubmissionError {
    /// Returns true if the same submission may succeed when repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmissionError::Network(_) | SubmissionError::RateLimited => true,
            SubmissionError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Why a submitted job never produced a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    Remote(String),
    TimedOut(Duration),
    Authentication,
    InvalidResponse(String),
    Network(String),
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::Remote(reason) => write!(f, "remote failure: {}", reason),
            JobFailure::TimedOut(waited) => {
                write!(f, "timed out after {:.1}s", waited.as_secs_f32())
            }
            JobFailure::Authentication => f.write_str("authentication failed"),
            JobFailure::InvalidResponse(detail) => write!(f, "invalid response: {}", detail),
            JobFailure::Network(detail) => write!(f, "network error: {}", detail),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Transcription job {job_id} failed: {cause}")]
pub struct TranscriptionError {
    pub job_id: JobId,
    pub cause: JobFailure,
}

impl TranscriptionError {
    pub fn new(job_id: JobId, cause: JobFailure) -> Self {
        Self { job_id, cause }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, JobFailure::TimedOut(_))
    }
}
