// src/stt/neuralspace.rs
// NeuralSpace VoiceAI file transcription adapter

use super::poll::{poll_until_terminal, PollBackoff, PollStep};
use super::{
    JobFailure, JobId, JobStatus, SubmissionError, TranscriptionClient, TranscriptionError,
    TranscriptionResult,
};
use crate::store::Segment;
use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://voice.neuralspace.ai/api/v2";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Job configuration sent with every submission
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOptions {
    pub language_id: String,
    pub mode: String,
    pub summarize: bool,
    pub sentiment_detect: bool,
    pub target_languages: Vec<String>,
}

impl TranscriptionOptions {
    fn job_config(&self) -> Value {
        json!({
            "file_transcription": {
                "language_id": self.language_id,
                "mode": self.mode,
            },
            "summarize": self.summarize,
            "sentiment_detect": self.sentiment_detect,
            "translation": {
                "target_languages": self.target_languages,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitData {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

pub struct NeuralSpaceAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    options: TranscriptionOptions,
    backoff: PollBackoff,
}

impl NeuralSpaceAdapter {
    pub fn new(api_key: String, options: TranscriptionOptions, backoff: PollBackoff) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        tracing::info!(
            "NeuralSpace adapter initialized (language={}, mode={}, translate={:?})",
            options.language_id,
            options.mode,
            options.target_languages
        );

        Self {
            api_key,
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            options,
            backoff,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn mime_for(segment: &Segment) -> &'static str {
        match segment
            .extension()
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("mp3") => "audio/mpeg",
            Some("wav") => "audio/wav",
            Some("m4a") | Some("mp4") => "audio/mp4",
            Some("flac") => "audio/flac",
            Some("ogg") | Some("opus") => "audio/ogg",
            _ => "application/octet-stream",
        }
    }

    async fn check_status(&self, job_id: &JobId) -> Result<PollStep<TranscriptionResult>, JobFailure> {
        let url = format!("{}/jobs/{}", self.base_url, job_id.as_str());

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| JobFailure::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(JobFailure::Authentication);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(JobFailure::Remote("job not found".to_string()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(JobFailure::Network(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobFailure::InvalidResponse(format!("HTTP {}: {}", status, body)));
        }

        let envelope: Envelope<JobData> = response
            .json()
            .await
            .map_err(|e| JobFailure::InvalidResponse(e.to_string()))?;

        let data = envelope
            .data
            .ok_or_else(|| JobFailure::InvalidResponse("missing job data".to_string()))?;

        let message = data.message.as_deref().or(envelope.message.as_deref());
        let job_status = JobStatus::from_remote(data.status.as_deref().unwrap_or(""), message);

        match job_status {
            JobStatus::Completed => {
                let raw = data.result.unwrap_or(Value::Null);
                Ok(PollStep::Done(parse_result(&raw)))
            }
            JobStatus::Failed(reason) => Err(JobFailure::Remote(reason)),
            JobStatus::Queued | JobStatus::Running => Ok(PollStep::Pending),
        }
    }
}

/// Pull the fields the pipeline needs out of a finished job's payload.
/// Absent fields stay `None`; completeness is judged by the caller.
fn parse_result(raw: &Value) -> TranscriptionResult {
    let text_at = |pointer: &str| raw.pointer(pointer).and_then(Value::as_str).map(str::to_string);

    let translations = raw
        .get("translation")
        .and_then(Value::as_object)
        .map(|langs| {
            langs
                .iter()
                .filter_map(|(lang, entry)| {
                    let text = match entry {
                        Value::String(s) => Some(s.clone()),
                        other => other.get("text").and_then(Value::as_str).map(str::to_string),
                    };
                    text.map(|t| (lang.clone(), t))
                })
                .collect()
        })
        .unwrap_or_default();

    let sentiment = ["sentiment", "sentiment_detect", "sentimentDetect"]
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|v| !v.is_null())
        .cloned();

    TranscriptionResult {
        transcript: text_at("/transcription/transcript"),
        summary: text_at("/transcription/summary").or_else(|| text_at("/summary")),
        translations,
        sentiment,
    }
}

fn classify_rejection(status: StatusCode, body: String) -> SubmissionError {
    match status.as_u16() {
        401 | 403 => SubmissionError::Authentication,
        429 => SubmissionError::RateLimited,
        400 | 413 | 415 | 422 => SubmissionError::InvalidAudio(body),
        code => SubmissionError::Rejected { status: code, body },
    }
}

#[async_trait]
impl TranscriptionClient for NeuralSpaceAdapter {
    async fn submit(&self, segment: &Segment) -> Result<JobId, SubmissionError> {
        let bytes = segment
            .read_content()
            .await
            .map_err(|e| SubmissionError::UnreadableSegment(format!("{}: {}", segment.path.display(), e)))?;

        if bytes.is_empty() {
            return Err(SubmissionError::InvalidAudio(format!(
                "{} is empty",
                segment.file_name()
            )));
        }

        tracing::info!(
            "NeuralSpace: submitting segment {} ({} bytes)",
            segment.id,
            bytes.len()
        );

        let file_part = multipart::Part::bytes(bytes)
            .file_name(segment.file_name().to_string())
            .mime_str(Self::mime_for(segment))
            .map_err(|e| SubmissionError::InvalidAudio(e.to_string()))?;

        let form = multipart::Form::new()
            .part("files", file_part)
            .text("config", self.options.job_config().to_string());

        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .header("Authorization", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubmissionError::Network("request timed out".to_string())
                } else {
                    SubmissionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_rejection(status, body));
        }

        let envelope: Envelope<SubmitData> = response.json().await.map_err(|e| {
            SubmissionError::Rejected {
                status: status.as_u16(),
                body: format!("unreadable response: {}", e),
            }
        })?;

        let job_id = envelope
            .data
            .map(|d| JobId::new(d.job_id))
            .filter(|id| !id.as_str().is_empty())
            .ok_or_else(|| SubmissionError::Rejected {
                status: status.as_u16(),
                body: envelope
                    .message
                    .unwrap_or_else(|| "response carried no job id".to_string()),
            })?;

        tracing::info!("Created job {} for segment {}", job_id, segment.id);
        Ok(job_id)
    }

    async fn await_completion(
        &self,
        job_id: &JobId,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        poll_until_terminal(job_id, &self.backoff, || self.check_status(job_id)).await
    }

    fn name(&self) -> &str {
        "neuralspace"
    }
}
