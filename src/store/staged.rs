// src/store/staged.rs
// Staged result records and store errors

use crate::stt::{JobId, TranscriptionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Durable record of one finished job, one file per job in the staging area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedResult {
    pub job_id: JobId,
    pub segment_id: String,
    pub persisted_at: DateTime<Utc>,
    pub result: TranscriptionResult,
}

/// Result of reading the whole staging area
#[derive(Debug, Default)]
pub struct StagedScan {
    /// Ordered by segment id, then job id
    pub records: Vec<StagedResult>,
    /// Files that could not be read as a staged record
    pub skipped: Vec<StoreError>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode result for job {job_id}: {source}")]
    Encode {
        job_id: JobId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Job id '{job_id}' cannot be used as a staging file name")]
    InvalidJobId { job_id: JobId },

    #[error("Corrupt staged result {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StoreError::Io { op, path, source }
    }
}
