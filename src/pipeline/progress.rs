// src/pipeline/progress.rs
// Per-segment progress events

use crate::stt::JobId;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct SegmentProgress {
    pub segment_id: String,
    pub job_id: Option<JobId>,
    pub status: SegmentStatus,
}

/// Per-segment lifecycle. `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SegmentStatus {
    Pending,
    Submitting,
    Polling,
    Persisting,
    Cleaning,
    Done,
    Failed(String),
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentStatus::Pending => f.write_str("pending"),
            SegmentStatus::Submitting => f.write_str("submitting"),
            SegmentStatus::Polling => f.write_str("polling"),
            SegmentStatus::Persisting => f.write_str("persisting"),
            SegmentStatus::Cleaning => f.write_str("cleaning"),
            SegmentStatus::Done => f.write_str("done"),
            SegmentStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
