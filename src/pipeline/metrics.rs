// src/pipeline/metrics.rs
// Per-stage run counters

use serde::Serialize;
use std::collections::BTreeMap;

/// Processing stages counted by [`PipelineMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Submit,
    Poll,
    Validate,
    Persist,
    Cleanup,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    success_counts: BTreeMap<Stage, u64>,
    failure_counts: BTreeMap<Stage, u64>,
    submit_retries: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, stage: Stage) {
        *self.success_counts.entry(stage).or_insert(0) += 1;
    }

    pub fn record_failure(&mut self, stage: Stage) {
        *self.failure_counts.entry(stage).or_insert(0) += 1;
    }

    pub fn record_retry(&mut self) {
        self.submit_retries += 1;
    }

    pub fn get_success_count(&self, stage: Stage) -> u64 {
        *self.success_counts.get(&stage).unwrap_or(&0)
    }

    pub fn get_failure_count(&self, stage: Stage) -> u64 {
        *self.failure_counts.get(&stage).unwrap_or(&0)
    }

    pub fn submit_retries(&self) -> u64 {
        self.submit_retries
    }
}
