// src/pipeline/circuit_breaker.rs
// Circuit breaker guarding transcription submissions

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { tripped_at: Instant },
    HalfOpen,
}

/// Shared by every segment worker so that a failing remote service stops
/// receiving new submissions.
///
/// Trips once `trip_threshold` failures land inside a sliding `trip_window`,
/// then refuses submissions for `cooldown` before letting one trial submission through.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    recent_failures: VecDeque<Instant>,
    trial_in_flight: bool,
    trip_threshold: u32,
    trip_window: Duration,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(trip_threshold: u32, trip_window: Duration, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            recent_failures: VecDeque::new(),
            trial_in_flight: false,
            trip_threshold: trip_threshold.max(1),
            trip_window,
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a submission may go out now. An open breaker whose cooldown
    /// has elapsed moves to half-open and admits exactly one caller as its
    /// trial; everyone else is refused until that trial reports back.
    pub fn is_request_allowed(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open { tripped_at } => {
                if tripped_at.elapsed() < self.cooldown {
                    return false;
                }
                tracing::info!("Circuit breaker cooldown elapsed, letting one trial submission through");
                self.state = CircuitState::HalfOpen;
                self.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen if self.trial_in_flight => false,
            CircuitState::HalfOpen => {
                self.trial_in_flight = true;
                true
            }
        }
    }

    /// The trial submission ended without telling anything about the service
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            tracing::info!("Circuit breaker closed");
        }
        self.recent_failures.clear();
        self.trial_in_flight = false;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        let now = Instant::now();

        match self.state {
            CircuitState::HalfOpen => {
                tracing::warn!("Circuit breaker re-opened after half-open trial failed");
                self.trip(now);
            }
            CircuitState::Open { .. } => {}
            CircuitState::Closed => {
                self.recent_failures.push_back(now);
                while let Some(&oldest) = self.recent_failures.front() {
                    if now.duration_since(oldest) <= self.trip_window {
                        break;
                    }
                    self.recent_failures.pop_front();
                }

                if self.recent_failures.len() >= self.trip_threshold as usize {
                    tracing::warn!(
                        "Circuit breaker tripped after {} failure(s) within {:?}",
                        self.recent_failures.len(),
                        self.trip_window
                    );
                    self.trip(now);
                }
            }
        }
    }

    fn trip(&mut self, now: Instant) {
        self.recent_failures.clear();
        self.trial_in_flight = false;
        self.state = CircuitState::Open { tripped_at: now };
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(300), Duration::from_secs(600))
    }
}
