//! Refresh run state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::InvalidTransition;

/// Phase of a single refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshState {
    /// No attempt started yet.
    Idle,
    /// Probing the source before spending a full fetch.
    CheckingLiveness,
    /// Downloading the source document.
    Fetching,
    /// Parsing anchors out of the document.
    Extracting,
    /// Saving extracted entities and invalidating cache keys.
    Persisting,
    /// Reached persistence and completed.
    Done,
    /// Aborted before persistence.
    Failed,
}

impl RefreshState {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, RefreshState::Done | RefreshState::Failed)
    }

    /// Check if a refresh is in progress.
    pub fn is_in_progress(&self) -> bool {
        !self.is_final() && *self != RefreshState::Idle
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[RefreshState] {
        match self {
            RefreshState::Idle => &[RefreshState::CheckingLiveness],
            RefreshState::CheckingLiveness => &[RefreshState::Fetching, RefreshState::Failed],
            RefreshState::Fetching => &[RefreshState::Extracting, RefreshState::Failed],
            RefreshState::Extracting => &[RefreshState::Persisting, RefreshState::Failed],
            RefreshState::Persisting => &[RefreshState::Done],
            RefreshState::Done => &[],
            RefreshState::Failed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: RefreshState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for RefreshState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefreshState::Idle => "idle",
            RefreshState::CheckingLiveness => "checking_liveness",
            RefreshState::Fetching => "fetching",
            RefreshState::Extracting => "extracting",
            RefreshState::Persisting => "persisting",
            RefreshState::Done => "done",
            RefreshState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Timing information for a refresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTiming {
    pub started_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RefreshTiming {
    /// Create new timing starting now.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            fetched_at: None,
            extracted_at: None,
            finished_at: None,
        }
    }

    /// Get total duration in milliseconds.
    pub fn total_duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Get time spent talking to the source in milliseconds.
    pub fn fetch_duration_ms(&self) -> Option<i64> {
        self.fetched_at
            .map(|fetched| (fetched - self.started_at).num_milliseconds())
    }
}

impl Default for RefreshTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// A single refresh attempt walking through `RefreshState`.
#[derive(Debug, Clone)]
pub struct RefreshRun {
    /// Time-ordered run identifier.
    pub id: Uuid,
    /// Whether the caller asked to bypass single-flight skipping.
    pub forced: bool,
    /// Current phase.
    pub state: RefreshState,
    /// Phase at which the run failed, if it did.
    pub failed_in: Option<RefreshState>,
    pub timing: RefreshTiming,
}

impl RefreshRun {
    /// Create a new idle run.
    pub fn new(forced: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            forced,
            state: RefreshState::Idle,
            failed_in: None,
            timing: RefreshTiming::new(),
        }
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, next: RefreshState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            RefreshState::Extracting => self.timing.fetched_at = Some(now),
            RefreshState::Persisting => self.timing.extracted_at = Some(now),
            RefreshState::Done | RefreshState::Failed => self.timing.finished_at = Some(now),
            _ => {}
        }

        if next == RefreshState::Failed {
            self.failed_in = Some(self.state);
        }
        self.state = next;
        Ok(())
    }

    /// Mark the run as failed from its current phase.
    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.transition_to(RefreshState::Failed)
    }
}
