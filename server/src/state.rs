//! Service lifecycle state.

use serde::Serialize;
use std::fmt;

/// Service operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Background tasks are being started.
    Starting,
    /// Serving requests with background tasks running.
    Running,
    /// Background tasks are being stopped.
    ShuttingDown,
    /// Everything has stopped.
    Stopped,
}

impl ServiceState {
    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[ServiceState] {
        match self {
            ServiceState::Starting => &[ServiceState::Running, ServiceState::ShuttingDown],
            ServiceState::Running => &[ServiceState::ShuttingDown],
            ServiceState::ShuttingDown => &[ServiceState::Stopped],
            ServiceState::Stopped => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::ShuttingDown => "shutting_down",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
