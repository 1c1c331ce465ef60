use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduler state of a single workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Idle,
    Running,
    Suspended,
    Parked,
    Stopped,
    Exhausted,
    Failed,
}

impl ExecutionState {
    /// No further step will ever run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Stopped | ExecutionState::Exhausted)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Idle => write!(f, "Idle"),
            ExecutionState::Running => write!(f, "Running"),
            ExecutionState::Suspended => write!(f, "Suspended"),
            ExecutionState::Parked => write!(f, "Parked"),
            ExecutionState::Stopped => write!(f, "Stopped"),
            ExecutionState::Exhausted => write!(f, "Exhausted"),
            ExecutionState::Failed => write!(f, "Failed"),
        }
    }
}

impl From<&str> for ExecutionState {
    fn from(s: &str) -> Self {
        match s {
            "Running" => ExecutionState::Running,
            "Suspended" => ExecutionState::Suspended,
            "Parked" => ExecutionState::Parked,
            "Stopped" => ExecutionState::Stopped,
            "Exhausted" => ExecutionState::Exhausted,
            "Failed" => ExecutionState::Failed,
            _ => ExecutionState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips() {
        for state in [
            ExecutionState::Idle,
            ExecutionState::Parked,
            ExecutionState::Exhausted,
            ExecutionState::Failed,
        ] {
            assert_eq!(ExecutionState::from(state.to_string().as_str()), state);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionState::Stopped.is_terminal());
        assert!(ExecutionState::Exhausted.is_terminal());
        assert!(!ExecutionState::Parked.is_terminal());
        assert!(!ExecutionState::Failed.is_terminal());
    }
}
