//! Hosted worker state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a hosted service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, never started.
    Created,
    /// `start` accepted, loop not yet polling.
    Started,
    /// Loop is dequeuing and executing.
    Running,
    /// Stop signal sent, waiting for the loop to drain.
    StopRequested,
    /// Loop has exited.
    Stopped,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Created, Started) | (Created, Stopped) |
            (Started, Running) | (Started, StopRequested) | (Started, Stopped) |
            (Running, StopRequested) | (Running, Stopped) |
            (StopRequested, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: WorkerState,
    pub to: WorkerState,
    pub timestamp: DateTime<Utc>,
}

/// Current state plus transition history for one hosted service.
#[derive(Debug, Clone, Serialize)]
pub struct Lifecycle {
    state: WorkerState,
    transitions: Vec<StateTransition>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Created,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Move to `target`, rejecting transitions the state machine forbids.
    pub fn transition_to(&mut self, target: WorkerState) -> Result<(), String> {
        if !self.state.can_transition_to(target) {
            return Err(format!(
                "cannot transition from {} to {}",
                self.state, target
            ));
        }

        self.transitions.push(StateTransition {
            from: self.state,
            to: target,
            timestamp: Utc::now(),
        });
        self.state = target;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
