// crates/vigil-daemon/src/state.rs
//
// Lifecycle state machine for the Vigil daemon.
//
// Valid transitions:
//   Initializing -> Resuming -> Monitoring
//   Any state -> ShuttingDown

use std::fmt;

/// Lifecycle states of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonState {
    /// Loading configuration and opening the data directory.
    Initializing,
    /// Restoring the cursor and the current phrase's snapshot.
    Resuming,
    /// Both loops are running.
    Monitoring,
    /// Flushing state before exit.
    ShuttingDown,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonState::Initializing => write!(f, "Initializing"),
            DaemonState::Resuming => write!(f, "Resuming"),
            DaemonState::Monitoring => write!(f, "Monitoring"),
            DaemonState::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

pub struct DaemonStateMachine {
    pub current: DaemonState,
}

impl DaemonStateMachine {
    /// Create a new state machine starting in the Initializing state.
    pub fn new() -> Self {
        Self {
            current: DaemonState::Initializing,
        }
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns an error if the transition is not valid.
    pub fn transition(&mut self, new_state: DaemonState) -> Result<(), String> {
        let valid = matches!(
            (&self.current, &new_state),
            (_, DaemonState::ShuttingDown)
                | (DaemonState::Initializing, DaemonState::Resuming)
                | (DaemonState::Resuming, DaemonState::Monitoring)
        );

        if valid {
            tracing::info!("State transition: {} -> {}", self.current, new_state);
            self.current = new_state;
            Ok(())
        } else {
            Err(format!(
                "Invalid state transition: {} -> {}",
                self.current, new_state
            ))
        }
    }
}

impl Default for DaemonStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
