//! Lifecycle states.
//!
//! This module defines the phases an operation passes through and the
//! legal transitions between them.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// Constructed but not yet scheduled
    Idle,
    /// Handed to a scheduler, waiting for a worker
    Queued,
    /// Work body is running (or awaiting asynchronous completion)
    Executing,
    /// Completed successfully
    Finished,
    /// Completed unsuccessfully
    Failed,
}

impl Default for OperationState {
    fn default() -> Self {
        Self::Idle
    }
}

impl OperationState {
    /// Returns true if no further transition leaves this state.
    ///
    /// `Failed` is terminal for the current attempt; the retry transition
    /// back to `Executing` is never visible through a state read.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Returns true if the lifecycle graph permits moving to `next`.
    ///
    /// `Idle`/`Queued` to `Failed` covers cancellation before start;
    /// `Failed` to `Executing` is the retry edge.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Queued)
                | (Self::Idle | Self::Queued, Self::Executing | Self::Failed)
                | (Self::Executing, Self::Finished | Self::Failed)
                | (Self::Failed, Self::Executing)
        )
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}
