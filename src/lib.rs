//! # Worklet
//!
//! Worklet provides [`Operation`]: one retryable, cancellable, observable
//! unit of asynchronous work, designed to be scheduled onto an external
//! worker pool. The operation owns its lifecycle state machine and reports
//! every transition through two parallel notification channels — optional
//! single-slot callback hooks and a multi-subscriber observer trait — so
//! external code can react without polling.
//!
//! ## Architecture
//!
//! The crate is organized around:
//!
//! - `state`: lifecycle states and the legal transitions between them
//! - `events`: the six lifecycle events, callback slots, and observers
//! - `operation`: the operation itself and its control surface
//!
//! ## Example
//!
//! ```rust
//! use worklet::{Operation, OperationState};
//!
//! let operation = Operation::new(|op: &worklet::Operation<u64>| {
//!     op.signal_progress(50).unwrap();
//!     op.finish_success(100).unwrap();
//! })
//! .with_max_retries(3)
//! .with_on_finish(|op| println!("done: {:?}", op.result()));
//!
//! operation.start().unwrap();
//! assert_eq!(operation.state(), OperationState::Finished);
//! ```
//!
//! Scheduling, dependency graphs, and thread-pool sizing are out of scope:
//! an external scheduler queues operations, calls
//! [`start`](Operation::start) on a worker thread, and reads
//! [`is_concurrent`](Operation::is_concurrent) to decide whether completion
//! is signalled by work-body return or by a later `finish_*` call.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod events;
pub mod operation;
pub mod state;

pub use events::{OperationEvent, OperationObserver};
pub use operation::{Operation, OperationSnapshot};
pub use state::OperationState;

/// Operation error type
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct OperationError(#[from] OperationErrorKind);

impl OperationError {
    /// Returns the underlying error kind.
    #[must_use]
    pub fn kind(&self) -> &OperationErrorKind {
        &self.0
    }
}

/// Operation error kinds
#[derive(Debug, thiserror::Error)]
pub enum OperationErrorKind {
    /// A control-surface method was invoked from a state that does not
    /// permit it, e.g. `finish_success` called twice or `start` called
    /// after a terminal state.
    #[error("invalid state transition: {action} is not legal while {state}")]
    InvalidStateTransition {
        /// The method that was invoked
        action: &'static str,
        /// The state the operation was in
        state: OperationState,
    },

    /// `start` was called on an operation cancelled while idle or queued;
    /// the operation resolved to `Failed` without running its work body.
    #[error("operation cancelled before start: {id}")]
    CancelledBeforeStart {
        /// The operation's ID
        id: uuid::Uuid,
    },
}

/// Operation result type
pub type OperationResult<T = ()> = Result<T, OperationError>;
