//! Lifecycle events and notification dispatch.
//!
//! Every transition is described by one of six named events. The same
//! dispatch path feeds two thin adapters: the single-slot callback set
//! attached at construction time, and the multi-subscriber
//! [`OperationObserver`] trait. Hook invocations are isolated so a
//! misbehaving hook cannot poison the state machine or block later hooks.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::error;

use crate::Operation;

/// A lifecycle event emitted by an operation
#[derive(Debug)]
pub enum OperationEvent<'a, T> {
    /// The operation passed the start gate and is about to run
    Ready,
    /// The operation committed the `Executing` state
    Started,
    /// The work body reported an intermediate result
    TransientResult(&'a T),
    /// The operation finished successfully, carrying the final result
    FinishedWithResult(&'a T),
    /// The operation finished successfully
    Finished,
    /// The operation failed with no retries remaining
    Failed,
}

impl<T> OperationEvent<'_, T> {
    /// Returns a short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Started => "started",
            Self::TransientResult(_) => "transient_result",
            Self::FinishedWithResult(_) => "finished_with_result",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl<T> Clone for OperationEvent<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OperationEvent<'_, T> {}

/// Observer trait for operation lifecycle events
///
/// All hooks are optional; the default bodies do nothing. Observers are
/// held weakly by the operation: one that has been dropped by its owner is
/// silently skipped at dispatch time.
#[allow(unused_variables)]
pub trait OperationObserver<T>: Send + Sync {
    /// Called when the operation is about to run its work body
    fn operation_ready(&self, operation: &Operation<T>) {}

    /// Called after the operation committed the `Executing` state
    fn operation_started(&self, operation: &Operation<T>) {}

    /// Called for each intermediate result the work body reports
    fn operation_produced_transient_result(&self, operation: &Operation<T>, result: &T) {}

    /// Called when the operation finishes successfully, with the result
    fn operation_finished_with_result(&self, operation: &Operation<T>, result: &T) {}

    /// Called when the operation finishes successfully
    fn operation_finished(&self, operation: &Operation<T>) {}

    /// Called when the operation fails with no retries remaining
    fn operation_failed(&self, operation: &Operation<T>) {}
}

pub(crate) type Hook<T> = Box<dyn Fn(&Operation<T>) + Send + Sync>;
pub(crate) type ResultHook<T> = Box<dyn Fn(&Operation<T>, &T) + Send + Sync>;

/// Single-slot callback hooks, at most one handler per event
pub(crate) struct CallbackSet<T> {
    pub(crate) on_ready: Option<Hook<T>>,
    pub(crate) on_start: Option<Hook<T>>,
    pub(crate) on_result: Option<ResultHook<T>>,
    pub(crate) on_finish_with_result: Option<ResultHook<T>>,
    pub(crate) on_finish: Option<Hook<T>>,
    pub(crate) on_fail: Option<Hook<T>>,
}

impl<T> Default for CallbackSet<T> {
    fn default() -> Self {
        Self {
            on_ready: None,
            on_start: None,
            on_result: None,
            on_finish_with_result: None,
            on_finish: None,
            on_fail: None,
        }
    }
}

impl<T> CallbackSet<T> {
    /// Invokes the slot matching `event`, if one is attached.
    pub(crate) fn dispatch(&self, operation: &Operation<T>, event: &OperationEvent<'_, T>) {
        match event {
            OperationEvent::Ready => {
                if let Some(hook) = &self.on_ready {
                    guarded("on_ready", || hook(operation));
                }
            }
            OperationEvent::Started => {
                if let Some(hook) = &self.on_start {
                    guarded("on_start", || hook(operation));
                }
            }
            OperationEvent::TransientResult(value) => {
                if let Some(hook) = &self.on_result {
                    guarded("on_result", || hook(operation, value));
                }
            }
            OperationEvent::FinishedWithResult(value) => {
                if let Some(hook) = &self.on_finish_with_result {
                    guarded("on_finish_with_result", || hook(operation, value));
                }
            }
            OperationEvent::Finished => {
                if let Some(hook) = &self.on_finish {
                    guarded("on_finish", || hook(operation));
                }
            }
            OperationEvent::Failed => {
                if let Some(hook) = &self.on_fail {
                    guarded("on_fail", || hook(operation));
                }
            }
        }
    }
}

/// Delivers `event` to the observer hook matching it.
pub(crate) fn deliver<T>(
    observer: &dyn OperationObserver<T>,
    operation: &Operation<T>,
    event: &OperationEvent<'_, T>,
) {
    match event {
        OperationEvent::Ready => {
            guarded("operation_ready", || observer.operation_ready(operation));
        }
        OperationEvent::Started => {
            guarded("operation_started", || observer.operation_started(operation));
        }
        OperationEvent::TransientResult(value) => {
            guarded("operation_produced_transient_result", || {
                observer.operation_produced_transient_result(operation, value);
            });
        }
        OperationEvent::FinishedWithResult(value) => {
            guarded("operation_finished_with_result", || {
                observer.operation_finished_with_result(operation, value);
            });
        }
        OperationEvent::Finished => {
            guarded("operation_finished", || observer.operation_finished(operation));
        }
        OperationEvent::Failed => {
            guarded("operation_failed", || observer.operation_failed(operation));
        }
    }
}

// A panic in external hook code must not unwind into a transition.
fn guarded(hook: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("operation hook {} panicked; continuing", hook);
    }
}
