//! The operation lifecycle state machine.
//!
//! An [`Operation`] is one schedulable unit of asynchronous work. It owns
//! its lifecycle state, retry bookkeeping, the work body, and both
//! notification channels, and is driven entirely through its control
//! surface: a scheduler calls [`start`](Operation::start) on a worker
//! thread, and the work body reports progress and completion back through
//! [`signal_progress`](Operation::signal_progress),
//! [`finish_success`](Operation::finish_success), and
//! [`finish_failure`](Operation::finish_failure), possibly from a
//! different thread than the one running the body.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::{self, CallbackSet, OperationEvent, OperationObserver};
use crate::state::OperationState;
use crate::{OperationError, OperationErrorKind, OperationResult};

type WorkBody<T> = Box<dyn Fn(&Operation<T>) + Send + Sync>;

/// One schedulable, stateful unit of asynchronous work
///
/// `T` is the result value type, both for transient progress values and the
/// final result. All control-surface methods are safe to call from any
/// thread; state and retry bookkeeping live under a single mutex so they are
/// always observed consistently.
pub struct Operation<T> {
    id: Uuid,
    created_at: DateTime<Utc>,
    concurrent: bool,
    max_retries: Option<u32>,
    body: WorkBody<T>,
    callbacks: CallbackSet<T>,
    observers: Mutex<Vec<Weak<dyn OperationObserver<T>>>>,
    cancelled: AtomicBool,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    state: OperationState,
    retry_attempts: u32,
    result: Option<T>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl<T> Inner<T> {
    fn commit(&mut self, next: OperationState) {
        debug_assert!(self.state.can_transition_to(next));
        self.state = next;
    }
}

impl<T: Clone + Send + 'static> Operation<T> {
    /// Creates an operation from its work body.
    ///
    /// The body receives a handle to its own operation and must call
    /// exactly one of `finish_success`/`finish_failure` — before returning
    /// for non-concurrent operations, or at any later point from any thread
    /// for concurrent ones. Retry policy defaults to unbounded; configure
    /// it with [`with_max_retries`](Self::with_max_retries).
    #[must_use]
    pub fn new(body: impl Fn(&Operation<T>) + Send + Sync + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            concurrent: false,
            max_retries: None,
            body: Box::new(body),
            callbacks: CallbackSet::default(),
            observers: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: OperationState::Idle,
                retry_attempts: 0,
                result: None,
                started_at: None,
                completed_at: None,
            }),
        }
    }

    /// Bounds the retry budget; `0` means fail on the first failure.
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    /// Marks the operation as managing its own asynchronous completion.
    ///
    /// Consumed by the external scheduler: a concurrent operation is not
    /// complete when its work body returns, only when `finish_success` or
    /// `finish_failure` is called.
    #[must_use]
    pub fn with_concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Attaches the hook fired when the operation is about to run.
    #[must_use]
    pub fn with_on_ready(mut self, hook: impl Fn(&Operation<T>) + Send + Sync + 'static) -> Self {
        self.callbacks.on_ready = Some(Box::new(hook));
        self
    }

    /// Attaches the hook fired after the operation starts executing.
    #[must_use]
    pub fn with_on_start(mut self, hook: impl Fn(&Operation<T>) + Send + Sync + 'static) -> Self {
        self.callbacks.on_start = Some(Box::new(hook));
        self
    }

    /// Attaches the hook fired for each transient result.
    #[must_use]
    pub fn with_on_result(
        mut self,
        hook: impl Fn(&Operation<T>, &T) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_result = Some(Box::new(hook));
        self
    }

    /// Attaches the hook fired on success, receiving the final result.
    #[must_use]
    pub fn with_on_finish_with_result(
        mut self,
        hook: impl Fn(&Operation<T>, &T) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_finish_with_result = Some(Box::new(hook));
        self
    }

    /// Attaches the hook fired on success.
    #[must_use]
    pub fn with_on_finish(mut self, hook: impl Fn(&Operation<T>) + Send + Sync + 'static) -> Self {
        self.callbacks.on_finish = Some(Box::new(hook));
        self
    }

    /// Attaches the hook fired on terminal failure.
    #[must_use]
    pub fn with_on_fail(mut self, hook: impl Fn(&Operation<T>) + Send + Sync + 'static) -> Self {
        self.callbacks.on_fail = Some(Box::new(hook));
        self
    }

    /// Subscribes an observer.
    ///
    /// Only a weak reference is kept: the operation never extends the
    /// observer's lifetime, and an observer dropped by its owner is
    /// silently skipped at dispatch time.
    pub fn add_observer<O>(&self, observer: &Arc<O>)
    where
        O: OperationObserver<T> + 'static,
    {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn OperationObserver<T>> = weak;
        self.observers.lock().push(weak);
    }

    /// Unsubscribes a previously added observer.
    pub fn remove_observer<O>(&self, observer: &Arc<O>)
    where
        O: OperationObserver<T> + 'static,
    {
        let target = Arc::as_ptr(observer).cast::<()>();
        self.observers
            .lock()
            .retain(|weak| weak.as_ptr().cast::<()>() != target);
    }

    /// Records that the scheduler accepted this operation.
    ///
    /// Optional; legal only from `Idle`. Fires no notifications.
    pub fn mark_queued(&self) -> OperationResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != OperationState::Idle {
            return Err(self.invalid("mark_queued", inner.state));
        }
        inner.commit(OperationState::Queued);
        debug!("operation {} queued", self.id);
        Ok(())
    }

    /// Starts the operation on the calling thread.
    ///
    /// Legal from `Idle` or `Queued`. Fires `on_ready` then `on_start`
    /// (callbacks before observers), then invokes the work body
    /// synchronously. If the operation was cancelled beforehand the body
    /// never runs: the operation commits `Failed`, fires the fail
    /// notifications, and this returns
    /// [`OperationErrorKind::CancelledBeforeStart`].
    pub fn start(&self) -> OperationResult<()> {
        let observers = {
            let mut inner = self.inner.lock();
            match inner.state {
                OperationState::Idle | OperationState::Queued => {}
                state => return Err(self.invalid("start", state)),
            }
            if self.cancelled.load(Ordering::SeqCst) {
                inner.commit(OperationState::Failed);
                inner.completed_at = Some(Utc::now());
                let observers = self.snapshot_observers();
                drop(inner);
                warn!("operation {} cancelled before start", self.id);
                self.notify(&observers, &[OperationEvent::Failed]);
                return Err(OperationErrorKind::CancelledBeforeStart { id: self.id }.into());
            }
            inner.commit(OperationState::Executing);
            inner.started_at = Some(Utc::now());
            self.snapshot_observers()
        };

        debug!("operation {} starting", self.id);
        self.notify(&observers, &[OperationEvent::Ready, OperationEvent::Started]);

        (self.body)(self);

        if !self.concurrent && self.state() == OperationState::Executing {
            warn!(
                "operation {} work body returned without finishing a non-concurrent operation",
                self.id
            );
        }
        Ok(())
    }

    /// Reports an intermediate result.
    ///
    /// Legal only while `Executing`; does not change state. May be called
    /// any number of times, from any thread; each call fires `on_result`
    /// and the observer transient-result hook exactly once.
    pub fn signal_progress(&self, value: T) -> OperationResult<()> {
        let observers = {
            let inner = self.inner.lock();
            if inner.state != OperationState::Executing {
                return Err(self.invalid("signal_progress", inner.state));
            }
            self.snapshot_observers()
        };
        self.notify(&observers, &[OperationEvent::TransientResult(&value)]);
        Ok(())
    }

    /// Completes the operation successfully with `value`.
    ///
    /// Legal only while `Executing`. Stores the result, then fires in
    /// order: `on_finish_with_result`, `on_finish`, observer
    /// finished-with-result, observer finished. A second call is an
    /// [`OperationErrorKind::InvalidStateTransition`] and re-fires nothing.
    pub fn finish_success(&self, value: T) -> OperationResult<()> {
        let observers = {
            let mut inner = self.inner.lock();
            if inner.state != OperationState::Executing {
                return Err(self.invalid("finish_success", inner.state));
            }
            inner.commit(OperationState::Finished);
            inner.completed_at = Some(Utc::now());
            inner.result = Some(value.clone());
            self.snapshot_observers()
        };
        info!("operation {} finished", self.id);
        self.notify(
            &observers,
            &[
                OperationEvent::FinishedWithResult(&value),
                OperationEvent::Finished,
            ],
        );
        Ok(())
    }

    /// Reports that the current attempt failed.
    ///
    /// Legal only while `Executing`. If the operation is not cancelled and
    /// the retry budget permits another attempt, the retry counter is
    /// incremented and the work body is re-invoked on the calling thread;
    /// the visible state never dwells in `Failed` while retrying.
    /// Otherwise the operation commits `Failed` and fires `on_fail` and the
    /// observer failed hook exactly once.
    pub fn finish_failure(&self) -> OperationResult<()> {
        let (retry_attempt, observers) = {
            let mut inner = self.inner.lock();
            if inner.state != OperationState::Executing {
                return Err(self.invalid("finish_failure", inner.state));
            }
            let budget_left = match self.max_retries {
                None => true,
                Some(max) => inner.retry_attempts < max,
            };
            if budget_left && !self.cancelled.load(Ordering::SeqCst) {
                inner.retry_attempts += 1;
                (Some(inner.retry_attempts), Vec::new())
            } else {
                inner.commit(OperationState::Failed);
                inner.completed_at = Some(Utc::now());
                (None, self.snapshot_observers())
            }
        };

        if let Some(attempt) = retry_attempt {
            match self.max_retries {
                Some(max) => warn!(
                    "operation {} attempt failed, retrying ({}/{})",
                    self.id, attempt, max
                ),
                None => warn!("operation {} attempt failed, retrying ({})", self.id, attempt),
            }
            (self.body)(self);
        } else {
            error!("operation {} failed", self.id);
            self.notify(&observers, &[OperationEvent::Failed]);
        }
        Ok(())
    }

    /// Requests cancellation.
    ///
    /// Callable from any thread. Before `start` the flag is consumed at the
    /// start gate; while `Executing` the work body must poll
    /// [`is_cancelled`](Self::is_cancelled) and call `finish_failure`,
    /// which will not retry a cancelled operation. After a terminal state
    /// this is a no-op.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            debug!("operation {} already terminal, cancel ignored", self.id);
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        debug!("operation {} cancellation requested", self.id);
    }

    /// Returns the operation ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the last committed state. Safe from any thread.
    #[must_use]
    pub fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    /// Returns the number of retries consumed so far.
    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        self.inner.lock().retry_attempts
    }

    /// Returns the retry budget; `None` means unbounded.
    #[must_use]
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Returns true if this operation manages its own asynchronous completion.
    #[must_use]
    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Returns true if cancellation was requested. Work bodies poll this.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the final result, if the operation has finished successfully.
    #[must_use]
    pub fn result(&self) -> Option<T> {
        self.inner.lock().result.clone()
    }

    /// Returns when the operation was constructed.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the operation first started executing.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().started_at
    }

    /// Returns when the operation reached a terminal state.
    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().completed_at
    }

    /// Returns a consistent point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> OperationSnapshot {
        let inner = self.inner.lock();
        OperationSnapshot {
            id: self.id,
            state: inner.state,
            retry_attempts: inner.retry_attempts,
            max_retries: self.max_retries,
            concurrent: self.concurrent,
            cancelled: self.cancelled.load(Ordering::SeqCst),
            created_at: self.created_at,
            started_at: inner.started_at,
            completed_at: inner.completed_at,
        }
    }

    // Observers are snapshotted while the state lock is held, so transition
    // batches cannot interleave; hooks run after both locks are released so
    // they may re-enter the operation.
    fn snapshot_observers(&self) -> Vec<Weak<dyn OperationObserver<T>>> {
        let mut observers = self.observers.lock();
        observers.retain(|weak| weak.strong_count() > 0);
        observers.clone()
    }

    fn notify(
        &self,
        observers: &[Weak<dyn OperationObserver<T>>],
        batch: &[OperationEvent<'_, T>],
    ) {
        for event in batch {
            self.callbacks.dispatch(self, event);
        }
        for weak in observers {
            if let Some(observer) = weak.upgrade() {
                for event in batch {
                    events::deliver(observer.as_ref(), self, event);
                }
            }
        }
    }

    fn invalid(&self, action: &'static str, state: OperationState) -> OperationError {
        error!("operation {}: {} is not legal while {}", self.id, action, state);
        OperationErrorKind::InvalidStateTransition { action, state }.into()
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("retry_attempts", &inner.retry_attempts)
            .field("concurrent", &self.concurrent)
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .finish()
    }
}

/// Serializable point-in-time view of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSnapshot {
    /// Operation ID
    pub id: Uuid,
    /// Lifecycle state at snapshot time
    pub state: OperationState,
    /// Retries consumed
    pub retry_attempts: u32,
    /// Retry budget; `None` means unbounded
    pub max_retries: Option<u32>,
    /// Whether the operation manages its own asynchronous completion
    pub concurrent: bool,
    /// Whether cancellation has been requested
    pub cancelled: bool,
    /// Construction time
    pub created_at: DateTime<Utc>,
    /// First execution time
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time
    pub completed_at: Option<DateTime<Utc>>,
}
