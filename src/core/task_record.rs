//! Task record: identity, state, result, error, and the join/await contract.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::EngineError;
use crate::{Condvar, Mutex};

/// Lifecycle state of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Submitted, not yet picked up by a worker.
    Pending,
    /// A worker thread is currently executing the closure.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error (closure failure, timeout, or internal error).
    Failed,
    /// Cancelled before a worker picked it up.
    Cancelled,
}

impl TaskState {
    /// Whether this state is terminal (will never transition again).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The outcome stored in a terminal task record.
#[derive(Debug, Clone)]
pub enum Outcome<R> {
    /// The closure returned a value.
    Success(R),
    /// The closure failed, was cancelled, or timed out; carries a message.
    Failure(String),
}

struct Inner<R> {
    state: TaskState,
    outcome: Option<Outcome<R>>,
    duration_ms: Option<u64>,
}

/// A task's identity, state, result, and completion primitive.
///
/// Lives from submission until both (a) the task has reached a terminal
/// state and (b) all awaiters have observed the result or the record is
/// explicitly unregistered. Once terminal, `outcome` is immutable, and the
/// `finished` flag becomes observable only *after* the outcome is visible
/// (publication ordering, enforced by the `Release`/`Acquire` pair below).
pub struct TaskRecord<R> {
    id: u64,
    inner: Mutex<Inner<R>>,
    condvar: Condvar,
    finished: AtomicBool,
}

impl<R: Clone> TaskRecord<R> {
    /// Construct a record in state `pending`.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner {
                state: TaskState::Pending,
                outcome: None,
                duration_ms: None,
            }),
            condvar: Condvar::new(),
            finished: AtomicBool::new(false),
        }
    }

    /// Stable task identity.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Transition `pending -> running`.
    pub fn mark_running(&self) {
        let mut inner = self.inner.lock();
        if inner.state == TaskState::Pending {
            inner.state = TaskState::Running;
        }
    }

    /// Transition `pending -> cancelled`. No-op (returns `false`) once the
    /// task has started running or already reached a terminal state.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TaskState::Pending {
            return false;
        }
        inner.state = TaskState::Cancelled;
        inner.outcome = Some(Outcome::Failure("cancelled".to_string()));
        drop(inner);
        self.publish_finished();
        true
    }

    /// Record a successful result. Ignored if an error has already been
    /// recorded (failure is sticky — see [`Self::set_error`]).
    pub fn set_result(&self, value: R) {
        let mut inner = self.inner.lock();
        if matches!(inner.outcome, Some(Outcome::Failure(_))) {
            return;
        }
        inner.outcome = Some(Outcome::Success(value));
    }

    /// Record a failure. Always wins over a previously or subsequently
    /// recorded success: once an error is set it can never be overwritten
    /// by `set_result`.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.outcome = Some(Outcome::Failure(message.into()));
    }

    /// Mark the record terminal (`Completed` or `Failed`, depending on the
    /// stored outcome) and wake every awaiter.
    pub fn mark_finished(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = match inner.outcome {
                Some(Outcome::Failure(_)) | None => TaskState::Failed,
                Some(Outcome::Success(_)) => TaskState::Completed,
            };
        }
        self.publish_finished();
    }

    fn publish_finished(&self) {
        // The result write above happens-before this Release store; any
        // thread that observes `finished == true` via Acquire is guaranteed
        // to see the outcome too.
        self.finished.store(true, Ordering::Release);
        let _guard = self.inner.lock();
        self.condvar.notify_all();
    }

    /// Lock-free query: has the record reached a terminal state?
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// Non-blocking peek at the outcome: `Some` once terminal, `None` while
    /// still pending or running.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Outcome<R>> {
        let inner = self.inner.lock();
        if inner.state.is_terminal() {
            inner.outcome.clone()
        } else {
            None
        }
    }

    /// Stamp the measured execution duration, reported by the worker that
    /// ran this task's closure. Ignored once the record is terminal.
    pub fn set_duration_ms(&self, ms: u64) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.duration_ms = Some(ms);
        }
    }

    /// Measured execution duration, if the worker reported one.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.inner.lock().duration_ms
    }

    /// Block the caller until the record is terminal, then return its
    /// outcome. Re-entrant and idempotent: every call after termination
    /// returns the same result, and multiple concurrent awaiters are all
    /// woken by [`Self::mark_finished`].
    pub fn await_result(&self) -> Result<R, EngineError> {
        let mut inner = self.inner.lock();
        while !inner.state.is_terminal() {
            self.condvar.wait(&mut inner);
        }
        match &inner.outcome {
            Some(Outcome::Success(v)) => Ok(v.clone()),
            Some(Outcome::Failure(msg)) => Err(Self::error_for(inner.state, self.id, msg)),
            None => Err(EngineError::Internal(format!(
                "task {} reached a terminal state with no outcome",
                self.id
            ))),
        }
    }

    fn error_for(state: TaskState, id: u64, msg: &str) -> EngineError {
        match state {
            TaskState::Cancelled => EngineError::Cancelled(id),
            _ if msg == "timeout" => EngineError::Timeout(id),
            _ => EngineError::UserError(msg.to_string()),
        }
    }
}
