//! Host-opaque task result representation.
//!
//! The engine itself never inspects a task's return type; it only needs to
//! move it between a worker thread and whichever caller later awaits it.
//! [`ValueView`] type-erases the result behind `Any` so one [`crate::core::task_record::TaskRecord`]
//! pool can hold results of differing concrete types, while keeping a
//! stringified view available for legacy callers that just want to log or
//! display the outcome without knowing its type.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A type-erased, reference-counted task result. `Arc` (rather than `Box`)
/// so multiple awaiters of the same task can each hold their own handle to
/// the same value without cloning the underlying `T`.
pub type Value = Arc<dyn Any + Send + Sync>;

/// A task result paired with a precomputed textual form.
#[derive(Clone)]
pub struct ValueView {
    /// The host-opaque result value.
    pub value: Value,
    /// A `{:?}`-rendered view, computed once at completion time (the
    /// concrete type is erased by the time a second awaiter reads this).
    pub text: String,
}

impl fmt::Debug for ValueView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueView").field("text", &self.text).finish()
    }
}

impl ValueView {
    /// Wrap a concrete result, eagerly rendering its textual view.
    pub fn new<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        Self {
            text: format!("{value:?}"),
            value: Arc::new(value),
        }
    }

    /// Downcast back to the concrete type `T`. Returns `None` if `T` does
    /// not match the type this view was constructed from.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}
