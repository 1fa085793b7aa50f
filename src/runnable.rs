//! Host-shim contract.
//!
//! The engine is agnostic to how a host language represents user code; it
//! only needs two capabilities from whatever shim marshals between the host
//! and this crate. Both are expressed as traits only — no concrete
//! implementation ships here, matching the deliberate exclusion of the
//! marshalling shim from this crate's scope. A host embeds this crate,
//! implements these traits over its own closure/future representation, and
//! drives [`crate::Engine`] from the other side.

use crate::core::error::EngineError;
use crate::core::value::ValueView;

/// Something a host shim can hand the engine to run on a worker thread.
///
/// A shim implementing this over, say, a JS function pointer is responsible
/// for capturing and (if needed) serializing that function's environment;
/// the engine itself only ever calls `invoke` once, on a worker thread, and
/// converts whatever comes back into a task record.
pub trait Runnable: Send + 'static {
    /// Run the host-side unit of work, returning its outcome.
    ///
    /// Panics raised inside `invoke` are caught at the worker boundary (see
    /// [`crate::core::worker_pool`]) and converted to a failed task record;
    /// implementors are not required to catch their own panics.
    fn invoke(self: Box<Self>) -> Result<ValueView, String>;
}

/// Something the engine can hand a finished task back to, on the host's
/// event loop thread.
///
/// A shim implementing this resolves whatever future/promise/callback the
/// host associated with a task id when the corresponding completion event
/// reaches the event loop.
pub trait CompletionSink: Send + Sync + 'static {
    /// Notify the sink that `task_id` reached a terminal state.
    ///
    /// `outcome` is `Ok` for a successful completion, `Err` for a failure,
    /// cancellation, or timeout; the sink is expected to resolve the host's
    /// corresponding future/promise with it.
    fn on_complete(&self, task_id: u64, outcome: Result<ValueView, EngineError>);
}
