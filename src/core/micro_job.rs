//! Micro-job: the per-execution control block consumed by the worker pool.

use std::time::Instant;

use crate::core::object_pool::Poolable;

/// A boxed, once-callable unit of work. The engine is agnostic to how the
/// host represents the user's code; this is the one concrete shape it asks
/// the host shim to produce (see [`crate::runnable`]).
pub type Closure<R> = Box<dyn FnOnce() -> R + Send + 'static>;

/// Rough cost classification derived from a micro-job's last measured
/// duration, used to decide whether a job is worth batching with others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// Under 1 ms.
    Trivial,
    /// Under 10 ms.
    Simple,
    /// Under 100 ms.
    Moderate,
    /// Under 1 s.
    Complex,
    /// 1 s or more.
    Heavy,
    /// No duration has been measured yet.
    Unknown,
}

impl Complexity {
    /// `trivial`/`simple` jobs are worth batching together.
    #[must_use]
    pub const fn is_batching_friendly(self) -> bool {
        matches!(self, Self::Trivial | Self::Simple)
    }
}

/// The per-execution control block carrying a closure, timing, and
/// scheduling hints. Lives in one of three places at a time — free in the
/// [`crate::core::object_pool::ObjectPool`], owned by a worker thread while
/// in flight, or being delivered back to the event loop — never two at
/// once; that invariant is enforced by move semantics (the job is always
/// owned outright, never shared), not by a lock inside this type.
pub struct MicroJob<R> {
    task_id: u64,
    closure: Option<Closure<R>>,
    priority: i32,
    timeout_ms: Option<u64>,
    enqueued_at: Option<Instant>,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    duration_ms: Option<u64>,
}

impl<R> Default for MicroJob<R> {
    fn default() -> Self {
        Self {
            task_id: 0,
            closure: None,
            priority: 0,
            timeout_ms: None,
            enqueued_at: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}

impl<R> MicroJob<R> {
    /// Load this (possibly recycled) control block with a fresh submission.
    /// Stamps `enqueued_at` to now.
    pub fn configure(&mut self, task_id: u64, closure: Closure<R>, priority: i32, timeout_ms: Option<u64>) {
        self.task_id = task_id;
        self.closure = Some(closure);
        self.priority = priority;
        self.timeout_ms = timeout_ms;
        self.enqueued_at = Some(Instant::now());
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
    }

    /// The task id this job executes on behalf of.
    #[must_use]
    pub const fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Scheduling priority hint (higher runs first where the queue honors it).
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Advisory timeout, if one was configured.
    #[must_use]
    pub const fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    /// Stamp the moment a worker thread picks this job up.
    pub fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stamp completion and derive `duration_ms` from start to now.
    pub fn mark_completed(&mut self) {
        let now = Instant::now();
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some(u64::try_from(now.duration_since(started).as_millis()).unwrap_or(u64::MAX));
        }
    }

    /// Milliseconds spent sitting in the queue before a worker started it.
    #[must_use]
    pub fn queue_wait_ms(&self) -> Option<u64> {
        let (enq, start) = (self.enqueued_at?, self.started_at?);
        Some(u64::try_from(start.duration_since(enq).as_millis()).unwrap_or(u64::MAX))
    }

    /// Total elapsed milliseconds from enqueue to completion.
    #[must_use]
    pub fn total_elapsed_ms(&self) -> Option<u64> {
        let (enq, done) = (self.enqueued_at?, self.completed_at?);
        Some(u64::try_from(done.duration_since(enq).as_millis()).unwrap_or(u64::MAX))
    }

    /// Measured execution duration (start to completion), if completed.
    #[must_use]
    pub const fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Classify by last-known duration (see [`Complexity`]).
    #[must_use]
    pub fn estimated_complexity(&self) -> Complexity {
        match self.duration_ms {
            None => Complexity::Unknown,
            Some(ms) if ms < 1 => Complexity::Trivial,
            Some(ms) if ms < 10 => Complexity::Simple,
            Some(ms) if ms < 100 => Complexity::Moderate,
            Some(ms) if ms < 1000 => Complexity::Complex,
            Some(_) => Complexity::Heavy,
        }
    }

    /// Take the closure out, leaving `None` behind. Used by the worker
    /// thread immediately before execution; a job is never run twice.
    pub fn take_closure(&mut self) -> Option<Closure<R>> {
        self.closure.take()
    }
}

impl<R> Poolable for MicroJob<R> {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn complexity_buckets_follow_duration() {
        let mut job: MicroJob<()> = MicroJob::default();
        job.configure(1, Box::new(|| ()), 0, None);
        assert_eq!(job.estimated_complexity(), Complexity::Unknown);

        job.mark_started();
        sleep(Duration::from_millis(12));
        job.mark_completed();
        assert_eq!(job.estimated_complexity(), Complexity::Moderate);
        assert!(!job.estimated_complexity().is_batching_friendly());
    }

    #[test]
    fn reset_clears_everything_for_recycling() {
        let mut job: MicroJob<i32> = MicroJob::default();
        job.configure(5, Box::new(|| 1), 3, Some(1000));
        job.mark_started();
        job.mark_completed();

        job.reset();
        assert_eq!(job.task_id(), 0);
        assert_eq!(job.priority(), 0);
        assert!(job.timeout_ms().is_none());
        assert!(job.duration_ms().is_none());
        assert!(job.take_closure().is_none());
    }

    #[test]
    fn queue_wait_and_total_elapsed_are_derived_correctly() {
        let mut job: MicroJob<()> = MicroJob::default();
        job.configure(1, Box::new(|| ()), 0, None);
        sleep(Duration::from_millis(5));
        job.mark_started();
        sleep(Duration::from_millis(5));
        job.mark_completed();

        assert!(job.queue_wait_ms().unwrap() >= 4);
        assert!(job.total_elapsed_ms().unwrap() >= 9);
    }

    #[test]
    fn take_closure_runs_exactly_once() {
        let mut job: MicroJob<i32> = MicroJob::default();
        job.configure(1, Box::new(|| 42), 0, None);
        let closure = job.take_closure().expect("closure present");
        assert_eq!(closure(), 42);
        assert!(job.take_closure().is_none());
    }
}
