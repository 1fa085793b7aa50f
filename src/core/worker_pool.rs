//! Worker pool: OS-thread execution, submit/await, completion dispatch, and
//! advisory timeout enforcement.
//!
//! # Design
//!
//! - **No polling on the hot path**: workers block on `crossbeam_channel::recv`;
//!   awaiters block on the task record's condvar.
//! - **Clean shutdown**: dropping the sender unblocks idle workers naturally;
//!   in-flight workers finish their current closure first.
//! - **Timeouts are advisory**: a dedicated reaper thread marks overdue tasks
//!   failed, but never interrupts the running closure (see the Design Notes).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::core::error::EngineError;
use crate::core::memory_manager::{JobOutcome, MemoryManager};
use crate::core::micro_job::{Closure, MicroJob};
use crate::core::stats::{Snapshot, StatsCollector};
use crate::core::task_record::{Outcome, TaskRecord};
use crate::core::value::ValueView;

/// What happens once the pending-queue reaches `backpressure_buffer_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureStrategy {
    /// No bound beyond the memory ceiling; the channel is unbounded.
    Buffer,
    /// Evict the oldest still-queued (not yet dequeued) micro-job, marking
    /// its task record cancelled, then accept the new submission.
    DropOldest,
    /// Refuse the new submission with `resource_exhausted`.
    Reject,
}

/// Tuning knobs for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to run.
    pub worker_count: usize,
    /// Queue capacity for the `DropOldest`/`Reject` strategies; ignored
    /// under `Buffer`, which uses an unbounded channel.
    pub queue_capacity: usize,
    /// Stack size for each worker thread, in bytes.
    pub stack_size: usize,
    /// How often the timeout reaper scans for overdue tasks.
    pub timeout_reaper_interval_ms: u64,
    /// Behavior once the queue is full.
    pub backpressure: BackpressureStrategy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            queue_capacity: 1024,
            stack_size: 2 * 1024 * 1024,
            timeout_reaper_interval_ms: 10,
            backpressure: BackpressureStrategy::Reject,
        }
    }
}

enum WorkItem {
    Job(MicroJob<JobOutcome>),
    Stop,
}

/// One entry of a batch passed to [`WorkerPool::submit_all`].
pub struct Submission {
    /// The user closure to run.
    pub closure: Closure<JobOutcome>,
    /// Scheduling priority hint.
    pub priority: i32,
    /// Advisory timeout, in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// OS-thread worker pool: submit/await/cancel, completion dispatch, and
/// advisory timeout enforcement. Holds a strong handle to the
/// [`MemoryManager`] it was built with (dependency injection).
pub struct WorkerPool {
    memory: Arc<MemoryManager>,
    stats: Arc<StatsCollector>,
    tx: Mutex<Option<Sender<WorkItem>>>,
    rx: Receiver<WorkItem>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    worker_count: AtomicUsize,
    task_id_counter: AtomicU64,
    shutdown: Arc<AtomicBool>,
    deadlines: Arc<Mutex<BinaryHeap<Reverse<(Instant, u64)>>>>,
    reaper_wake: Arc<Condvar>,
    reaper_wake_lock: Arc<Mutex<()>>,
    reaper_interval_ms: u64,
    reaper_handle: Mutex<Option<JoinHandle<()>>>,
    backpressure: BackpressureStrategy,
}

impl WorkerPool {
    /// Build a pool and spawn its worker threads and timeout reaper.
    #[must_use]
    pub fn new(memory: Arc<MemoryManager>, config: WorkerPoolConfig) -> Arc<Self> {
        let (tx, rx) = if config.backpressure == BackpressureStrategy::Buffer {
            unbounded()
        } else {
            bounded(config.queue_capacity)
        };
        let stats = Arc::new(StatsCollector::new(config.worker_count));
        let shutdown = Arc::new(AtomicBool::new(false));

        let pool = Arc::new(Self {
            memory,
            stats,
            tx: Mutex::new(Some(tx)),
            rx,
            worker_handles: Mutex::new(Vec::with_capacity(config.worker_count)),
            worker_count: AtomicUsize::new(0),
            task_id_counter: AtomicU64::new(1),
            shutdown,
            deadlines: Arc::new(Mutex::new(BinaryHeap::new())),
            reaper_wake: Arc::new(Condvar::new()),
            reaper_wake_lock: Arc::new(Mutex::new(())),
            reaper_interval_ms: config.timeout_reaper_interval_ms,
            reaper_handle: Mutex::new(None),
            backpressure: config.backpressure,
        });

        for _ in 0..config.worker_count {
            pool.spawn_one_worker(config.stack_size);
        }
        pool.spawn_reaper();
        pool
    }

    fn spawn_one_worker(self: &Arc<Self>, stack_size: usize) {
        let worker_id = self.worker_count.fetch_add(1, Ordering::Relaxed);
        let rx = self.rx.clone();
        let memory = Arc::clone(&self.memory);
        let stats = Arc::clone(&self.stats);

        let handle = thread::Builder::new()
            .name(format!("pl-worker-{worker_id}"))
            .stack_size(stack_size)
            .spawn(move || {
                debug!(worker_id, "worker thread started");
                loop {
                    let item = match rx.recv() {
                        Ok(item) => item,
                        Err(_) => break,
                    };
                    match item {
                        WorkItem::Stop => break,
                        WorkItem::Job(job) => run_one_job(worker_id, job, &memory, &stats),
                    }
                }
                debug!(worker_id, "worker thread exiting");
            })
            .expect("failed to spawn worker thread");

        self.worker_handles.lock().push(handle);
    }

    fn spawn_reaper(self: &Arc<Self>) {
        let deadlines = Arc::clone(&self.deadlines);
        let memory = Arc::clone(&self.memory);
        let stats = Arc::clone(&self.stats);
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.reaper_wake);
        let wake_lock = Arc::clone(&self.reaper_wake_lock);
        let interval = self.reaper_interval_ms;

        let handle = thread::Builder::new()
            .name("pl-timeout-reaper".to_string())
            .spawn(move || loop {
                {
                    let mut guard = wake_lock.lock();
                    wake.wait_for(&mut guard, Duration::from_millis(interval));
                }
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                reap_overdue(&deadlines, &memory, &stats);
            })
            .expect("failed to spawn timeout reaper thread");

        *self.reaper_handle.lock() = Some(handle);
    }

    /// Submit one closure for execution. Returns the new task's id.
    ///
    /// # Errors
    ///
    /// `resource_exhausted` if the memory ceiling refuses allocation or the
    /// queue is full; `internal` if the pool has been shut down.
    pub fn submit(&self, closure: Closure<JobOutcome>, priority: i32, timeout_ms: Option<u64>) -> Result<u64, EngineError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(EngineError::Internal("worker pool is shut down".to_string()));
        }
        if !self.memory.can_allocate() {
            return Err(EngineError::ResourceExhausted(
                "system memory ceiling reached".to_string(),
            ));
        }

        let id = self.task_id_counter.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(TaskRecord::<ValueView>::new(id));
        self.memory.register_task(id, Arc::clone(&record));

        let mut job = self.memory.job_pool().acquire();
        job.configure(id, closure, priority, timeout_ms);

        if let Some(ms) = timeout_ms {
            self.deadlines
                .lock()
                .push(Reverse((Instant::now() + Duration::from_millis(ms), id)));
        }

        let tx_guard = self.tx.lock();
        let Some(tx) = tx_guard.as_ref() else {
            drop(tx_guard);
            self.memory.job_pool().release(job);
            self.memory.unregister_task(id);
            return Err(EngineError::Internal("worker pool is shut down".to_string()));
        };

        match tx.try_send(WorkItem::Job(job)) {
            Ok(()) => {
                self.stats.record_submitted();
                Ok(id)
            }
            Err(TrySendError::Full(WorkItem::Job(job))) if self.backpressure == BackpressureStrategy::DropOldest => {
                self.evict_oldest_queued();
                match tx.try_send(WorkItem::Job(job)) {
                    Ok(()) => {
                        self.stats.record_submitted();
                        Ok(id)
                    }
                    Err(TrySendError::Full(WorkItem::Job(job)) | TrySendError::Disconnected(WorkItem::Job(job))) => {
                        self.memory.job_pool().release(job);
                        self.memory.unregister_task(id);
                        Err(EngineError::ResourceExhausted("worker queue is full".to_string()))
                    }
                    Err(_) => {
                        self.memory.unregister_task(id);
                        Err(EngineError::ResourceExhausted("worker queue is full".to_string()))
                    }
                }
            }
            Err(TrySendError::Full(job)) => {
                drop(tx_guard);
                if let WorkItem::Job(job) = job {
                    self.memory.job_pool().release(job);
                }
                self.memory.unregister_task(id);
                Err(EngineError::ResourceExhausted("worker queue is full".to_string()))
            }
            Err(TrySendError::Disconnected(job)) => {
                drop(tx_guard);
                if let WorkItem::Job(job) = job {
                    self.memory.job_pool().release(job);
                }
                self.memory.unregister_task(id);
                Err(EngineError::Internal("worker pool is shut down".to_string()))
            }
        }
    }

    /// Pop the oldest still-queued micro-job off the channel, mark its task
    /// record cancelled, and recycle it. Used by the `drop-oldest`
    /// backpressure strategy.
    fn evict_oldest_queued(&self) {
        if let Ok(WorkItem::Job(job)) = self.rx.try_recv() {
            let id = job.task_id();
            if let Some(record) = self.memory.get_task(id) {
                if record.cancel() {
                    self.stats.record_failed();
                    self.memory.mark_for_cleanup(id);
                }
            }
            self.memory.job_pool().release(job);
        }
    }

    /// Submit a batch of closures, all-or-nothing: either every closure is
    /// enqueued or none are (any partial submission is rolled back by
    /// cancelling the tasks already submitted).
    pub fn submit_all(&self, submissions: Vec<Submission>) -> Result<Vec<u64>, EngineError> {
        if !self.memory.can_allocate() {
            return Err(EngineError::ResourceExhausted(
                "system memory ceiling reached".to_string(),
            ));
        }

        let mut ids = Vec::with_capacity(submissions.len());
        for submission in submissions {
            match self.submit(submission.closure, submission.priority, submission.timeout_ms) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    for id in ids {
                        self.cancel(id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(ids)
    }

    /// Block until task `id` reaches a terminal state and return its outcome.
    ///
    /// # Errors
    ///
    /// `not_found` if `id` is unknown; otherwise the task's own terminal error.
    pub fn await_one(&self, id: u64) -> Result<ValueView, EngineError> {
        let record = self.memory.get_task(id).ok_or(EngineError::NotFound(id))?;
        record.await_result()
    }

    /// Block until every id in `ids` reaches a terminal state, returning one
    /// outcome per id in the same order.
    pub fn await_all(&self, ids: &[u64]) -> Vec<Result<ValueView, EngineError>> {
        ids.iter().map(|&id| self.await_one(id)).collect()
    }

    /// Non-blocking: has `id` reached a terminal state?
    ///
    /// # Errors
    ///
    /// `not_found` if `id` is unknown.
    pub fn is_finished(&self, id: u64) -> Result<bool, EngineError> {
        let record = self.memory.get_task(id).ok_or(EngineError::NotFound(id))?;
        Ok(record.is_finished())
    }

    /// Non-blocking: `Some(result)` if `id` finished successfully, `None` if
    /// still unfinished or it finished with an error.
    pub fn result_of(&self, id: u64) -> Result<Option<ValueView>, EngineError> {
        let record = self.memory.get_task(id).ok_or(EngineError::NotFound(id))?;
        Ok(record.try_outcome().and_then(|outcome| match outcome {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }))
    }

    /// Non-blocking: the failure message if `id` finished with an error.
    pub fn error_of(&self, id: u64) -> Result<Option<String>, EngineError> {
        let record = self.memory.get_task(id).ok_or(EngineError::NotFound(id))?;
        Ok(record.try_outcome().and_then(|outcome| match outcome {
            Outcome::Failure(msg) => Some(msg),
            Outcome::Success(_) => None,
        }))
    }

    /// Non-blocking: whether `id` finished with an error.
    pub fn has_error(&self, id: u64) -> Result<bool, EngineError> {
        Ok(self.error_of(id)?.is_some())
    }

    /// Measured execution duration for `id`, once its closure has run.
    pub fn duration_of(&self, id: u64) -> Result<Option<u64>, EngineError> {
        let record = self.memory.get_task(id).ok_or(EngineError::NotFound(id))?;
        Ok(record.duration_ms())
    }

    /// Cancel `id` if it is still pending. Returns `false` (no-op) if the
    /// task is already running or has already reached a terminal state.
    pub fn cancel(&self, id: u64) -> bool {
        match self.memory.get_task(id) {
            Some(record) => {
                let cancelled = record.cancel();
                if cancelled {
                    self.stats.record_failed();
                    self.memory.mark_for_cleanup(id);
                }
                cancelled
            }
            None => false,
        }
    }

    /// Resize the pool to `n` worker threads. Growing spawns new workers
    /// immediately; shrinking asks the excess workers to stop once they
    /// finish whatever they're currently running.
    pub fn set_worker_count(self: &Arc<Self>, n: usize) {
        let current = self.worker_count.load(Ordering::Relaxed);
        if n > current {
            for _ in 0..(n - current) {
                self.spawn_one_worker(2 * 1024 * 1024);
            }
        } else if n < current {
            let tx_guard = self.tx.lock();
            if let Some(tx) = tx_guard.as_ref() {
                for _ in 0..(current - n) {
                    let _ = tx.send(WorkItem::Stop);
                }
            }
        }
        self.stats.resize_workers(n);
    }

    /// Current counters and per-worker utilization.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut snap = self.stats.snapshot();
        snap.worker_count = self.worker_count.load(Ordering::Relaxed);
        snap
    }

    /// Stop accepting submissions, drain in-flight work, and join all
    /// worker and reaper threads. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        *self.tx.lock() = None;
        self.reaper_wake.notify_all();

        let mut handles = self.worker_handles.lock();
        for (idx, handle) in handles.drain(..).enumerate() {
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let ok = handle.join().is_ok();
                let _ = done_tx.send(ok);
            });
            match done_rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker thread panicked"),
                Err(_) => warn!(worker_id = idx, "worker did not exit in time, detaching"),
            }
            let _ = joiner.join();
        }

        if let Some(handle) = self.reaper_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.tx.lock() = None;
            self.reaper_wake.notify_all();
            debug!("worker pool dropped without explicit shutdown, threads will detach");
        }
    }
}

fn run_one_job(worker_id: usize, mut job: MicroJob<JobOutcome>, memory: &Arc<MemoryManager>, stats: &Arc<StatsCollector>) {
    let id = job.task_id();
    let Some(record) = memory.get_task(id) else {
        memory.job_pool().release(job);
        return;
    };

    if record.is_finished() {
        // Cancelled or timed out before a worker picked it up. `cancel()` and
        // `reap_overdue` already account for stats and cleanup at the point
        // they made the record terminal; don't double-count here.
        memory.job_pool().release(job);
        return;
    }

    record.mark_running();
    job.mark_started();

    let Some(closure) = job.take_closure() else {
        record.set_error("micro-job had no closure");
        record.mark_finished();
        memory.job_pool().release(job);
        memory.mark_for_cleanup(id);
        stats.record_failed();
        return;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(closure));
    job.mark_completed();
    if let Some(ms) = job.duration_ms() {
        record.set_duration_ms(ms);
    }

    // The reaper may have already marked this record terminal (timeout) while
    // the closure was running. Its own stats accounting owns that case; don't
    // double-count here.
    let already_terminal = record.is_finished();

    match outcome {
        Ok(Ok(value)) => {
            record.set_result(value);
            record.mark_finished();
            if !already_terminal {
                stats.record_completed(job.duration_ms().unwrap_or(0));
            }
        }
        Ok(Err(message)) => {
            record.set_error(message);
            record.mark_finished();
            if !already_terminal {
                stats.record_failed();
            }
        }
        Err(panic_payload) => {
            let message = panic_message(&panic_payload);
            debug!(worker_id, task_id = id, message = %message, "task closure panicked");
            record.set_error(message);
            record.mark_finished();
            if !already_terminal {
                stats.record_failed();
            }
        }
    }

    if !already_terminal {
        memory.mark_for_cleanup(id);
    }
    memory.job_pool().release(job);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

fn reap_overdue(
    deadlines: &Arc<Mutex<BinaryHeap<Reverse<(Instant, u64)>>>>,
    memory: &Arc<MemoryManager>,
    stats: &Arc<StatsCollector>,
) {
    let now = Instant::now();
    let mut heap = deadlines.lock();
    while let Some(&Reverse((deadline, id))) = heap.peek() {
        if deadline > now {
            break;
        }
        heap.pop();
        if let Some(record) = memory.get_task(id) {
            if !record.is_finished() {
                record.set_error("timeout");
                record.mark_finished();
                stats.record_failed();
                memory.mark_for_cleanup(id);
            }
        }
    }
}
