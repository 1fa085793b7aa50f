//! Stats collector: lock-free counters plus derived metrics on read.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Point-in-time copy of counters and derived metrics, suitable for
/// external monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Submitted but not yet finished.
    pub active: u64,
    /// Total tasks ever submitted.
    pub total_created: u64,
    /// Tasks that finished successfully.
    pub completed: u64,
    /// Tasks that finished with an error.
    pub failed: u64,
    /// Current worker thread count.
    pub worker_count: usize,
    /// Sum of all completed tasks' execution time, in milliseconds.
    pub total_exec_ms: u64,
    /// `total_exec_ms / max(completed, 1)`.
    pub avg_exec_ms: f64,
    /// `100 * completed / max(total_created, 1)`.
    pub success_rate: f64,
    /// Busy-fraction per worker, each in `[0, 100]`.
    pub per_worker_utilization: Vec<u8>,
}

/// Lock-free atomic counters backing a [`Snapshot`]. All increments are
/// relaxed; `snapshot()` takes a brief mutex only to read per-worker
/// utilization consistently.
#[derive(Debug, Default)]
pub struct StatsCollector {
    active: AtomicU64,
    total_created: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_exec_ms: AtomicU64,
    utilization: Mutex<Vec<AtomicUsize>>,
}

impl StatsCollector {
    /// Create a collector sized for `worker_count` workers.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self {
            utilization: Mutex::new((0..worker_count).map(|_| AtomicUsize::new(0)).collect()),
            ..Self::default()
        }
    }

    /// Record a new submission.
    pub fn record_submitted(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful completion with its execution duration.
    pub fn record_completed(&self, exec_ms: u64) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_exec_ms.fetch_add(exec_ms, Ordering::Relaxed);
    }

    /// Record a failed (or cancelled / timed out) completion.
    pub fn record_failed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Set worker `id`'s busy-fraction for the last sampling window, in `[0, 100]`.
    pub fn set_worker_utilization(&self, id: usize, percent: u8) {
        if let Some(slot) = self.utilization.lock().get(id) {
            slot.store(percent as usize, Ordering::Relaxed);
        }
    }

    /// Resize the utilization table when the pool is resized.
    pub fn resize_workers(&self, worker_count: usize) {
        let mut table = self.utilization.lock();
        table.resize_with(worker_count, || AtomicUsize::new(0));
    }

    /// Derive a [`Snapshot`] from the current counters.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let total_created = self.total_created.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total_exec_ms = self.total_exec_ms.load(Ordering::Relaxed);

        let per_worker_utilization: Vec<u8> = self
            .utilization
            .lock()
            .iter()
            .map(|a| u8::try_from(a.load(Ordering::Relaxed).min(100)).unwrap_or(100))
            .collect();

        Snapshot {
            active: self.active.load(Ordering::Relaxed),
            total_created,
            completed,
            failed,
            worker_count: per_worker_utilization.len(),
            total_exec_ms,
            avg_exec_ms: total_exec_ms as f64 / completed.max(1) as f64,
            success_rate: 100.0 * completed as f64 / total_created.max(1) as f64,
            per_worker_utilization,
        }
    }
}
