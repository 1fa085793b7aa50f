//! Memory manager: owns the micro-job object pool, the task registry, and
//! the periodic cleanup timer, and enforces the system memory ceiling.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use sysinfo::System;
use tracing::{debug, warn};

use crate::core::micro_job::MicroJob;
use crate::core::object_pool::{ObjectPool, ObjectPoolStats};
use crate::core::task_record::TaskRecord;
use crate::core::value::ValueView;

/// Raw result of running a task closure, before it becomes a terminal
/// [`crate::core::task_record::Outcome`].
pub type JobOutcome = Result<ValueView, String>;

/// A registry entry: the live record plus the generation it was registered
/// under. `mark_for_cleanup` bumps a separately-tracked generation; a
/// cleanup tick only evicts the entry if the generations still match, which
/// is how the source's "weak reference has expired" is expressed without
/// actual weak pointers (see the Design Notes).
struct RegistryEntry {
    record: Arc<TaskRecord<ValueView>>,
    generation: u64,
}

/// System memory snapshot, as returned in `memory stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemory {
    /// Total installed memory, in bytes.
    pub total_bytes: u64,
    /// Free (available) memory, in bytes.
    pub free_bytes: u64,
    /// `total_bytes - free_bytes`.
    pub used_bytes: u64,
    /// `100 * used_bytes / total_bytes`.
    pub used_percent: f64,
}

/// Snapshot returned by [`MemoryManager::stats`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    /// Task records currently registered.
    pub active_tasks: usize,
    /// Task ids scheduled for cleanup but not yet evicted.
    pub pending_cleanup: usize,
    /// Micro-jobs ever constructed by the object pool.
    pub total_created: u64,
    /// Number of cleanup ticks that have run.
    pub cleanup_ops: u64,
    /// Milliseconds since the last cleanup tick.
    pub ms_since_last_cleanup: u64,
    /// Rough estimate of bytes held by live task records and free micro-jobs.
    pub approx_bytes: u64,
    /// Micro-job object pool counters.
    pub pool_stats: ObjectPoolStats,
    /// Host system memory snapshot.
    pub system: SystemMemory,
}

/// Tuning knobs for the memory manager.
#[derive(Debug, Clone)]
pub struct MemoryManagerConfig {
    /// Micro-job pool: objects pre-built at startup.
    pub pool_initial: usize,
    /// Micro-job pool: maximum free objects retained.
    pub pool_max: usize,
    /// How often the cleanup tick fires.
    pub cleanup_interval_ms: u64,
    /// Refuse new submissions once system memory usage exceeds this percent.
    pub memory_limit_percent: u8,
}

impl Default for MemoryManagerConfig {
    fn default() -> Self {
        Self {
            pool_initial: 50,
            pool_max: 200,
            cleanup_interval_ms: 5000,
            memory_limit_percent: 70,
        }
    }
}

const HYSTERESIS_POINTS: f64 = 5.0;

/// Holds the micro-job object pool, the task registry, and the cleanup
/// timer; enforces the system memory ceiling.
pub struct MemoryManager {
    config: Mutex<MemoryManagerConfig>,
    pool: Arc<ObjectPool<MicroJob<JobOutcome>>>,
    registry: RwLock<HashMap<u64, RegistryEntry>>,
    cleanup_queue: Mutex<VecDeque<(u64, u64)>>,
    system: Mutex<System>,
    allocation_refused: AtomicBool,
    cleanup_ops: AtomicU64,
    last_cleanup_ms: AtomicU64,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Condvar>,
    wake_lock: Arc<Mutex<()>>,
    cleanup_thread: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryManager {
    /// Construct a manager and arm its cleanup timer.
    #[must_use]
    pub fn new(config: MemoryManagerConfig) -> Arc<Self> {
        let pool = Arc::new(ObjectPool::new(config.pool_initial, config.pool_max, MicroJob::default));
        let manager = Arc::new(Self {
            config: Mutex::new(config),
            pool,
            registry: RwLock::new(HashMap::new()),
            cleanup_queue: Mutex::new(VecDeque::new()),
            system: Mutex::new(System::new_all()),
            allocation_refused: AtomicBool::new(false),
            cleanup_ops: AtomicU64::new(0),
            last_cleanup_ms: AtomicU64::new(crate::util::clock::now_ms() as u64),
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Condvar::new()),
            wake_lock: Arc::new(Mutex::new(())),
            cleanup_thread: Mutex::new(None),
        });
        manager.spawn_cleanup_thread();
        manager
    }

    fn spawn_cleanup_thread(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let wake_lock = Arc::clone(&self.wake_lock);

        let handle = thread::Builder::new()
            .name("pl-memory-cleanup".to_string())
            .spawn(move || {
                loop {
                    let interval_ms = manager.config.lock().cleanup_interval_ms;
                    let mut guard = wake_lock.lock();
                    let timed_out = wake
                        .wait_for(&mut guard, Duration::from_millis(interval_ms))
                        .timed_out();
                    drop(guard);

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    if timed_out {
                        manager.run_cleanup_tick();
                    }
                }
                debug!("memory manager cleanup thread exiting");
            })
            .expect("failed to spawn cleanup thread");

        *self.cleanup_thread.lock() = Some(handle);
    }

    fn run_cleanup_tick(&self) {
        // (a) drain the cleanup queue. An entry is only evicted if the
        // registry still holds the same generation it was marked under —
        // if the id was re-registered since, the mark is stale and the new
        // registration survives.
        let marks: Vec<(u64, u64)> = {
            let mut queue = self.cleanup_queue.lock();
            queue.drain(..).collect()
        };
        if !marks.is_empty() {
            let mut registry = self.registry.write();
            for (id, marked_generation) in marks {
                let still_same = registry.get(&id).is_some_and(|e| e.generation == marked_generation);
                if still_same {
                    registry.remove(&id);
                }
            }
        }

        // (b) sample system memory, (c) gate future submissions on the result.
        // `available_memory` already accounts for reclaimable buffers/cache
        // on platforms that expose `/proc/meminfo`-style counters.
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        let free = system.available_memory();
        drop(system);

        let used_percent = if total == 0 {
            0.0
        } else {
            100.0 * (total.saturating_sub(free)) as f64 / total as f64
        };
        let limit = f64::from(self.config.lock().memory_limit_percent);

        if used_percent > limit {
            if !self.allocation_refused.swap(true, Ordering::AcqRel) {
                warn!(used_percent, limit, "memory ceiling exceeded, refusing submissions");
            }
        } else if used_percent < limit - HYSTERESIS_POINTS {
            self.allocation_refused.store(false, Ordering::Release);
        }

        self.cleanup_ops.fetch_add(1, Ordering::Relaxed);
        self.last_cleanup_ms
            .store(crate::util::clock::now_ms() as u64, Ordering::Relaxed);
    }

    /// Whether the memory ceiling currently permits new submissions.
    #[must_use]
    pub fn can_allocate(&self) -> bool {
        !self.allocation_refused.load(Ordering::Acquire)
    }

    /// Update the cleanup interval and/or memory ceiling in place, picked up
    /// by the cleanup thread on its next tick. Used by [`crate::Engine::configure`].
    pub fn update_config(&self, cleanup_interval_ms: Option<u64>, memory_limit_percent: Option<u8>) {
        let mut cfg = self.config.lock();
        if let Some(ms) = cleanup_interval_ms {
            cfg.cleanup_interval_ms = ms;
        }
        if let Some(p) = memory_limit_percent {
            cfg.memory_limit_percent = p;
        }
    }

    /// Force the allocation gate open or closed, bypassing the next cleanup
    /// tick's own measurement. Used by callers (and tests) that need to
    /// simulate memory pressure deterministically.
    pub fn force_allocation_refused(&self, refused: bool) {
        self.allocation_refused.store(refused, Ordering::Release);
    }

    /// Register a live task record under `id`, bumping its generation.
    pub fn register_task(&self, id: u64, record: Arc<TaskRecord<ValueView>>) {
        let mut registry = self.registry.write();
        let generation = registry.get(&id).map_or(1, |e| e.generation + 1);
        registry.insert(id, RegistryEntry { record, generation });
    }

    /// Fetch a registered task record by id.
    #[must_use]
    pub fn get_task(&self, id: u64) -> Option<Arc<TaskRecord<ValueView>>> {
        self.registry.read().get(&id).map(|e| Arc::clone(&e.record))
    }

    /// Schedule `id` for eviction on the next cleanup tick, tagged with its
    /// current generation so a later re-registration isn't evicted by mistake.
    pub fn mark_for_cleanup(&self, id: u64) {
        if let Some(generation) = self.registry.read().get(&id).map(|e| e.generation) {
            self.cleanup_queue.lock().push_back((id, generation));
        }
    }

    /// Remove `id` from the registry immediately.
    pub fn unregister_task(&self, id: u64) {
        self.registry.write().remove(&id);
    }

    /// The shared micro-job object pool.
    #[must_use]
    pub fn job_pool(&self) -> &Arc<ObjectPool<MicroJob<JobOutcome>>> {
        &self.pool
    }

    /// Snapshot manager + system stats.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        let free = system.free_memory();
        drop(system);
        let used = total.saturating_sub(free);

        let registry_len = self.registry.read().len();
        let pending = self.cleanup_queue.lock().len();
        let pool_stats = self.pool.stats();

        MemoryStats {
            active_tasks: registry_len,
            pending_cleanup: pending,
            total_created: pool_stats.total_created,
            cleanup_ops: self.cleanup_ops.load(Ordering::Relaxed),
            ms_since_last_cleanup: (crate::util::clock::now_ms() as u64)
                .saturating_sub(self.last_cleanup_ms.load(Ordering::Relaxed)),
            approx_bytes: (registry_len as u64) * 256 + pool_stats.free as u64 * 128,
            pool_stats,
            system: SystemMemory {
                total_bytes: total,
                free_bytes: free,
                used_bytes: used,
                used_percent: if total == 0 { 0.0 } else { 100.0 * used as f64 / total as f64 },
            },
        }
    }

    /// Stop the cleanup thread. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wake.notify_all();
        if let Some(handle) = self.cleanup_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
