//! Public façade: the single entry point exposing submit / await / batch /
//! configure.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use crate::config::{EngineOptions, WorkersSpec};
use crate::core::adaptive::{auto_detect, AdaptiveConfigurator, MetricsSample};
use crate::core::error::EngineError;
use crate::core::memory_manager::{JobOutcome, MemoryManager, MemoryManagerConfig, MemoryStats};
use crate::core::micro_job::Closure;
use crate::core::stats::Snapshot;
use crate::core::value::ValueView;
use crate::core::worker_pool::{WorkerPool, WorkerPoolConfig};
use crate::Mutex;

/// Lifecycle state of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed but not yet accepting submissions (never observed from
    /// outside `Engine::new`, which returns only a `Running` instance; kept
    /// for parity with the process-wide singleton's lazy construction).
    LazyInit,
    /// Accepting submissions.
    Running,
    /// `shutdown()` has been called; draining in-flight work.
    ShuttingDown,
    /// Fully stopped: no worker thread alive, no timer armed.
    Terminated,
}

/// One process-wide entry point: submit closures, await their results,
/// batch them with progress reporting, and retune configuration live.
pub struct Engine {
    state: Mutex<EngineState>,
    options: Mutex<EngineOptions>,
    memory: Arc<MemoryManager>,
    pool: Arc<WorkerPool>,
    configurator: AdaptiveConfigurator,
}

impl Engine {
    /// Construct and start a new engine from `options`.
    ///
    /// # Errors
    ///
    /// `invalid_input` if any option fails validation (see
    /// [`EngineOptions::validate`]).
    pub fn new(options: EngineOptions) -> Result<Arc<Self>, EngineError> {
        options.validate().map_err(EngineError::InvalidInput)?;
        crate::util::telemetry::init_tracing(options.log_level);

        let configurator = AdaptiveConfigurator::new(options.workload_type);
        let worker_count = Self::resolve_worker_count(&options, &configurator);
        let total_ram = configurator.system_probe().total_ram_bytes;

        let memory = MemoryManager::new(MemoryManagerConfig {
            pool_initial: options.microjob_pool_initial,
            pool_max: options.microjob_pool_max,
            cleanup_interval_ms: options
                .cleanup_interval_ms
                .unwrap_or_else(|| options.memory_cleanup.interval_ms()),
            memory_limit_percent: options.memory_limit.as_percent(total_ram),
        });

        let pool = WorkerPool::new(
            Arc::clone(&memory),
            WorkerPoolConfig {
                worker_count,
                queue_capacity: options.backpressure.buffer_size,
                backpressure: options.backpressure.strategy,
                ..WorkerPoolConfig::default()
            },
        );

        Ok(Arc::new(Self {
            state: Mutex::new(EngineState::Running),
            options: Mutex::new(options),
            memory,
            pool,
            configurator,
        }))
    }

    /// A process-wide engine instance, lazily built with default options on
    /// first use. Exists for hosts that want the legacy global-façade
    /// ergonomics instead of threading an `Arc<Engine>` through explicitly.
    #[must_use]
    pub fn default_instance() -> Arc<Self> {
        static INSTANCE: OnceLock<Arc<Engine>> = OnceLock::new();
        Arc::clone(INSTANCE.get_or_init(|| {
            Self::new(EngineOptions::default()).expect("default engine options always validate")
        }))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Merge `options` into the current configuration: resizes the worker
    /// pool, updates the memory ceiling and cleanup cadence, and — if
    /// `adaptive_mode` is set — applies the configurator's latest proposal.
    ///
    /// # Errors
    ///
    /// `invalid_input` if any option fails validation.
    pub fn configure(&self, options: EngineOptions) -> Result<(), EngineError> {
        options.validate().map_err(EngineError::InvalidInput)?;

        let worker_count = Self::resolve_worker_count(&options, &self.configurator);
        self.pool.set_worker_count(worker_count);

        let total_ram = self.configurator.system_probe().total_ram_bytes;
        self.memory.update_config(
            Some(
                options
                    .cleanup_interval_ms
                    .unwrap_or_else(|| options.memory_cleanup.interval_ms()),
            ),
            Some(options.memory_limit.as_percent(total_ram)),
        );

        if options.adaptive_mode {
            let sample = self.sample_metrics();
            let snap = self.pool.snapshot();
            // Heuristic mode only overrides the declared workload_type once
            // enough same-shaped samples have accumulated; otherwise a cold
            // pool (few, short-lived tasks) would classify against noise.
            let profile = if options.heuristic_mode
                && snap.completed >= options.heuristic_min_samples as u64
                && sample.avg_exec_ms >= options.min_task_duration_ms as f64
            {
                auto_detect(sample)
            } else {
                options.workload_type
            };
            let proposal = self.configurator.optimize(profile, sample);
            self.pool.set_worker_count(proposal.worker_count);
        }

        *self.options.lock() = options;
        Ok(())
    }

    /// Submit one infallible closure for execution.
    ///
    /// # Errors
    ///
    /// `resource_exhausted` if the memory ceiling or backpressure strategy
    /// refuses the submission; `internal` if the engine isn't running.
    pub fn run<F, T>(&self, closure: F) -> Result<TaskHandle<T>, EngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Any + Send + Sync + fmt::Debug + Clone,
    {
        self.ensure_running()?;
        let timeout_ms = self.options.lock().default_timeout_ms;
        let boxed: Closure<JobOutcome> = Box::new(move || Ok(ValueView::new(closure())));
        let id = self.pool.submit(boxed, 0, timeout_ms)?;
        Ok(TaskHandle::new(Arc::clone(&self.pool), id))
    }

    /// Submit one fallible closure. An `Err` return is reported as the
    /// task's failure reason rather than caught as a panic.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    pub fn try_run<F, T, E>(&self, closure: F) -> Result<TaskHandle<T>, EngineError>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Any + Send + Sync + fmt::Debug + Clone,
        E: fmt::Display,
    {
        self.ensure_running()?;
        let timeout_ms = self.options.lock().default_timeout_ms;
        let boxed: Closure<JobOutcome> =
            Box::new(move || closure().map(ValueView::new).map_err(|e| e.to_string()));
        let id = self.pool.submit(boxed, 0, timeout_ms)?;
        Ok(TaskHandle::new(Arc::clone(&self.pool), id))
    }

    /// Submit N closures and await every result. Resolves with every value
    /// on success; on the first failure, resolves with the failing
    /// closure's index and reason (closures submitted after it are
    /// cancelled).
    pub fn run_all<F, T>(&self, closures: Vec<F>) -> Result<Vec<T>, RunAllFailure>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Any + Send + Sync + fmt::Debug + Clone,
    {
        let mut handles = Vec::with_capacity(closures.len());
        for (index, closure) in closures.into_iter().enumerate() {
            match self.run(closure) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in &handles {
                        handle.cancel();
                    }
                    return Err(RunAllFailure {
                        index,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.iter().enumerate() {
            match handle.await_result() {
                Ok(value) => results.push(value),
                Err(err) => {
                    return Err(RunAllFailure {
                        index,
                        reason: err.to_string(),
                    })
                }
            }
        }
        Ok(results)
    }

    /// Submit N named closures and await every outcome, independent of one
    /// another's success or failure. `progress`, if given, is invoked after
    /// each task reaches a terminal state with `(completed, total, name)`.
    pub fn batch<F, T>(
        &self,
        tasks: Vec<NamedTask<F>>,
        mut progress: Option<&mut dyn FnMut(usize, usize, &str)>,
    ) -> Vec<BatchRecord<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Any + Send + Sync + fmt::Debug + Clone,
    {
        let total = tasks.len();
        let submissions: Vec<(String, Result<TaskHandle<T>, EngineError>)> =
            tasks.into_iter().map(|t| (t.name, self.run(t.closure))).collect();

        let mut records = Vec::with_capacity(submissions.len());
        for (index, (name, handle)) in submissions.into_iter().enumerate() {
            let record = match handle {
                Ok(h) => match h.await_result() {
                    Ok(value) => BatchRecord {
                        duration_ms: h.duration_ms(),
                        name: name.clone(),
                        success: true,
                        result: Some(value),
                        error: None,
                    },
                    Err(err) => BatchRecord {
                        duration_ms: h.duration_ms(),
                        name: name.clone(),
                        success: false,
                        result: None,
                        error: Some(err.to_string()),
                    },
                },
                Err(err) => BatchRecord {
                    name: name.clone(),
                    success: false,
                    result: None,
                    error: Some(err.to_string()),
                    duration_ms: None,
                },
            };
            if let Some(cb) = progress.as_deref_mut() {
                cb(index + 1, total, &name);
            }
            records.push(record);
        }
        records
    }

    /// Current counters and per-worker utilization.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.pool.snapshot()
    }

    /// Current memory-manager stats (pool counters, system memory).
    #[must_use]
    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    /// Stop accepting submissions, drain in-flight work, and release the
    /// memory manager and timers. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, EngineState::ShuttingDown | EngineState::Terminated) {
                return;
            }
            *state = EngineState::ShuttingDown;
        }
        self.pool.shutdown();
        self.memory.shutdown();
        *self.state.lock() = EngineState::Terminated;
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if *self.state.lock() == EngineState::Running {
            Ok(())
        } else {
            Err(EngineError::Internal("engine is not running".to_string()))
        }
    }

    fn resolve_worker_count(options: &EngineOptions, configurator: &AdaptiveConfigurator) -> usize {
        match options.workers {
            WorkersSpec::Fixed(n) => n.max(1),
            WorkersSpec::Auto => configurator
                .optimize(options.workload_type, MetricsSample::default())
                .worker_count,
            WorkersSpec::Scaled { min, max } => {
                let proposed = configurator
                    .optimize(options.workload_type, MetricsSample::default())
                    .worker_count;
                proposed.clamp(min, max)
            }
        }
    }

    fn sample_metrics(&self) -> MetricsSample {
        let snap = self.pool.snapshot();
        let mem = self.memory.stats();

        let cpu_utilization = if snap.per_worker_utilization.is_empty() {
            0.0
        } else {
            snap.per_worker_utilization.iter().map(|&u| f64::from(u)).sum::<f64>()
                / snap.per_worker_utilization.len() as f64
        };
        let throughput_per_sec = if snap.total_exec_ms == 0 {
            0.0
        } else {
            1000.0 * snap.completed as f64 / snap.total_exec_ms as f64
        };

        MetricsSample {
            cpu_utilization,
            memory_usage_percent: mem.system.used_percent,
            throughput_per_sec,
            avg_exec_ms: snap.avg_exec_ms,
        }
    }
}

/// A handle to one submitted task, typed to the closure's return value.
pub struct TaskHandle<T> {
    pool: Arc<WorkerPool>,
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync + Clone> TaskHandle<T> {
    fn new(pool: Arc<WorkerPool>, id: u64) -> Self {
        Self {
            pool,
            id,
            _marker: PhantomData,
        }
    }

    /// The task's stable id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking: has the task reached a terminal state?
    pub fn is_finished(&self) -> Result<bool, EngineError> {
        self.pool.is_finished(self.id)
    }

    /// Cancel the task if it hasn't started running yet.
    pub fn cancel(&self) -> bool {
        self.pool.cancel(self.id)
    }

    /// Measured execution duration, once the closure has run.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.pool.duration_of(self.id).ok().flatten()
    }

    /// Block until the task is terminal, then return its result.
    ///
    /// # Errors
    ///
    /// The task's own terminal error (`user_error`, `timeout`, `cancelled`),
    /// or `internal` if the closure's return type doesn't match `T` (this
    /// would indicate a bug in the engine, not host misuse — `T` is fixed
    /// at submission time).
    pub fn await_result(&self) -> Result<T, EngineError> {
        let view = self.pool.await_one(self.id)?;
        view.downcast::<T>()
            .ok_or_else(|| EngineError::Internal("task result type mismatch".to_string()))
    }

    /// Non-blocking: `Some(value)` once the task has completed
    /// successfully, `None` while pending/running or if it failed.
    pub fn try_result(&self) -> Result<Option<T>, EngineError> {
        let view = self.pool.result_of(self.id)?;
        Ok(view.and_then(|v| v.downcast::<T>()))
    }
}

/// One entry of a [`Engine::batch`] submission.
pub struct NamedTask<F> {
    /// A host-assigned label, echoed back in the resulting [`BatchRecord`].
    pub name: String,
    /// The closure to run.
    pub closure: F,
}

/// Per-entry outcome of a [`Engine::batch`] call.
pub struct BatchRecord<T> {
    /// The task's name, as given in the corresponding [`NamedTask`].
    pub name: String,
    /// Whether the task completed successfully.
    pub success: bool,
    /// The task's result, if it succeeded.
    pub result: Option<T>,
    /// The failure reason, if it did not succeed (submission error, closure
    /// failure, timeout, or cancellation).
    pub error: Option<String>,
    /// Measured execution duration, if the closure ran.
    pub duration_ms: Option<u64>,
}

/// The failure carried by [`Engine::run_all`] when any submitted closure
/// doesn't resolve successfully.
#[derive(Debug, Clone)]
pub struct RunAllFailure {
    /// Index of the first closure (in submission order) that failed.
    pub index: usize,
    /// Its failure reason.
    pub reason: String,
}

impl fmt::Display for RunAllFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task at index {} failed: {}", self.index, self.reason)
    }
}

impl std::error::Error for RunAllFailure {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backpressure, CleanupPolicy, MemoryLimit};
    use crate::core::adaptive::WorkloadType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_engine() -> Arc<Engine> {
        Engine::new(EngineOptions {
            workers: WorkersSpec::Fixed(2),
            ..EngineOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn scenario_1_echo() {
        let engine = small_engine();
        let handle = engine.run(|| 42i32).unwrap();
        assert_eq!(handle.await_result().unwrap(), 42);
        engine.shutdown();
    }

    #[test]
    fn scenario_2_parallel_speedup_all_tasks_complete() {
        let engine = Engine::new(EngineOptions {
            workers: WorkersSpec::Fixed(8),
            ..EngineOptions::default()
        })
        .unwrap();

        let closures: Vec<_> = (0..8)
            .map(|i| {
                move || {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    i
                }
            })
            .collect();
        let start = std::time::Instant::now();
        let results = engine.run_all(closures).unwrap();
        assert_eq!(results.len(), 8);
        assert!(start.elapsed() < std::time::Duration::from_millis(160));
        engine.shutdown();
    }

    #[test]
    fn try_run_reports_explicit_failure_reason() {
        let engine = small_engine();
        let handle = engine.try_run(|| Err::<i32, _>("explicit failure")).unwrap();
        let err = handle.await_result().unwrap_err();
        assert!(matches!(err, EngineError::UserError(_)));
        engine.shutdown();
    }

    #[test]
    fn run_all_reports_failing_index_and_reason() {
        let engine = small_engine();
        let closures: Vec<Box<dyn FnOnce() -> i32 + Send>> = vec![
            Box::new(|| 1),
            Box::new(|| panic!("boom")),
            Box::new(|| 3),
        ];
        let err = engine.run_all(closures).unwrap_err();
        assert_eq!(err.index, 1);
        assert!(err.reason.contains("boom"));
        engine.shutdown();
    }

    #[test]
    fn batch_produces_one_record_per_named_task_with_progress_reporting() {
        let engine = small_engine();
        let tasks = vec![
            NamedTask {
                name: "a".to_string(),
                closure: || 1i32,
            },
            NamedTask {
                name: "b".to_string(),
                closure: || panic!("nope"),
            },
        ];
        let seen = AtomicUsize::new(0);
        let mut progress = |completed: usize, total: usize, _name: &str| {
            assert_eq!(total, 2);
            seen.store(completed, Ordering::SeqCst);
        };
        let records = engine.batch(tasks, Some(&mut progress));

        assert_eq!(records.len(), 2);
        assert!(records[0].success);
        assert_eq!(records[0].result, Some(1));
        assert!(!records[1].success);
        assert!(records[1].error.is_some());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        engine.shutdown();
    }

    #[test]
    fn configure_resizes_worker_count() {
        let engine = small_engine();
        engine
            .configure(EngineOptions {
                workers: WorkersSpec::Fixed(5),
                ..EngineOptions::default()
            })
            .unwrap();
        let handle = engine.run(|| 1i32).unwrap();
        assert!(handle.await_result().is_ok());
        engine.shutdown();
    }

    #[test]
    fn configure_applies_adaptive_retune_when_enabled() {
        let engine = small_engine();
        engine
            .configure(EngineOptions {
                adaptive_mode: true,
                workload_type: WorkloadType::CpuIntensive,
                ..EngineOptions::default()
            })
            .unwrap();
        assert_eq!(engine.configurator.current_profile(), WorkloadType::CpuIntensive);
        engine.shutdown();
    }

    #[test]
    fn heuristic_mode_is_ignored_below_the_sample_floor() {
        let engine = small_engine();
        // No tasks have run yet, so `heuristic_min_samples` can't be met;
        // the declared workload_type must still win.
        engine
            .configure(EngineOptions {
                adaptive_mode: true,
                heuristic_mode: true,
                heuristic_min_samples: 5,
                workload_type: WorkloadType::MemoryIntensive,
                ..EngineOptions::default()
            })
            .unwrap();
        assert_eq!(engine.configurator.current_profile(), WorkloadType::MemoryIntensive);
        engine.shutdown();
    }

    #[test]
    fn heuristic_mode_overrides_declared_profile_once_enough_samples_exist() {
        let engine = small_engine();
        for _ in 0..3 {
            let handle = engine
                .run(|| {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                })
                .unwrap();
            handle.await_result().unwrap();
        }

        engine
            .configure(EngineOptions {
                adaptive_mode: true,
                heuristic_mode: true,
                heuristic_min_samples: 2,
                min_task_duration_ms: 1,
                workload_type: WorkloadType::MemoryIntensive,
                ..EngineOptions::default()
            })
            .unwrap();
        // With real, non-zero-duration samples collected, the classifier
        // runs instead of trusting the declared profile verbatim.
        assert_ne!(engine.configurator.current_profile(), WorkloadType::MemoryIntensive);
        engine.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_reaches_terminated() {
        let engine = small_engine();
        engine.shutdown();
        engine.shutdown();
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let engine = small_engine();
        engine.shutdown();
        let err = engine.run(|| 1i32).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    #[test]
    fn default_instance_is_a_shared_singleton() {
        let a = Engine::default_instance();
        let b = Engine::default_instance();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn memory_limit_backpressure_and_cleanup_policy_options_construct_cleanly() {
        let engine = Engine::new(EngineOptions {
            memory_limit: MemoryLimit::Percent(80),
            memory_cleanup: CleanupPolicy::Aggressive,
            backpressure: Backpressure {
                strategy: crate::core::worker_pool::BackpressureStrategy::DropOldest,
                buffer_size: 4,
            },
            workers: WorkersSpec::Fixed(1),
            ..EngineOptions::default()
        })
        .unwrap();
        let handle = engine.run(|| 1i32).unwrap();
        assert!(handle.await_result().is_ok());
        engine.shutdown();
    }
}
