//! Core engine internals: task records, the worker pool, memory management,
//! and the adaptive configurator.

pub mod adaptive;
pub mod error;
pub mod memory_manager;
pub mod micro_job;
pub mod object_pool;
pub mod stats;
pub mod task_record;
pub mod value;
pub mod worker_pool;

pub use adaptive::{AdaptiveConfigurator, MetricsSample, ProfileConfig, SystemProbe, Tier, WorkloadType};
pub use error::{AppResult, EngineError};
pub use memory_manager::{MemoryManager, MemoryManagerConfig, MemoryStats, SystemMemory};
pub use micro_job::{Closure, Complexity, MicroJob};
pub use object_pool::{ObjectPool, ObjectPoolStats, Poolable};
pub use stats::{Snapshot, StatsCollector};
pub use task_record::{Outcome, TaskRecord, TaskState};
pub use value::{Value, ValueView};
pub use worker_pool::{BackpressureStrategy, Submission, WorkerPool, WorkerPoolConfig};
