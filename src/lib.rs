//! # Adaptive Task Engine
//!
//! A parallel task execution engine that offloads closures from a
//! single-threaded host onto a pool of OS worker threads, returns their
//! results through a submit/await contract, and continuously retunes its own
//! sizing to match observed workload characteristics.
//!
//! ## Core problem solved
//!
//! A single-threaded host (one event loop, one caller) still needs real CPU
//! parallelism for compute-bound work without giving up the familiar
//! "submit a closure, await its result" shape:
//!
//! - **Parallel execution**: closures run on a bounded pool of OS threads.
//! - **Join/await contract**: every submission gets a stable id and a
//!   blocking or non-blocking way to observe its outcome.
//! - **Object pooling**: per-task control blocks are recycled, not
//!   reallocated, under sustained load.
//! - **Memory-aware backpressure**: submissions are refused once system
//!   memory pressure crosses a configured ceiling.
//! - **Self-tuning**: an adaptive configurator observes system capacity and
//!   runtime metrics and proposes retuned pool sizing.
//!
//! ## Quick example
//!
//! ```
//! use adaptive_task_engine::{Engine, EngineOptions};
//!
//! let engine = Engine::new(EngineOptions::default()).unwrap();
//! let handle = engine.run(|| 2 + 2).unwrap();
//! assert_eq!(handle.await_result().unwrap(), 4);
//! engine.shutdown();
//! ```
//!
//! For the full operation set see [`Engine`]; for the lower-level
//! primitives it's built from, see [`core`].

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core engine internals: task records, worker pool, memory manager,
/// adaptive configurator.
pub mod core;
/// Typed engine configuration, assembled from a host-supplied options map.
pub mod config;
/// Condition variable built on `parking_lot`.
pub mod condvar;
/// Mutual-exclusion lock built on `parking_lot`.
pub mod mutex;
/// One-time initialization primitives.
pub mod once;
/// Host-shim contract: `Runnable` and `CompletionSink`.
pub mod runnable;
/// Reader-writer lock built on `parking_lot`.
pub mod rwlock;
/// Shared utilities: clocks and telemetry.
pub mod util;

pub use condvar::Condvar;
pub use mutex::{MappedMutexGuard, Mutex, MutexGuard};
pub use once::{Once, OnceCell};
pub use rwlock::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

pub use config::EngineOptions;
pub use core::error::EngineError;

mod engine;
pub use engine::{BatchRecord, Engine, EngineState, NamedTask, RunAllFailure, TaskHandle};
