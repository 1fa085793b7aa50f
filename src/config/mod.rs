//! Engine configuration: typed options assembled from a host-supplied map.

pub mod options;

pub use options::{Backpressure, CleanupPolicy, ConfigValue, EngineOptions, MemoryLimit, WorkersSpec};
