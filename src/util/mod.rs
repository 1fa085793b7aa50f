//! Shared utilities: clocks and telemetry.

pub mod clock;
pub mod telemetry;

pub use clock::{now_ms, Stopwatch};
pub use telemetry::{init_tracing, LogLevel};
