//! Telemetry helpers for structured logging and tracing.

use serde::{Deserialize, Serialize};

/// Leveled diagnostic output setting, as recognized by the `logging` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No diagnostic output at all.
    Off,
    /// Errors only.
    Error,
    /// Errors and warnings (memory pressure, configuration advice).
    Warn,
    /// Warnings plus lifecycle events (default).
    Info,
    /// Info plus per-task scheduling detail.
    Debug,
    /// Everything, including per-poll detail. Expect this to be noisy.
    Trace,
}

impl LogLevel {
    fn filter_directive(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// Initialize tracing/telemetry at the given level. Idempotent: if a global
/// subscriber is already installed (by the host, or by an earlier call),
/// this is a no-op.
pub fn init_tracing(level: LogLevel) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.filter_directive()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
