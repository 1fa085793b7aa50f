//! Engine configuration: typed options assembled from a host-supplied map.
//!
//! The textual `"2GB"`-style memory parser is an external collaborator (see
//! the crate-level docs); hosts are expected to resolve configuration text
//! upstream and hand the engine already-typed [`ConfigValue`]s.

use std::collections::HashMap;

use crate::core::adaptive::WorkloadType;
use crate::core::worker_pool::BackpressureStrategy;
use crate::util::telemetry::LogLevel;

/// How many worker threads to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkersSpec {
    /// Exact worker count.
    Fixed(usize),
    /// Let the adaptive configurator choose at startup.
    Auto,
    /// Scale between bounds; the configurator picks a value in range.
    Scaled {
        /// Lower bound, inclusive.
        min: usize,
        /// Upper bound, inclusive.
        max: usize,
    },
}

/// A resolved memory ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    /// Absolute byte ceiling.
    Bytes(u64),
    /// Percent of total system memory, `0..=100`.
    Percent(u8),
}

impl MemoryLimit {
    /// Resolve to a `memory_limit_percent` given the host's total RAM.
    /// `Bytes` ceilings below the host's total RAM are expressed as the
    /// equivalent percent; ceilings at or above total RAM clamp to 100.
    #[must_use]
    pub fn as_percent(self, total_ram_bytes: u64) -> u8 {
        match self {
            Self::Percent(p) => p.min(100),
            Self::Bytes(_) if total_ram_bytes == 0 => 100,
            Self::Bytes(b) => (100.0 * b as f64 / total_ram_bytes as f64).min(100.0) as u8,
        }
    }
}

/// Cleanup cadence shorthand; maps onto a concrete interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Tight cleanup loop, trades CPU for a smaller memory footprint.
    Aggressive,
    /// Default cadence.
    Normal,
    /// Loose cleanup loop, trades a larger footprint for fewer wakeups.
    Relaxed,
}

impl CleanupPolicy {
    /// The concrete interval this policy maps onto, in milliseconds.
    #[must_use]
    pub const fn interval_ms(self) -> u64 {
        match self {
            Self::Aggressive => 1_000,
            Self::Normal => 5_000,
            Self::Relaxed => 15_000,
        }
    }
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self::Normal
    }
}

/// Backpressure policy plus its triggering queue depth.
#[derive(Debug, Clone, Copy)]
pub struct Backpressure {
    /// What happens once the pending queue reaches `buffer_size`.
    pub strategy: BackpressureStrategy,
    /// Queue depth (ignored under `Buffer`, which is unbounded).
    pub buffer_size: usize,
}

impl Default for Backpressure {
    fn default() -> Self {
        Self {
            strategy: BackpressureStrategy::Reject,
            buffer_size: 1000,
        }
    }
}

/// Top-level engine configuration, merged from a host-supplied options map
/// (see the recognized-keys table) over these defaults.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker thread count / sizing strategy.
    pub workers: WorkersSpec,
    /// Default advisory timeout, in milliseconds, applied when a submission
    /// doesn't specify its own.
    pub default_timeout_ms: Option<u64>,
    /// Whether the default timeout applies per-task (vs. a whole-batch budget).
    pub per_task_timeout: bool,
    /// Diagnostic log level.
    pub log_level: LogLevel,
    /// System memory ceiling.
    pub memory_limit: MemoryLimit,
    /// Cleanup cadence.
    pub memory_cleanup: CleanupPolicy,
    /// Explicit cleanup interval override, in milliseconds. Takes precedence
    /// over `memory_cleanup` when set.
    pub cleanup_interval_ms: Option<u64>,
    /// Backpressure strategy and trigger.
    pub backpressure: Backpressure,
    /// Micro-job pool: objects pre-built at startup.
    pub microjob_pool_initial: usize,
    /// Micro-job pool: maximum free objects retained.
    pub microjob_pool_max: usize,
    /// Whether the adaptive configurator is allowed to retune the pool.
    pub adaptive_mode: bool,
    /// Workload profile to start from (or to auto-detect against).
    pub workload_type: WorkloadType,
    /// Whether to classify the workload from runtime metrics rather than
    /// trust `workload_type` verbatim. Only takes effect once `adaptive_mode`
    /// is also set, and only once enough samples have accumulated (see
    /// `heuristic_min_samples`, `min_task_duration_ms`).
    pub heuristic_mode: bool,
    /// Average closure duration, in milliseconds, a completed-task sample
    /// must reach before the heuristic classifier trusts it over the
    /// declared `workload_type`.
    pub min_task_duration_ms: u64,
    /// Minimum completed-task count the heuristic classifier requires
    /// before overriding the declared `workload_type`.
    pub heuristic_min_samples: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: WorkersSpec::Auto,
            default_timeout_ms: None,
            per_task_timeout: true,
            log_level: LogLevel::default(),
            memory_limit: MemoryLimit::Percent(70),
            memory_cleanup: CleanupPolicy::default(),
            cleanup_interval_ms: None,
            backpressure: Backpressure::default(),
            microjob_pool_initial: 50,
            microjob_pool_max: 200,
            adaptive_mode: false,
            workload_type: WorkloadType::Balanced,
            heuristic_mode: false,
            min_task_duration_ms: 1,
            heuristic_min_samples: 20,
        }
    }
}

impl EngineOptions {
    /// Validate option values, catching the cases tagged `invalid_input`.
    pub fn validate(&self) -> Result<(), String> {
        if let WorkersSpec::Fixed(0) = self.workers {
            return Err("workers must be greater than 0".into());
        }
        if let WorkersSpec::Scaled { min, max } = self.workers {
            if min == 0 || min > max {
                return Err("workers.min must be > 0 and <= workers.max".into());
            }
        }
        if let MemoryLimit::Percent(p) = self.memory_limit {
            if p == 0 || p > 100 {
                return Err("memoryLimitPercent must be in 1..=100".into());
            }
        }
        if self.microjob_pool_initial > self.microjob_pool_max {
            return Err("microjobPool.initial must be <= microjobPool.max".into());
        }
        if self.heuristic_min_samples == 0 {
            return Err("heuristicMinSamples must be greater than 0".into());
        }
        Ok(())
    }

    /// Merge recognized keys from `map` over the defaults, then validate.
    /// Unknown keys are ignored, per the recognized-keys contract.
    pub fn from_map(map: &HashMap<String, ConfigValue>) -> Result<Self, String> {
        let mut opts = Self::default();

        if let Some(v) = map.get("workers") {
            opts.workers = parse_workers(v)?;
        }
        if let Some(v) = map.get("timeout") {
            match v {
                ConfigValue::Map(inner) => {
                    if let Some(default) = inner.get("default") {
                        opts.default_timeout_ms = Some(default.as_u64("timeout.default")?);
                    }
                    if let Some(per_task) = inner.get("perTask") {
                        opts.per_task_timeout = per_task.as_bool("timeout.perTask")?;
                    }
                }
                other => opts.default_timeout_ms = Some(other.as_u64("timeout")?),
            }
        }
        if let Some(v) = map.get("logging") {
            match v {
                ConfigValue::Map(inner) => {
                    if let Some(level) = inner.get("level") {
                        opts.log_level = parse_log_level(level.as_str("logging.level")?)?;
                    }
                }
                other => opts.log_level = parse_log_level(other.as_str("logging")?)?,
            }
        }
        if let Some(v) = map.get("memory.limit").or_else(|| map.get("maxMemory")) {
            opts.memory_limit = parse_memory_limit(v)?;
        }
        if let Some(v) = map.get("memoryLimitPercent") {
            let p = v.as_u64("memoryLimitPercent")?;
            if p > 100 {
                return Err("memoryLimitPercent must be 0..=100".into());
            }
            opts.memory_limit = MemoryLimit::Percent(p as u8);
        }
        if let Some(v) = map.get("memory.cleanup") {
            opts.memory_cleanup = match v.as_str("memory.cleanup")? {
                "aggressive" => CleanupPolicy::Aggressive,
                "normal" => CleanupPolicy::Normal,
                "relaxed" => CleanupPolicy::Relaxed,
                other => return Err(format!("unrecognized memory.cleanup value `{other}`")),
            };
        }
        if let Some(v) = map.get("cleanupInterval") {
            opts.cleanup_interval_ms = Some(v.as_u64("cleanupInterval")?);
        }
        if let Some(v) = map.get("backpressure") {
            let ConfigValue::Map(inner) = v else {
                return Err("backpressure must be a map of {strategy, bufferSize}".into());
            };
            if let Some(strategy) = inner.get("strategy") {
                opts.backpressure.strategy = match strategy.as_str("backpressure.strategy")? {
                    "buffer" => BackpressureStrategy::Buffer,
                    "drop-oldest" => BackpressureStrategy::DropOldest,
                    "reject" => BackpressureStrategy::Reject,
                    other => return Err(format!("unrecognized backpressure strategy `{other}`")),
                };
            }
            if let Some(size) = inner.get("bufferSize") {
                opts.backpressure.buffer_size = size.as_u64("backpressure.bufferSize")? as usize;
            }
        }
        if let Some(v) = map.get("microjobPool.initial") {
            opts.microjob_pool_initial = v.as_u64("microjobPool.initial")? as usize;
        }
        if let Some(v) = map.get("microjobPool.max") {
            opts.microjob_pool_max = v.as_u64("microjobPool.max")? as usize;
        }
        if let Some(v) = map.get("adaptiveMode") {
            opts.adaptive_mode = v.as_bool("adaptiveMode")?;
        }
        if let Some(v) = map.get("workloadType") {
            opts.workload_type = match v.as_str("workloadType")? {
                "cpu-intensive" => WorkloadType::CpuIntensive,
                "io-intensive" => WorkloadType::IoIntensive,
                "memory-intensive" => WorkloadType::MemoryIntensive,
                "balanced" => WorkloadType::Balanced,
                other => return Err(format!("unrecognized workloadType `{other}`")),
            };
        }
        if let Some(v) = map.get("heuristicMode") {
            opts.heuristic_mode = v.as_bool("heuristicMode")?;
        }
        if let Some(v) = map.get("minTaskDuration") {
            opts.min_task_duration_ms = v.as_u64("minTaskDuration")?;
        }
        if let Some(v) = map.get("heuristicMinSamples") {
            opts.heuristic_min_samples = v.as_u64("heuristicMinSamples")? as usize;
        }

        opts.validate()?;
        Ok(opts)
    }
}

fn parse_workers(v: &ConfigValue) -> Result<WorkersSpec, String> {
    match v {
        ConfigValue::Str(s) if s == "auto" => Ok(WorkersSpec::Auto),
        ConfigValue::UInt(n) => Ok(WorkersSpec::Fixed(*n as usize)),
        ConfigValue::Int(n) if *n > 0 => Ok(WorkersSpec::Fixed(*n as usize)),
        ConfigValue::Map(inner) => {
            let min = inner.get("min").map(|v| v.as_u64("workers.min")).transpose()?;
            let max = inner.get("max").map(|v| v.as_u64("workers.max")).transpose()?;
            match (min, max) {
                (Some(min), Some(max)) => Ok(WorkersSpec::Scaled {
                    min: min as usize,
                    max: max as usize,
                }),
                _ => {
                    if let Some(value) = inner.get("value") {
                        Ok(WorkersSpec::Fixed(value.as_u64("workers.value")? as usize))
                    } else {
                        Ok(WorkersSpec::Auto)
                    }
                }
            }
        }
        _ => Err("workers must be an integer, \"auto\", or {min,max,value}".into()),
    }
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s {
        "off" => Ok(LogLevel::Off),
        "error" => Ok(LogLevel::Error),
        "warn" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        "trace" => Ok(LogLevel::Trace),
        other => Err(format!("unrecognized logging level `{other}`")),
    }
}

fn parse_memory_limit(v: &ConfigValue) -> Result<MemoryLimit, String> {
    match v {
        ConfigValue::UInt(n) => Ok(MemoryLimit::Bytes(*n)),
        ConfigValue::Int(n) if *n >= 0 => Ok(MemoryLimit::Bytes(*n as u64)),
        ConfigValue::Str(s) => parse_byte_string(s).map(MemoryLimit::Bytes),
        _ => Err("memory.limit must be a byte count or a \"N[B|KB|MB|GB|TB]\" string".into()),
    }
}

/// Parses the textual `"2GB"` shorthand. The full host-facing parser (unit
/// aliases, locale-aware separators) is out of scope; this covers the
/// exact-suffix form the recognized-keys table documents.
fn parse_byte_string(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split_at = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split_at);
    let value: u64 = digits.parse().map_err(|_| format!("invalid byte count `{s}`"))?;
    let multiplier: u64 = match suffix.trim().to_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024 * 1024 * 1024 * 1024,
        other => return Err(format!("unrecognized byte suffix `{other}`")),
    };
    Ok(value * multiplier)
}

/// A host-supplied configuration value. Hosts assemble a `HashMap<String,
/// ConfigValue>` from whatever native format they use and hand it to
/// [`EngineOptions::from_map`].
#[derive(Debug, Clone)]
pub enum ConfigValue {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Boolean.
    Bool(bool),
    /// String.
    Str(String),
    /// Nested map, for structured keys like `timeout` or `backpressure`.
    Map(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    fn as_u64(&self, key: &str) -> Result<u64, String> {
        match self {
            Self::UInt(n) => Ok(*n),
            Self::Int(n) if *n >= 0 => Ok(*n as u64),
            _ => Err(format!("`{key}` must be a non-negative integer")),
        }
    }

    fn as_bool(&self, key: &str) -> Result<bool, String> {
        match self {
            Self::Bool(b) => Ok(*b),
            _ => Err(format!("`{key}` must be a boolean")),
        }
    }

    fn as_str(&self, key: &str) -> Result<&str, String> {
        match self {
            Self::Str(s) => Ok(s.as_str()),
            _ => Err(format!("`{key}` must be a string")),
        }
    }
}
