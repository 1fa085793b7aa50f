//! Adaptive configurator: system probing, workload profile selection, and
//! metric-driven retuning.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Coarse hardware classification derived from core count and RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// `cores < 4` or `ram < 8 GiB`.
    LowEnd,
    /// `cores >= 4` and `ram >= 8 GiB`.
    MidRange,
    /// `cores >= 8` and `ram >= 16 GiB`.
    HighEnd,
}

const GIB: u64 = 1024 * 1024 * 1024;

/// One-shot (refreshable on demand) facts about the host machine.
#[derive(Debug, Clone, Copy)]
pub struct SystemProbe {
    /// Logical core count.
    pub logical_cores: usize,
    /// Total installed RAM, in bytes.
    pub total_ram_bytes: u64,
    /// Coarse hardware tier.
    pub tier: Tier,
}

impl SystemProbe {
    /// Probe the host now.
    #[must_use]
    pub fn detect() -> Self {
        let logical_cores = num_cpus::get();
        let mut system = sysinfo::System::new_all();
        system.refresh_memory();
        let total_ram_bytes = system.total_memory();
        let tier = Self::classify(logical_cores, total_ram_bytes);
        Self {
            logical_cores,
            total_ram_bytes,
            tier,
        }
    }

    fn classify(cores: usize, ram_bytes: u64) -> Tier {
        if cores >= 8 && ram_bytes >= 16 * GIB {
            Tier::HighEnd
        } else if cores >= 4 && ram_bytes >= 8 * GIB {
            Tier::MidRange
        } else {
            Tier::LowEnd
        }
    }
}

/// A named workload profile; selects a target configuration tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadType {
    /// Long-running, CPU-bound closures.
    CpuIntensive,
    /// Short, I/O-bound closures.
    IoIntensive,
    /// Closures with large working sets.
    MemoryIntensive,
    /// Default, no strong signal either way.
    Balanced,
}

/// Target configuration tuple produced by the configurator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileConfig {
    /// Worker thread count.
    pub worker_count: usize,
    /// Batch size hint.
    pub batch_size: usize,
    /// Event-loop poll interval while awaiting, in milliseconds.
    pub poll_interval_ms: u64,
    /// Percent of system memory at which submissions are refused.
    pub memory_limit_percent: u8,
    /// Micro-job pool initial size.
    pub pool_initial: usize,
    /// Micro-job pool max size.
    pub pool_max: usize,
    /// Default advisory timeout, in milliseconds.
    pub default_timeout_ms: u64,
}

fn base_profile(profile: WorkloadType, cores: usize) -> ProfileConfig {
    let c = cores as f64;
    match profile {
        WorkloadType::CpuIntensive => ProfileConfig {
            worker_count: ((2.0 * c) as usize).min(32).max(1),
            batch_size: 200,
            poll_interval_ms: 5,
            memory_limit_percent: 70,
            pool_initial: 50,
            pool_max: 200,
            default_timeout_ms: 60_000,
        },
        WorkloadType::IoIntensive => ProfileConfig {
            worker_count: ((4.0 * c) as usize).min(64).max(1),
            batch_size: 50,
            poll_interval_ms: 1,
            memory_limit_percent: 60,
            pool_initial: 100,
            pool_max: 500,
            default_timeout_ms: 30_000,
        },
        WorkloadType::MemoryIntensive => ProfileConfig {
            worker_count: (c as usize).min(16).max(1),
            batch_size: 25,
            poll_interval_ms: 10,
            memory_limit_percent: 50,
            pool_initial: 25,
            pool_max: 100,
            default_timeout_ms: 120_000,
        },
        WorkloadType::Balanced => ProfileConfig {
            worker_count: ((1.5 * c) as usize).min(24).max(1),
            batch_size: 100,
            poll_interval_ms: 5,
            memory_limit_percent: 65,
            pool_initial: 75,
            pool_max: 300,
            default_timeout_ms: 45_000,
        },
    }
}

/// A sampled performance snapshot fed into the configurator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSample {
    /// CPU utilization percent, `[0, 100]`.
    pub cpu_utilization: f64,
    /// Memory usage percent, `[0, 100]`.
    pub memory_usage_percent: f64,
    /// Completed tasks per second.
    pub throughput_per_sec: f64,
    /// Average closure execution time, in milliseconds.
    pub avg_exec_ms: f64,
}

/// Classify a metrics sample into the workload profile it looks most like.
#[must_use]
pub fn auto_detect(sample: MetricsSample) -> WorkloadType {
    if sample.cpu_utilization > 80.0 && sample.avg_exec_ms > 100.0 {
        WorkloadType::CpuIntensive
    } else if sample.cpu_utilization < 50.0 && sample.avg_exec_ms < 50.0 && sample.throughput_per_sec > 500.0 {
        WorkloadType::IoIntensive
    } else if sample.memory_usage_percent > 70.0 && sample.avg_exec_ms > 200.0 {
        WorkloadType::MemoryIntensive
    } else {
        WorkloadType::Balanced
    }
}

fn apply_tier(mut cfg: ProfileConfig, tier: Tier, measured_mem_percent: f64) -> ProfileConfig {
    match tier {
        Tier::HighEnd => {
            cfg.worker_count = ((cfg.worker_count as f64 * 1.5) as usize).min(128);
            cfg.batch_size = ((cfg.batch_size as f64 * 1.2) as usize).min(500);
            cfg.pool_max = ((cfg.pool_max as f64 * 1.5) as usize).min(1000);
        }
        Tier::LowEnd => {
            cfg.worker_count = ((cfg.worker_count as f64 * 0.7) as usize).max(2);
            cfg.batch_size = ((cfg.batch_size as f64 * 0.8) as usize).max(10);
            cfg.pool_max = ((cfg.pool_max as f64 * 0.7) as usize).max(50);
        }
        Tier::MidRange => {}
    }
    if measured_mem_percent > 80.0 {
        cfg.memory_limit_percent = ((f64::from(cfg.memory_limit_percent) * 0.8) as u8).max(40);
        cfg.batch_size = ((cfg.batch_size as f64 * 0.7) as usize).max(10);
    }
    cfg
}

fn apply_metrics(mut cfg: ProfileConfig, sample: MetricsSample) -> ProfileConfig {
    if sample.cpu_utilization > 90.0 {
        cfg.worker_count = ((cfg.worker_count as f64 * 0.8) as usize).max(1);
        cfg.batch_size = ((cfg.batch_size as f64 * 0.8) as usize).max(1);
    } else if sample.cpu_utilization < 30.0 {
        cfg.worker_count = (cfg.worker_count as f64 * 1.2) as usize;
        cfg.batch_size = (cfg.batch_size as f64 * 1.2) as usize;
    }

    if sample.memory_usage_percent > 85.0 {
        cfg.memory_limit_percent = (f64::from(cfg.memory_limit_percent) * 0.7) as u8;
        cfg.batch_size = ((cfg.batch_size as f64 * 0.6) as usize).max(1);
    } else if sample.memory_usage_percent < 20.0 {
        cfg.memory_limit_percent = ((f64::from(cfg.memory_limit_percent) * 1.1) as u8).min(100);
        cfg.batch_size = (cfg.batch_size as f64 * 1.3) as usize;
    }

    if sample.throughput_per_sec > 1000.0 {
        cfg.poll_interval_ms = ((cfg.poll_interval_ms as f64 * 0.8) as u64).max(1);
        cfg.batch_size = (cfg.batch_size as f64 * 1.1) as usize;
    } else if sample.throughput_per_sec < 50.0 {
        cfg.poll_interval_ms = (cfg.poll_interval_ms as f64 * 1.2) as u64;
        cfg.batch_size = ((cfg.batch_size as f64 * 0.9) as usize).max(1);
    }

    cfg
}

/// One recorded optimization, kept in the ring buffer for trend damping.
#[derive(Debug, Clone, Copy)]
struct Optimization {
    worker_count: usize,
    batch_size: usize,
}

const RING_CAPACITY: usize = 20;
const TREND_WINDOW: usize = 5;
const TREND_DRIFT_THRESHOLD: f64 = 0.10;
const TREND_NUDGE: f64 = 0.10;

/// Observes system capacity and runtime metrics, selects a workload
/// profile, and proposes retuned configuration. Never preempts: proposals
/// are applied lazily by the façade at the next `configure()`/`optimize()`.
pub struct AdaptiveConfigurator {
    probe: SystemProbe,
    state: Mutex<State>,
}

struct State {
    current_profile: WorkloadType,
    history: VecDeque<Optimization>,
}

impl AdaptiveConfigurator {
    /// Create a configurator, probing the host once.
    #[must_use]
    pub fn new(initial_profile: WorkloadType) -> Self {
        Self {
            probe: SystemProbe::detect(),
            state: Mutex::new(State {
                current_profile: initial_profile,
                history: VecDeque::with_capacity(RING_CAPACITY),
            }),
        }
    }

    /// Cached system facts from the last probe.
    #[must_use]
    pub const fn system_probe(&self) -> SystemProbe {
        self.probe
    }

    /// Currently selected workload profile.
    #[must_use]
    pub fn current_profile(&self) -> WorkloadType {
        self.state.lock().current_profile
    }

    /// Re-probe the host (cores/RAM rarely change, but a host may call this
    /// after a container resize).
    pub fn refresh_probe(&mut self) {
        self.probe = SystemProbe::detect();
    }

    /// Produce a retuned configuration for `profile` given the latest
    /// `sample`, applying tier adjustments, metric adjustments, and trend
    /// damping, and recording the result in the ring buffer.
    pub fn optimize(&self, profile: WorkloadType, sample: MetricsSample) -> ProfileConfig {
        let base = base_profile(profile, self.probe.logical_cores);
        let tiered = apply_tier(base, self.probe.tier, sample.memory_usage_percent);
        let metric_adjusted = apply_metrics(tiered, sample);

        let mut state = self.state.lock();
        let damped = Self::damp_trend(&state.history, metric_adjusted);

        state.current_profile = profile;
        if state.history.len() == RING_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(Optimization {
            worker_count: damped.worker_count,
            batch_size: damped.batch_size,
        });

        damped
    }

    /// Classify `sample` and immediately optimize for the detected profile.
    pub fn auto_tune(&self, sample: MetricsSample) -> (WorkloadType, ProfileConfig) {
        let profile = auto_detect(sample);
        (profile, self.optimize(profile, sample))
    }

    fn damp_trend(history: &VecDeque<Optimization>, proposed: ProfileConfig) -> ProfileConfig {
        if history.len() < TREND_WINDOW {
            return proposed;
        }
        let recent: Vec<&Optimization> = history.iter().rev().take(TREND_WINDOW).collect();
        let avg_workers = recent.iter().map(|o| o.worker_count as f64).sum::<f64>() / recent.len() as f64;
        let avg_batch = recent.iter().map(|o| o.batch_size as f64).sum::<f64>() / recent.len() as f64;

        let mut cfg = proposed;
        if avg_workers > 0.0 {
            let drift = (proposed.worker_count as f64 - avg_workers).abs() / avg_workers;
            if drift > TREND_DRIFT_THRESHOLD {
                let nudged = proposed.worker_count as f64
                    + (avg_workers - proposed.worker_count as f64) * TREND_NUDGE;
                cfg.worker_count = nudged.round().max(1.0) as usize;
            }
        }
        if avg_batch > 0.0 {
            let drift = (proposed.batch_size as f64 - avg_batch).abs() / avg_batch;
            if drift > TREND_DRIFT_THRESHOLD {
                let nudged =
                    proposed.batch_size as f64 + (avg_batch - proposed.batch_size as f64) * TREND_NUDGE;
                cfg.batch_size = nudged.round().max(1.0) as usize;
            }
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_detect_classifies_cpu_intensive() {
        let sample = MetricsSample {
            cpu_utilization: 90.0,
            avg_exec_ms: 150.0,
            throughput_per_sec: 200.0,
            memory_usage_percent: 40.0,
        };
        assert_eq!(auto_detect(sample), WorkloadType::CpuIntensive);
    }

    #[test]
    fn auto_detect_classifies_io_intensive() {
        let sample = MetricsSample {
            cpu_utilization: 20.0,
            avg_exec_ms: 10.0,
            throughput_per_sec: 800.0,
            memory_usage_percent: 20.0,
        };
        assert_eq!(auto_detect(sample), WorkloadType::IoIntensive);
    }

    #[test]
    fn auto_detect_classifies_memory_intensive() {
        let sample = MetricsSample {
            cpu_utilization: 40.0,
            avg_exec_ms: 250.0,
            throughput_per_sec: 100.0,
            memory_usage_percent: 80.0,
        };
        assert_eq!(auto_detect(sample), WorkloadType::MemoryIntensive);
    }

    #[test]
    fn auto_detect_falls_back_to_balanced() {
        let sample = MetricsSample {
            cpu_utilization: 50.0,
            avg_exec_ms: 50.0,
            throughput_per_sec: 100.0,
            memory_usage_percent: 50.0,
        };
        assert_eq!(auto_detect(sample), WorkloadType::Balanced);
    }

    #[test]
    fn high_cpu_retune_reduces_workers_and_batch() {
        let configurator = AdaptiveConfigurator::new(WorkloadType::Balanced);
        let baseline = base_profile(WorkloadType::Balanced, configurator.probe.logical_cores);

        let hot_sample = MetricsSample {
            cpu_utilization: 95.0,
            avg_exec_ms: 50.0,
            throughput_per_sec: 100.0,
            memory_usage_percent: 40.0,
        };
        let retuned = configurator.optimize(WorkloadType::CpuIntensive, hot_sample);

        assert!(retuned.worker_count as f64 <= baseline.worker_count as f64 * 0.8 + 1.0);
        assert_eq!(configurator.current_profile(), WorkloadType::CpuIntensive);
    }

    #[test]
    fn scenario_6_adaptive_retune_from_balanced() {
        let configurator = AdaptiveConfigurator::new(WorkloadType::Balanced);
        let before = configurator.optimize(
            WorkloadType::Balanced,
            MetricsSample {
                cpu_utilization: 50.0,
                avg_exec_ms: 20.0,
                throughput_per_sec: 100.0,
                memory_usage_percent: 40.0,
            },
        );

        let sample = MetricsSample {
            cpu_utilization: 90.0,
            avg_exec_ms: 150.0,
            throughput_per_sec: 200.0,
            memory_usage_percent: 40.0,
        };
        let (profile, after) = configurator.auto_tune(sample);

        assert_eq!(profile, WorkloadType::CpuIntensive);
        assert!(after.worker_count as f64 <= before.worker_count as f64 * 0.8 + 1.0);
    }

    #[test]
    fn trend_damping_pulls_oscillating_proposals_toward_the_average() {
        let configurator = AdaptiveConfigurator::new(WorkloadType::Balanced);
        let steady_sample = MetricsSample {
            cpu_utilization: 50.0,
            avg_exec_ms: 20.0,
            throughput_per_sec: 100.0,
            memory_usage_percent: 40.0,
        };
        for _ in 0..TREND_WINDOW {
            configurator.optimize(WorkloadType::Balanced, steady_sample);
        }

        let spike_sample = MetricsSample {
            cpu_utilization: 95.0,
            avg_exec_ms: 10.0,
            throughput_per_sec: 2000.0,
            memory_usage_percent: 10.0,
        };
        let undamped = apply_metrics(
            apply_tier(
                base_profile(WorkloadType::CpuIntensive, configurator.probe.logical_cores),
                configurator.probe.tier,
                spike_sample.memory_usage_percent,
            ),
            spike_sample,
        );
        let damped = configurator.optimize(WorkloadType::CpuIntensive, spike_sample);

        if undamped.worker_count != damped.worker_count {
            let steady = base_profile(WorkloadType::Balanced, configurator.probe.logical_cores).worker_count;
            let damped_gap = (damped.worker_count as f64 - steady as f64).abs();
            let undamped_gap = (undamped.worker_count as f64 - steady as f64).abs();
            assert!(damped_gap <= undamped_gap);
        }
    }

    #[test]
    fn tier_classification_boundaries() {
        assert_eq!(SystemProbe::classify(16, 32 * GIB), Tier::HighEnd);
        assert_eq!(SystemProbe::classify(4, 8 * GIB), Tier::MidRange);
        assert_eq!(SystemProbe::classify(2, 4 * GIB), Tier::LowEnd);
    }
}
