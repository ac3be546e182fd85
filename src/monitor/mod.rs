// src/monitor/mod.rs
//! Perf Monitor + Autoscaler (C11, §4.11): a periodic tick that samples
//! the other components, keeps a bounded ring of recent samples, fires
//! named-threshold warning callbacks, and issues scale up/down
//! recommendations against the Connection Pool (C3).

use crate::cache::CacheStats;
use crate::meter::MeterSnapshot;
use crate::pool::PoolStats;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(10);
const RING_CAPACITY: usize = 360; // one hour of 10s ticks
const SCALE_COOLDOWN: Duration = Duration::from_secs(60);

/// SPEC_FULL §11's adopted names from `PerformanceMonitor.alert_thresholds`.
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub high_error_rate: f64,
    pub high_response_time_ms: f64,
    pub low_cache_hit_rate: f64,
    pub high_cpu_usage: f64,
    pub high_memory_usage: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            high_error_rate: 0.05,
            high_response_time_ms: 2000.0,
            low_cache_hit_rate: 0.3,
            high_cpu_usage: 0.85,
            high_memory_usage: 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub in_flight: u64,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub pool_size: u32,
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    HighErrorRate,
    HighResponseTime,
    LowCacheHitRate,
    HighCpuUsage,
    HighMemoryUsage,
}

pub trait SystemStats: Send + Sync {
    fn cpu_pct(&self) -> f64;
    fn memory_pct(&self) -> f64;
}

/// Falls back to a fixed low reading — host CPU/memory sampling needs a
/// platform crate the rest of the stack doesn't otherwise pull in; a real
/// deployment can supply a `SystemStats` backed by one.
pub struct StaticSystemStats;
impl SystemStats for StaticSystemStats {
    fn cpu_pct(&self) -> f64 {
        0.0
    }
    fn memory_pct(&self) -> f64 {
        0.0
    }
}

pub type WarningCallback = Box<dyn Fn(AlertKind, Sample) + Send + Sync>;

struct AutoscalerState {
    current_target: usize,
    last_scaled_at: Option<Instant>,
}

pub struct PerfMonitor {
    thresholds: AlertThresholds,
    ring: Mutex<VecDeque<Sample>>,
    callbacks: Mutex<Vec<WarningCallback>>,
    autoscaler: Mutex<AutoscalerState>,
    min_connections: usize,
    max_connections: usize,
    target_connections: AtomicUsize,
}

impl PerfMonitor {
    pub fn new(min_connections: usize, max_connections: usize, initial_target: usize) -> Self {
        Self {
            thresholds: AlertThresholds::default(),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            callbacks: Mutex::new(Vec::new()),
            autoscaler: Mutex::new(AutoscalerState {
                current_target: initial_target,
                last_scaled_at: None,
            }),
            min_connections,
            max_connections,
            target_connections: AtomicUsize::new(initial_target),
        }
    }

    pub fn on_warning(&self, callback: WarningCallback) {
        self.callbacks.lock().push(callback);
    }

    pub fn recent_samples(&self) -> Vec<Sample> {
        self.ring.lock().iter().copied().collect()
    }

    pub fn target_connections(&self) -> usize {
        self.target_connections.load(Ordering::Relaxed)
    }

    /// One tick (§4.11 steps 1-4): sample, append, check thresholds,
    /// apply the autoscaler rule. Returns the scaling decision, if any,
    /// so the caller can publish a new target to C3.
    pub fn tick(
        &self,
        system: &dyn SystemStats,
        meter: MeterSnapshot,
        cache: CacheStats,
        pool: PoolStats,
        queue_depth: usize,
    ) -> Option<ScaleDecision> {
        let total = meter.total_requests.max(1);
        let error_rate = meter.error_count as f64 / total as f64;
        let cache_total = cache.hits + cache.misses;
        let cache_hit_rate = if cache_total == 0 {
            1.0
        } else {
            cache.hits as f64 / cache_total as f64
        };

        let sample = Sample {
            cpu_pct: system.cpu_pct(),
            memory_pct: system.memory_pct(),
            avg_latency_ms: meter.avg_latency_ms,
            error_rate,
            in_flight: meter.in_flight,
            cache_hit_rate,
            cache_size: cache.size,
            pool_size: pool.size,
            queue_depth,
        };

        {
            let mut ring = self.ring.lock();
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(sample);
        }

        self.check_thresholds(sample);
        self.autoscale(sample)
    }

    fn check_thresholds(&self, sample: Sample) {
        let breaches = [
            (sample.error_rate > self.thresholds.high_error_rate, AlertKind::HighErrorRate),
            (
                sample.avg_latency_ms > self.thresholds.high_response_time_ms,
                AlertKind::HighResponseTime,
            ),
            (
                sample.cache_hit_rate < self.thresholds.low_cache_hit_rate,
                AlertKind::LowCacheHitRate,
            ),
            (sample.cpu_pct > self.thresholds.high_cpu_usage, AlertKind::HighCpuUsage),
            (
                sample.memory_pct > self.thresholds.high_memory_usage,
                AlertKind::HighMemoryUsage,
            ),
        ];

        let callbacks = self.callbacks.lock();
        for (breached, kind) in breaches {
            if breached {
                warn!(?kind, ?sample, "perf monitor threshold breach");
                for callback in callbacks.iter() {
                    callback(kind, sample);
                }
            }
        }
    }

    /// §4.11 step 4 + SPEC_FULL §11: scale up at >0.8 utilization with
    /// latency>0.5s or queue_depth>10; scale down at <0.3 utilization with
    /// latency<0.1s and queue_depth<2; 60s cooldown; respects min/max.
    fn autoscale(&self, sample: Sample) -> Option<ScaleDecision> {
        let mut state = self.autoscaler.lock();
        let current = state.current_target.max(1);
        let utilization = sample.in_flight as f64 / current as f64;

        if let Some(last) = state.last_scaled_at {
            if last.elapsed() < SCALE_COOLDOWN {
                return None;
            }
        }

        let scale_up = utilization > 0.8
            && (sample.avg_latency_ms > 500.0 || sample.queue_depth > 10)
            && current < self.max_connections;
        let scale_down = utilization < 0.3
            && sample.avg_latency_ms < 100.0
            && sample.queue_depth < 2
            && current > self.min_connections;

        if scale_up {
            let new_target = (current + (current / 4).max(1)).min(self.max_connections);
            state.current_target = new_target;
            state.last_scaled_at = Some(Instant::now());
            self.target_connections.store(new_target, Ordering::Relaxed);
            info!(new_target, "autoscaler: scaling up connection pool target");
            Some(ScaleDecision::Up(new_target))
        } else if scale_down {
            let new_target = current.saturating_sub((current / 4).max(1)).max(self.min_connections);
            state.current_target = new_target;
            state.last_scaled_at = Some(Instant::now());
            self.target_connections.store(new_target, Ordering::Relaxed);
            info!(new_target, "autoscaler: scaling down connection pool target");
            Some(ScaleDecision::Down(new_target))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up(usize),
    Down(usize),
}

/// Spawns the periodic tick as a background task. The closure captures
/// whatever snapshot sources the orchestrator wires up.
pub fn spawn_periodic<F>(monitor: Arc<PerfMonitor>, period: Duration, mut tick_fn: F) -> JoinHandle<()>
where
    F: FnMut(&PerfMonitor) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            tick_fn(&monitor);
        }
    })
}
