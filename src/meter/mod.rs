// src/meter/mod.rs
//! Request Meter (C4, §4.4): lock-free counters for volume and failure
//! rate, plus a single-mutex rolling latency average. Every orchestrator
//! operation brackets itself with `start()`/`finish()` the way the
//! teacher's `BudgetTracker` brackets an LLM call with `record_request`,
//! except this lives entirely in memory — §4.4 asks for counters, not a
//! ledger.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default)]
pub struct MeterSnapshot {
    pub total_requests: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
}

struct RollingLatency {
    avg_ms: f64,
    samples: u64,
}

pub struct RequestMeter {
    total_requests: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
    error_count: AtomicU64,
    latency: Mutex<RollingLatency>,
}

/// RAII guard returned by `start()`. Dropping it without calling
/// `finish()` still decrements `in_flight`, but is recorded as an error —
/// callers are expected to call `finish(success)` explicitly.
pub struct InFlightGuard<'a> {
    meter: &'a RequestMeter,
    finished: bool,
    start: std::time::Instant,
}

impl RequestMeter {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            peak_in_flight: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            latency: Mutex::new(RollingLatency {
                avg_ms: 0.0,
                samples: 0,
            }),
        }
    }

    pub fn start(&self) -> InFlightGuard<'_> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);
        InFlightGuard {
            meter: self,
            finished: false,
            start: std::time::Instant::now(),
        }
    }

    fn record_latency(&self, ms: f64) {
        let mut latency = self.latency.lock();
        latency.samples += 1;
        // Incremental mean: avoids keeping the whole sample history (§4.4
        // only asks for "a rolling average").
        latency.avg_ms += (ms - latency.avg_ms) / latency.samples as f64;
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        let latency = self.latency.lock();
        MeterSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: latency.avg_ms,
        }
    }
}

impl Default for RequestMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightGuard<'_> {
    pub fn finish(mut self, success: bool) {
        self.complete(success);
    }

    fn complete(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.meter.in_flight.fetch_sub(1, Ordering::Relaxed);
        if !success {
            self.meter.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.meter
            .record_latency(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.complete(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_finish_updates_counters() {
        let meter = RequestMeter::new();
        let guard = meter.start();
        let snap = meter.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.in_flight, 1);
        guard.finish(true);
        let snap = meter.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.error_count, 0);
    }

    #[test]
    fn unfinished_guard_counts_as_error_on_drop() {
        let meter = RequestMeter::new();
        {
            let _guard = meter.start();
        }
        let snap = meter.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.error_count, 1);
    }

    #[test]
    fn peak_in_flight_tracks_the_high_watermark() {
        let meter = RequestMeter::new();
        let g1 = meter.start();
        let g2 = meter.start();
        assert_eq!(meter.snapshot().peak_in_flight, 2);
        g1.finish(true);
        g2.finish(true);
        assert_eq!(meter.snapshot().peak_in_flight, 2);
    }

    #[test]
    fn rolling_average_reflects_recorded_latencies() {
        let meter = RequestMeter::new();
        meter.record_latency(10.0);
        meter.record_latency(20.0);
        assert!((meter.snapshot().avg_latency_ms - 15.0).abs() < 1e-9);
    }
}
