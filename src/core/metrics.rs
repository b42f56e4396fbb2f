//! Lock-free pool metrics.
//!
//! Counters are plain atomics updated by many workers concurrently. Snapshots
//! are consistent enough for monitoring but not atomic across fields, with one
//! exception: `jobs_processed` is derived from `jobs_succeeded + jobs_failed` at
//! snapshot time, and submissions are counted before the job is enqueued, so
//! `succeeded + failed == processed <= submitted` holds in every snapshot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Point-in-time copy of pool metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    /// Jobs accepted into a band.
    pub jobs_submitted: u64,
    /// Jobs that produced a result.
    pub jobs_processed: u64,
    /// Jobs whose body returned an output.
    pub jobs_succeeded: u64,
    /// Jobs that failed, were cancelled, timed out or panicked.
    pub jobs_failed: u64,
    /// Sum of execution durations.
    pub total_latency: Duration,
    /// `total_latency / jobs_processed`, zero when nothing was processed.
    pub average_latency: Duration,
    /// Workers currently executing a job.
    pub active_workers: usize,
    /// Jobs waiting across all bands.
    pub queue_depth: usize,
    /// Worker threads alive, including retiring ones.
    pub total_workers: usize,
    /// Time since the recorder was created or reset.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Percentage of processed jobs that succeeded (0 when none processed).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        percentage(self.jobs_succeeded, self.jobs_processed)
    }

    /// Percentage of processed jobs that failed (0 when none processed).
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        percentage(self.jobs_failed, self.jobs_processed)
    }

    /// Processed jobs per second of uptime.
    #[must_use]
    pub fn jobs_per_second(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let processed = self.jobs_processed as f64;
        processed / secs
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

/// Thread-safe metrics recorder. All operations are no-ops when disabled.
#[derive(Debug)]
pub struct MetricsRecorder {
    enabled: bool,
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_latency_ns: AtomicU64,
    active_workers: AtomicUsize,
    queue_depth: AtomicUsize,
    total_workers: AtomicUsize,
    started: Mutex<Instant>,
}

impl MetricsRecorder {
    /// Create a recorder.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            submitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
            queue_depth: AtomicUsize::new(0),
            total_workers: AtomicUsize::new(0),
            started: Mutex::new(Instant::now()),
        }
    }

    /// Whether metrics are collected.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count a submission before the job is handed to a band.
    pub fn record_submitted(&self) {
        if self.enabled {
            self.submitted.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Roll back a submission whose enqueue failed.
    pub fn cancel_submitted(&self) {
        if self.enabled {
            let _ = self
                .submitted
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    /// Record one processed job.
    pub fn record_outcome(&self, success: bool, latency: Duration) {
        if !self.enabled {
            return;
        }
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::AcqRel);
        } else {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Set the busy-worker gauge.
    pub fn set_active_workers(&self, count: usize) {
        if self.enabled {
            self.active_workers.store(count, Ordering::Relaxed);
        }
    }

    /// Set the queue-depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        if self.enabled {
            self.queue_depth.store(depth, Ordering::Relaxed);
        }
    }

    /// Set the total-worker gauge.
    pub fn set_total_workers(&self, count: usize) {
        if self.enabled {
            self.total_workers.store(count, Ordering::Relaxed);
        }
    }

    /// Current snapshot; zero-valued when disabled.
    #[must_use]
    pub fn snapshot(&self) -> PoolMetrics {
        if !self.enabled {
            return PoolMetrics::default();
        }
        let succeeded = self.succeeded.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        let submitted = self.submitted.load(Ordering::Acquire);
        let processed = succeeded + failed;
        let total_latency = Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed));

        PoolMetrics {
            jobs_submitted: submitted.max(processed),
            jobs_processed: processed,
            jobs_succeeded: succeeded,
            jobs_failed: failed,
            total_latency,
            average_latency: average(total_latency, processed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            total_workers: self.total_workers.load(Ordering::Relaxed),
            uptime: self.started.lock().elapsed(),
        }
    }

    /// Average execution latency.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        self.snapshot().average_latency
    }

    /// Success percentage of processed jobs.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        self.snapshot().success_rate()
    }

    /// Failure percentage of processed jobs.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        self.snapshot().failure_rate()
    }

    /// Processed jobs per second since creation or the last reset.
    #[must_use]
    pub fn jobs_per_second(&self) -> f64 {
        self.snapshot().jobs_per_second()
    }

    /// Zero every counter and gauge and restart the uptime clock.
    pub fn reset(&self) {
        if !self.enabled {
            return;
        }
        self.succeeded.store(0, Ordering::Release);
        self.failed.store(0, Ordering::Release);
        self.submitted.store(0, Ordering::Release);
        self.total_latency_ns.store(0, Ordering::Relaxed);
        self.active_workers.store(0, Ordering::Relaxed);
        self.queue_depth.store(0, Ordering::Relaxed);
        self.total_workers.store(0, Ordering::Relaxed);
        *self.started.lock() = Instant::now();
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    u32::try_from(count).map_or_else(
        |_| Duration::from_nanos(u64::try_from(total.as_nanos() / u128::from(count)).unwrap_or(0)),
        |n| total / n,
    )
}
