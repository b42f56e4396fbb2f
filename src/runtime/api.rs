//! API-facing request/response models.
//!
//! These are the plain-data shapes an HTTP or CLI front end would expose. No
//! transport lives here; callers serialize them however they like.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    Band, Job, JobError, JobExecutor, JobId, JobResult, PoolMetrics, WorkerPool, WorkerSnapshot,
};

/// Job submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission<P> {
    /// Job identifier; generated when absent.
    #[serde(default)]
    pub job_id: Option<JobId>,
    /// Priority ordinal.
    #[serde(default)]
    pub priority: i32,
    /// Execution timeout in milliseconds; pool default when absent or zero.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Opaque payload.
    pub payload: P,
}

impl<P> JobSubmission<P> {
    /// Convert into a job.
    pub fn into_job(self) -> Job<P> {
        let mut job = Job::new(self.job_id.unwrap_or_else(JobId::generate), self.payload)
            .with_priority(self.priority);
        if let Some(ms) = self.timeout_ms {
            job = job.with_timeout(Duration::from_millis(ms));
        }
        job
    }
}

/// Job outcome as reported to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultResponse<R> {
    /// Job identifier.
    pub job_id: JobId,
    /// Output when the job succeeded.
    pub output: Option<R>,
    /// Error when it did not.
    pub error: Option<JobError>,
    /// Worker that ran the job.
    pub worker_id: u64,
    /// Execution time in milliseconds.
    pub duration_ms: u128,
}

impl<R> From<JobResult<R>> for JobResultResponse<R> {
    fn from(result: JobResult<R>) -> Self {
        let (output, error) = match result.outcome {
            Ok(out) => (Some(out), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            job_id: result.job_id,
            output,
            error,
            worker_id: result.worker_id.0,
            duration_ms: result.duration.as_millis(),
        }
    }
}

/// Queue depth of one band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandDepth {
    /// Band.
    pub band: Band,
    /// Jobs waiting.
    pub depth: usize,
}

/// Full pool status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Whether the pool is running.
    pub running: bool,
    /// Metrics snapshot.
    pub metrics: PoolMetrics,
    /// Live worker threads.
    pub workers: Vec<WorkerSnapshot>,
    /// Per-band queue depth, highest first.
    pub bands: Vec<BandDepth>,
}

/// Pool snapshot data for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Pool identifier.
    pub name: String,
    /// Worker bounds.
    pub min_workers: usize,
    /// Worker bounds.
    pub max_workers: usize,
    /// Per-band capacity.
    pub queue_capacity: usize,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: running with at least one worker, or nothing queued.
    pub ok: bool,
    /// Whether the pool is running.
    pub running: bool,
    /// Workers not marked for retirement.
    pub workers: usize,
    /// Jobs waiting across all bands.
    pub queue_depth: usize,
}

/// Submit a job to a pool, returning its identifier.
///
/// # Errors
///
/// Returns the pool error rendered as a string.
pub fn submit_job<P, R, E>(
    pool: &WorkerPool<P, R, E>,
    req: JobSubmission<P>,
) -> Result<JobId, String>
where
    P: Send + 'static,
    R: Send + 'static,
    E: JobExecutor<P, R>,
{
    let job = req.into_job();
    let id = job.id.clone();
    pool.submit(job).map_err(|e| e.to_string())?;
    Ok(id)
}

/// Collect the full status of a pool.
pub fn status<P, R, E>(pool: &WorkerPool<P, R, E>) -> PoolStatus
where
    P: Send + 'static,
    R: Send + 'static,
    E: JobExecutor<P, R>,
{
    PoolStatus {
        running: pool.is_running(),
        metrics: pool.metrics(),
        workers: pool.workers(),
        bands: pool
            .band_depths()
            .into_iter()
            .map(|(band, depth)| BandDepth { band, depth })
            .collect(),
    }
}

/// Return a health payload.
pub fn health<P, R, E>(pool: &WorkerPool<P, R, E>) -> Health
where
    P: Send + 'static,
    R: Send + 'static,
    E: JobExecutor<P, R>,
{
    let running = pool.is_running();
    let workers = pool.worker_count();
    let queue_depth = pool.queue_depth();
    Health {
        ok: running && (workers > 0 || queue_depth == 0),
        running,
        workers,
        queue_depth,
    }
}

/// Build pool listings from config snapshot.
pub fn list_pools(cfg: &crate::config::SchedulerConfig) -> Vec<PoolSnapshot> {
    let mut pools: Vec<_> = cfg
        .pools
        .iter()
        .map(|(name, pool)| PoolSnapshot {
            name: name.clone(),
            min_workers: pool.min_workers,
            max_workers: pool.max_workers,
            queue_capacity: pool.queue_capacity,
        })
        .collect();
    pools.sort_by(|a, b| a.name.cmp(&b.name));
    pools
}
