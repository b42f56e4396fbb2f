//! Worker threads.
//!
//! Each worker is a dedicated OS thread with its own single-threaded tokio
//! runtime, so job bodies never block the caller's runtime. A worker runs one
//! job at a time:
//!
//! 1. take the next job from the dispatcher (priority order), or stop when the
//!    pool scope fires or the worker is retired;
//! 2. run the body under a job scope derived from the pool scope with the job's
//!    timeout, racing it against that scope;
//! 3. record metrics and deliver the result, dropping it if the pool scope fired
//!    first.
//!
//! Body errors, cancellations, timeouts and panics all end up in the
//! [`JobResult`]; nothing escapes the loop.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Select, Sender};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::core::cancel::CancelScope;
use crate::core::dispatcher::{Dequeued, PriorityDispatcher};
use crate::core::error::{JobError, PoolError};
use crate::core::executor::JobExecutor;
use crate::core::job::{Job, JobResult};
use crate::core::metrics::MetricsRecorder;
use crate::util::clock::now_ms;

/// Worker identifier. Assigned monotonically and never reused by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Waiting for a job.
    Idle,
    /// Executing a job.
    Busy,
    /// Exited.
    Stopped,
}

impl WorkerStatus {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Busy => 1,
            Self::Stopped => 2,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Busy,
            _ => Self::Stopped,
        }
    }
}

/// Read-only view of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// Worker identifier.
    pub id: WorkerId,
    /// Current status.
    pub status: WorkerStatus,
    /// Jobs this worker has finished.
    pub jobs_processed: u64,
    /// When the worker started (ms since epoch).
    pub started_at_ms: u128,
    /// When the worker last started a job (ms since epoch).
    pub last_job_at_ms: Option<u64>,
    /// Whether the worker has been told to retire.
    pub retiring: bool,
}

/// Per-worker state shared between the worker thread and the manager.
#[derive(Debug)]
pub(crate) struct WorkerState {
    status: AtomicU8,
    jobs_processed: AtomicU64,
    started_at_ms: u128,
    last_job_at_ms: AtomicU64,
    retiring: AtomicBool,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(WorkerStatus::Idle.as_u8()),
            jobs_processed: AtomicU64::new(0),
            started_at_ms: now_ms(),
            last_job_at_ms: AtomicU64::new(0),
            retiring: AtomicBool::new(false),
        }
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: WorkerStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    fn snapshot(&self, id: WorkerId) -> WorkerSnapshot {
        let last = self.last_job_at_ms.load(Ordering::Relaxed);
        WorkerSnapshot {
            id,
            status: self.status(),
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            started_at_ms: self.started_at_ms,
            last_job_at_ms: (last != 0).then_some(last),
            retiring: self.retiring.load(Ordering::Relaxed),
        }
    }
}

/// Push-style result consumer.
pub type ResultHandler<R> = Arc<dyn Fn(JobResult<R>) + Send + Sync>;

/// Where workers deliver results.
pub(crate) enum ResultSink<R> {
    /// Buffered for `get_result`.
    Channel(Sender<JobResult<R>>),
    /// Pushed to a caller-supplied handler.
    Handler(ResultHandler<R>),
}

impl<R> Clone for ResultSink<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Channel(tx) => Self::Channel(tx.clone()),
            Self::Handler(h) => Self::Handler(Arc::clone(h)),
        }
    }
}

/// Everything a worker needs, shared by all workers of one pool run.
pub(crate) struct WorkerContext<P, R, E> {
    pub dispatcher: Arc<PriorityDispatcher<P>>,
    pub pool_scope: CancelScope,
    pub executor: E,
    pub metrics: Arc<MetricsRecorder>,
    pub sink: ResultSink<R>,
    pub default_timeout: Duration,
    /// Workers currently executing a job.
    pub busy: Arc<AtomicUsize>,
    /// Worker threads that have not exited yet.
    pub alive: Arc<AtomicUsize>,
    pub exit_tx: Sender<WorkerId>,
    pub stack_size: usize,
}

impl<P, R, E: Clone> Clone for WorkerContext<P, R, E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            pool_scope: self.pool_scope.clone(),
            executor: self.executor.clone(),
            metrics: Arc::clone(&self.metrics),
            sink: self.sink.clone(),
            default_timeout: self.default_timeout,
            busy: Arc::clone(&self.busy),
            alive: Arc::clone(&self.alive),
            exit_tx: self.exit_tx.clone(),
            stack_size: self.stack_size,
        }
    }
}

/// Manager-side handle to a worker thread.
pub(crate) struct WorkerHandle {
    pub id: WorkerId,
    state: Arc<WorkerState>,
    retire_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to exit after its current job.
    pub(crate) fn retire(&self) {
        if !self.state.retiring.swap(true, Ordering::AcqRel) {
            let _ = self.retire_tx.try_send(());
        }
    }

    pub(crate) fn is_retiring(&self) -> bool {
        self.state.retiring.load(Ordering::Acquire)
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        self.state.status()
    }

    pub(crate) fn snapshot(&self) -> WorkerSnapshot {
        self.state.snapshot(self.id)
    }

    /// Join the thread; only call once the worker reported its exit.
    pub(crate) fn join(self) {
        if self.thread.join().is_err() {
            warn!(worker_id = %self.id, "Worker thread panicked");
        }
    }
}

/// Spawn a worker thread.
pub(crate) fn spawn_worker<P, R, E>(
    id: WorkerId,
    ctx: WorkerContext<P, R, E>,
) -> Result<WorkerHandle, PoolError>
where
    P: Send + 'static,
    R: Send + 'static,
    E: JobExecutor<P, R>,
{
    let state = Arc::new(WorkerState::new());
    let (retire_tx, retire_rx) = bounded(1);
    let stack_size = ctx.stack_size;
    let alive = Arc::clone(&ctx.alive);
    alive.fetch_add(1, Ordering::AcqRel);

    let worker = Worker {
        id,
        state: Arc::clone(&state),
        retire_rx,
        ctx,
    };
    let thread = thread::Builder::new()
        .name(format!("job-worker-{id}"))
        .stack_size(stack_size)
        .spawn(move || worker.run())
        .map_err(|e| {
            alive.fetch_sub(1, Ordering::AcqRel);
            PoolError::Internal(format!("failed to spawn worker {id}: {e}"))
        })?;

    Ok(WorkerHandle {
        id,
        state,
        retire_tx,
        thread,
    })
}

/// Reports a worker's exit, including exits by panic.
struct ExitNotice {
    id: WorkerId,
    alive: Arc<AtomicUsize>,
    exit_tx: Sender<WorkerId>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        self.alive.fetch_sub(1, Ordering::AcqRel);
        let _ = self.exit_tx.send(self.id);
    }
}

/// Holds a worker in the busy count for one job; released even on unwind.
struct BusyGuard<'a> {
    state: &'a WorkerState,
    busy: &'a AtomicUsize,
}

impl<'a> BusyGuard<'a> {
    fn enter(state: &'a WorkerState, busy: &'a AtomicUsize) -> Self {
        state.set_status(WorkerStatus::Busy);
        busy.fetch_add(1, Ordering::AcqRel);
        state.last_job_at_ms.store(
            u64::try_from(now_ms()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        Self { state, busy }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state.set_status(WorkerStatus::Idle);
        self.busy.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Worker<P, R, E> {
    id: WorkerId,
    state: Arc<WorkerState>,
    retire_rx: Receiver<()>,
    ctx: WorkerContext<P, R, E>,
}

impl<P, R, E> Worker<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: JobExecutor<P, R>,
{
    fn run(self) {
        let _exit = ExitNotice {
            id: self.id,
            alive: Arc::clone(&self.ctx.alive),
            exit_tx: self.ctx.exit_tx.clone(),
        };
        debug!(worker_id = %self.id, "Worker thread started");

        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(worker_id = %self.id, error = %e, "Failed to create worker runtime");
                self.state.set_status(WorkerStatus::Stopped);
                return;
            }
        };

        loop {
            self.state.set_status(WorkerStatus::Idle);
            let job = match self
                .ctx
                .dispatcher
                .next_job(&self.ctx.pool_scope, &self.retire_rx)
            {
                Dequeued::Job(job) => job,
                Dequeued::Retired => {
                    debug!(worker_id = %self.id, "Worker retired");
                    break;
                }
                Dequeued::Shutdown => {
                    debug!(worker_id = %self.id, "Pool scope fired, worker exiting");
                    break;
                }
            };

            let _busy = BusyGuard::enter(&self.state, &self.ctx.busy);
            let result = self.execute(&rt, job);
            self.ctx
                .metrics
                .record_outcome(result.is_success(), result.duration);
            self.deliver(result);
            self.state.jobs_processed.fetch_add(1, Ordering::Relaxed);
        }

        self.state.set_status(WorkerStatus::Stopped);
    }

    fn execute(&self, rt: &tokio::runtime::Runtime, job: Job<P>) -> JobResult<R> {
        let job_id = job.id.clone();
        let timeout = job.effective_timeout(self.ctx.default_timeout);
        let scope = self.ctx.pool_scope.child_with_timeout(timeout);
        let started_at_ms = now_ms();
        let start = Instant::now();

        debug!(
            worker_id = %self.id,
            job_id = %job_id,
            priority = job.priority,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Worker executing job"
        );

        let outcome = if let Some(reason) = scope.reason() {
            // Dequeued just as the pool began shutting down: never run it.
            Err(JobError::from(reason))
        } else {
            let body = self.ctx.executor.execute(scope.clone(), job);
            rt.block_on(async {
                tokio::select! {
                    biased;
                    reason = scope.cancelled() => Err(JobError::from(reason)),
                    out = AssertUnwindSafe(body).catch_unwind() => match out {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(JobError::Failed(format!("{e:#}"))),
                        Err(panic) => Err(JobError::Panicked(panic_message(&*panic))),
                    },
                }
            })
        };
        // Release sub-work the body derived from its scope.
        scope.cancel();

        let duration = start.elapsed();
        match &outcome {
            Ok(_) => debug!(worker_id = %self.id, job_id = %job_id, ?duration, "Job succeeded"),
            Err(e) => debug!(worker_id = %self.id, job_id = %job_id, ?duration, error = %e, "Job failed"),
        }

        JobResult {
            job_id,
            outcome,
            worker_id: self.id,
            started_at_ms,
            finished_at_ms: now_ms(),
            duration,
        }
    }

    fn deliver(&self, result: JobResult<R>) {
        let pool = &self.ctx.pool_scope;
        if pool.is_cancelled() {
            debug!(worker_id = %self.id, job_id = %result.job_id, "Dropping result, pool shutting down");
            return;
        }
        match &self.ctx.sink {
            ResultSink::Handler(handler) => {
                let job_id = result.job_id.clone();
                let handled = std::panic::catch_unwind(AssertUnwindSafe(|| handler(result)));
                if let Err(panic) = handled {
                    error!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        panic = %panic_message(&*panic),
                        "Result handler panicked"
                    );
                }
            }
            ResultSink::Channel(tx) => {
                let mut sel = Select::new();
                let send_idx = sel.send(tx);
                sel.recv(pool.signal());
                let oper = sel.select();
                if oper.index() == send_idx {
                    if let Err(e) = oper.send(tx, result) {
                        debug!(worker_id = %self.id, job_id = %e.into_inner().job_id, "Result channel closed");
                    }
                } else {
                    let _ = oper.recv(pool.signal());
                    debug!(worker_id = %self.id, job_id = %result.job_id, "Dropping result, pool shutting down");
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
