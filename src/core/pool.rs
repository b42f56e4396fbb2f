//! Pool manager.
//!
//! `WorkerPool` owns the lifecycle of a set of worker threads fed by a
//! [`PriorityDispatcher`]. While running, three kinds of threads cooperate:
//!
//! - **workers** execute jobs one at a time (see [`crate::core::worker`]);
//! - the **controller** exclusively owns the worker set. Resize requests from
//!   [`WorkerPool::set_worker_count`], worker exit notices and the autoscale
//!   timer are all serialized through it, so the set is never mutated
//!   concurrently;
//! - the **sampler** (when metrics are enabled) periodically publishes queue
//!   depth and worker gauges.
//!
//! Everything a run needs hangs off a single pool-wide [`CancelScope`]. Firing
//! it unblocks every waiting submitter, result reader, idle worker and the
//! background threads, and is inherited by every running job's scope.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_job_engine::config::PoolConfig;
//! use prometheus_job_engine::core::{executor_fn, CancelScope, Job, WorkerPool};
//!
//! let pool = WorkerPool::new(
//!     PoolConfig::default().with_workers(1, 4, 2),
//!     executor_fn(|_scope: CancelScope, job: Job<u64>| async move {
//!         Ok::<_, anyhow::Error>(job.payload * 2)
//!     }),
//! )?;
//! pool.start()?;
//! pool.submit(Job::new("double-21", 21).with_priority(9))?;
//! let result = pool.get_result()?;
//! assert_eq!(result.output(), Some(&42));
//! pool.stop()?;
//! ```

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    bounded, never, select, tick, unbounded, Receiver, RecvTimeoutError, Select, Sender,
    TryRecvError,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::core::cancel::{CancelReason, CancelScope};
use crate::core::dispatcher::{Band, EnqueueError, PriorityDispatcher};
use crate::core::error::PoolError;
use crate::core::executor::JobExecutor;
use crate::core::job::{Job, JobId, JobResult};
use crate::core::metrics::{MetricsRecorder, PoolMetrics};
use crate::core::scaler::{ScaleDecision, ScalingPolicy};
use crate::core::worker::{
    spawn_worker, ResultHandler, ResultSink, WorkerContext, WorkerHandle, WorkerId,
    WorkerSnapshot, WorkerStatus,
};
use crate::util::clock::now_ms;

type WorkerSet = BTreeMap<WorkerId, WorkerHandle>;

/// Requests served by the controller thread.
enum Command {
    Resize {
        target: usize,
        reply: Sender<Result<(), PoolError>>,
    },
    Inspect {
        reply: Sender<Vec<WorkerSnapshot>>,
    },
}

/// Live gauges shared by workers, the controller and the sampler.
struct Gauges<P> {
    dispatcher: Arc<PriorityDispatcher<P>>,
    /// Workers executing a job.
    busy: Arc<AtomicUsize>,
    /// Worker threads not yet exited.
    alive: Arc<AtomicUsize>,
    /// Workers not marked for retirement.
    live: Arc<AtomicUsize>,
}

impl<P> Clone for Gauges<P> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            busy: Arc::clone(&self.busy),
            alive: Arc::clone(&self.alive),
            live: Arc::clone(&self.live),
        }
    }
}

impl<P> Gauges<P> {
    fn publish(&self, metrics: &MetricsRecorder) {
        metrics.set_queue_depth(self.dispatcher.depth());
        metrics.set_active_workers(self.busy.load(Ordering::Acquire));
        metrics.set_total_workers(self.alive.load(Ordering::Acquire));
    }
}

struct Threads {
    controller: JoinHandle<WorkerSet>,
    sampler: Option<JoinHandle<()>>,
}

/// State of one `start()`..`stop()` run.
struct Running<P, R> {
    scope: CancelScope,
    gauges: Gauges<P>,
    results_rx: Receiver<JobResult<R>>,
    control_tx: Sender<Command>,
    exit_rx: Receiver<WorkerId>,
    threads: Mutex<Option<Threads>>,
}

/// A priority job pool backed by dedicated worker threads.
///
/// All methods take `&self`; share the pool across threads with an `Arc`.
pub struct WorkerPool<P, R, E> {
    config: PoolConfig,
    executor: E,
    metrics: Arc<MetricsRecorder>,
    result_handler: Option<ResultHandler<R>>,
    policy: ScalingPolicy,
    next_worker_id: Arc<AtomicU64>,
    state: RwLock<Option<Arc<Running<P, R>>>>,
    _payload: PhantomData<fn(P)>,
}

impl<P, R, E> WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: JobExecutor<P, R>,
{
    /// Create a stopped pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: PoolConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let metrics = Arc::new(MetricsRecorder::new(config.metrics_enabled));
        Ok(Self {
            config,
            executor,
            metrics,
            result_handler: None,
            policy: ScalingPolicy::default(),
            next_worker_id: Arc::new(AtomicU64::new(1)),
            state: RwLock::new(None),
            _payload: PhantomData,
        })
    }

    /// Push results to `handler` instead of buffering them for
    /// [`get_result`](Self::get_result). The handler runs on worker threads.
    #[must_use]
    pub fn with_result_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(JobResult<R>) + Send + Sync + 'static,
    {
        self.result_handler = Some(Arc::new(handler));
        self
    }

    /// Replace the autoscale rule.
    #[must_use]
    pub const fn with_scaling_policy(mut self, policy: ScalingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Configuration the pool was built with.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether the pool is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.read().is_some()
    }

    fn running(&self) -> Option<Arc<Running<P, R>>> {
        self.state.read().clone()
    }

    /// Start the pool: spawn `initial_workers`, the controller and, when
    /// metrics are enabled, the sampler.
    ///
    /// A stopped pool may be started again; each run gets fresh queues.
    ///
    /// # Errors
    ///
    /// - [`PoolError::AlreadyRunning`] if the pool is running
    /// - [`PoolError::Internal`] if a thread could not be spawned; anything
    ///   already spawned is torn down and the pool stays stopped
    pub fn start(&self) -> Result<(), PoolError> {
        let mut state = self.state.write();
        if state.is_some() {
            return Err(PoolError::AlreadyRunning);
        }

        let scope = CancelScope::new();
        let gauges = Gauges {
            dispatcher: Arc::new(PriorityDispatcher::new(
                self.config.thresholds(),
                self.config.queue_capacity,
            )),
            busy: Arc::new(AtomicUsize::new(0)),
            alive: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
        };
        let (results_tx, results_rx) = bounded(self.config.queue_capacity);
        let (exit_tx, exit_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let sink = self
            .result_handler
            .as_ref()
            .map_or(ResultSink::Channel(results_tx), |h| {
                ResultSink::Handler(Arc::clone(h))
            });

        let mut controller = Controller {
            ctx: WorkerContext {
                dispatcher: Arc::clone(&gauges.dispatcher),
                pool_scope: scope.clone(),
                executor: self.executor.clone(),
                metrics: Arc::clone(&self.metrics),
                sink,
                default_timeout: self.config.default_job_timeout(),
                busy: Arc::clone(&gauges.busy),
                alive: Arc::clone(&gauges.alive),
                exit_tx,
                stack_size: self.config.thread_stack_size,
            },
            workers: WorkerSet::new(),
            next_id: Arc::clone(&self.next_worker_id),
            live: Arc::clone(&gauges.live),
            min: self.config.min_workers,
            max: self.config.max_workers,
            policy: self.policy,
        };

        if let Err(e) = controller.resize(self.config.initial_workers) {
            error!(error = %e, "Failed to spawn initial workers");
            scope.cancel();
            for (_, handle) in std::mem::take(&mut controller.workers) {
                handle.join();
            }
            return Err(e);
        }

        let autoscale = self.config.autoscale_interval();
        let controller_rx = exit_rx.clone();
        let controller = thread::Builder::new()
            .name("job-pool-control".into())
            .spawn(move || controller.run(&control_rx, &controller_rx, autoscale))
            .map_err(|e| {
                // The closure is dropped with the worker handles; workers see
                // the fired scope and exit on their own.
                scope.cancel();
                PoolError::Internal(format!("failed to spawn controller thread: {e}"))
            })?;

        let running = Arc::new(Running {
            scope: scope.clone(),
            gauges: gauges.clone(),
            results_rx,
            control_tx,
            exit_rx,
            threads: Mutex::new(Some(Threads {
                controller,
                sampler: None,
            })),
        });

        if self.metrics.is_enabled() {
            let metrics = Arc::clone(&self.metrics);
            let interval = self.config.metrics_interval();
            let sampler_scope = scope.clone();
            let spawned = thread::Builder::new()
                .name("job-pool-metrics".into())
                .spawn(move || run_sampler(&metrics, &gauges, interval, &sampler_scope));
            match spawned {
                Ok(handle) => {
                    if let Some(threads) = running.threads.lock().as_mut() {
                        threads.sampler = Some(handle);
                    }
                }
                Err(e) => {
                    if let Err(shutdown) = self.shutdown(&running) {
                        warn!(error = %shutdown, "Shutdown after failed start left workers behind");
                    }
                    return Err(PoolError::Internal(format!(
                        "failed to spawn metrics sampler: {e}"
                    )));
                }
            }
        }

        *state = Some(running);
        info!(
            initial_workers = self.config.initial_workers,
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            queue_capacity = self.config.queue_capacity,
            "Worker pool started"
        );
        Ok(())
    }

    /// Stop the pool.
    ///
    /// Fires the pool scope, so in-flight jobs observe `Cancelled`, then waits
    /// up to the shutdown grace period for workers to exit. Queued jobs that
    /// never started are discarded. Workers still running after the grace
    /// period are detached.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NotRunning`] if the pool is not running
    /// - [`PoolError::ShutdownTimeoutExceeded`] if workers were still running
    ///   when the grace period elapsed; the pool is stopped regardless
    pub fn stop(&self) -> Result<(), PoolError> {
        let running = self.state.write().take().ok_or(PoolError::NotRunning)?;
        info!("Shutting down worker pool");
        self.shutdown(&running)
    }

    fn shutdown(&self, running: &Running<P, R>) -> Result<(), PoolError> {
        running.scope.cancel();
        let deadline = Instant::now() + self.config.shutdown_grace_period();

        let threads = running.threads.lock().take();
        let mut workers = WorkerSet::new();
        let mut sampler = None;
        if let Some(threads) = threads {
            sampler = threads.sampler;
            match threads.controller.join() {
                Ok(set) => workers = set,
                Err(_) => error!("Pool controller panicked; remaining workers will be detached"),
            }
        }

        let alive = &running.gauges.alive;
        while alive.load(Ordering::Acquire) > 0 {
            match running.exit_rx.recv_deadline(deadline) {
                Ok(id) => {
                    if let Some(handle) = workers.remove(&id) {
                        handle.join();
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        for id in running.exit_rx.try_iter() {
            if let Some(handle) = workers.remove(&id) {
                handle.join();
            }
        }
        let outstanding = alive.load(Ordering::Acquire);
        for (id, handle) in workers {
            if handle.status() != WorkerStatus::Stopped {
                warn!(worker_id = %id, "Worker did not exit within grace period - detaching");
            }
        }

        running.gauges.dispatcher.close();
        let discarded = running.gauges.dispatcher.drain();
        if discarded > 0 {
            warn!(discarded, "Discarded queued jobs on shutdown");
        }

        if let Some(sampler) = sampler {
            if sampler.join().is_err() {
                warn!("Metrics sampler panicked");
            }
        }
        running.gauges.live.store(0, Ordering::Release);
        self.metrics.set_queue_depth(0);
        self.metrics.set_active_workers(running.gauges.busy.load(Ordering::Acquire));
        self.metrics.set_total_workers(outstanding);

        if outstanding > 0 {
            warn!(outstanding, "Worker pool shut down with workers still running");
            return Err(PoolError::ShutdownTimeoutExceeded { outstanding });
        }
        info!("Worker pool shut down complete");
        Ok(())
    }

    /// Submit a job, waiting up to the submission timeout for band space.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidJob`] if the job fails validation
    /// - [`PoolError::NotRunning`] if the pool is stopped
    /// - [`PoolError::SubmissionTimeout`] if the band stayed full
    /// - [`PoolError::QueueFull`] if the band is full and the submission
    ///   timeout is zero
    /// - [`PoolError::PoolShuttingDown`] if the pool stopped while waiting
    pub fn submit(&self, job: Job<P>) -> Result<(), PoolError> {
        self.submit_inner(job, None, true)
    }

    /// Like [`submit`](Self::submit), also giving up when `caller` fires.
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit), plus [`PoolError::CallerCancelled`].
    pub fn submit_with_scope(&self, job: Job<P>, caller: &CancelScope) -> Result<(), PoolError> {
        self.submit_inner(job, Some(caller), true)
    }

    /// Submit without waiting.
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit), but a full band yields
    /// [`PoolError::QueueFull`] immediately.
    pub fn try_submit(&self, job: Job<P>) -> Result<(), PoolError> {
        self.submit_inner(job, None, false)
    }

    fn submit_inner(
        &self,
        mut job: Job<P>,
        caller: Option<&CancelScope>,
        wait: bool,
    ) -> Result<(), PoolError> {
        job.validate().map_err(PoolError::InvalidJob)?;
        if job.created_at_ms.is_none() {
            job.created_at_ms = Some(now_ms());
        }

        let running = self.running().ok_or(PoolError::NotRunning)?;
        if running.scope.is_cancelled() {
            return Err(PoolError::PoolShuttingDown);
        }
        if let Some(reason) = caller.and_then(CancelScope::reason) {
            return Err(PoolError::CallerCancelled(reason));
        }

        let job_id = job.id.clone();
        let dispatcher = &running.gauges.dispatcher;
        let band = dispatcher.route(job.priority);
        let timeout = self.config.submission_timeout();
        let blocking = wait && !timeout.is_zero();

        // Counted before the job becomes visible to workers so that
        // processed never overtakes submitted.
        self.metrics.record_submitted();
        let started = Instant::now();
        let enqueued = if blocking {
            dispatcher.enqueue(job, started + timeout, caller, &running.scope)
        } else {
            dispatcher.try_enqueue(job)
        };

        let waited = blocking.then(|| started.elapsed());
        self.settle_submission(&job_id, band, enqueued, waited, &running.scope)
    }

    /// Map an enqueue outcome to the caller's result. `waited` is set for
    /// blocking submissions.
    fn settle_submission(
        &self,
        job_id: &JobId,
        band: Band,
        enqueued: Result<Band, EnqueueError>,
        waited: Option<Duration>,
        pool: &CancelScope,
    ) -> Result<(), PoolError> {
        match enqueued {
            // Landed in a band the shutdown path may already have drained.
            // It stays counted, like any job discarded at stop.
            Ok(band) if pool.is_cancelled() => {
                debug!(job_id = %job_id, band = %band, "Job enqueued during shutdown, discarded");
                Err(PoolError::PoolShuttingDown)
            }
            Ok(band) => {
                debug!(job_id = %job_id, band = %band, "Job submitted");
                Ok(())
            }
            Err(e) => {
                self.metrics.cancel_submitted();
                let err = match (e, waited) {
                    (EnqueueError::Full, Some(waited)) => {
                        PoolError::SubmissionTimeout { band, waited }
                    }
                    (EnqueueError::Full, None) => PoolError::QueueFull(band),
                    (EnqueueError::Caller(reason), _) => PoolError::CallerCancelled(reason),
                    (EnqueueError::Shutdown, _) => PoolError::PoolShuttingDown,
                };
                debug!(job_id = %job_id, error = %err, "Job submission rejected");
                Err(err)
            }
        }
    }

    /// Block until the next result is available.
    ///
    /// Results arrive in completion order, not submission order.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NotRunning`] if the pool is stopped
    /// - [`PoolError::PoolShuttingDown`] if the pool stops while waiting
    /// - [`PoolError::Internal`] if results go to a result handler
    pub fn get_result(&self) -> Result<JobResult<R>, PoolError> {
        self.get_result_with_scope(&CancelScope::new())
    }

    /// Wait for the next result for at most `timeout`.
    ///
    /// # Errors
    ///
    /// As [`get_result`](Self::get_result), plus
    /// `CallerCancelled(DeadlineExceeded)` when `timeout` elapses.
    pub fn get_result_timeout(&self, timeout: Duration) -> Result<JobResult<R>, PoolError> {
        self.get_result_with_scope(&CancelScope::with_timeout(timeout))
    }

    /// Wait for the next result until `caller` fires.
    ///
    /// # Errors
    ///
    /// As [`get_result`](Self::get_result), plus
    /// [`PoolError::CallerCancelled`] when `caller` fires first.
    pub fn get_result_with_scope(&self, caller: &CancelScope) -> Result<JobResult<R>, PoolError> {
        if self.result_handler.is_some() {
            return Err(PoolError::Internal(
                "results are delivered to the result handler".into(),
            ));
        }
        let running = self.running().ok_or(PoolError::NotRunning)?;
        let results = &running.results_rx;

        match results.try_recv() {
            Ok(result) => return Ok(result),
            Err(TryRecvError::Disconnected) => return Err(PoolError::PoolShuttingDown),
            Err(TryRecvError::Empty) => {}
        }
        if running.scope.is_cancelled() {
            return Err(PoolError::PoolShuttingDown);
        }
        if let Some(reason) = caller.reason() {
            return Err(PoolError::CallerCancelled(reason));
        }

        let mut sel = Select::new();
        let results_idx = sel.recv(results);
        let pool_idx = sel.recv(running.scope.signal());
        sel.recv(caller.signal());
        let selected = match caller.deadline() {
            Some(deadline) => sel.select_deadline(deadline),
            None => Ok(sel.select()),
        };
        let Ok(oper) = selected else {
            return Err(PoolError::CallerCancelled(
                caller.reason().unwrap_or(CancelReason::DeadlineExceeded),
            ));
        };

        match oper.index() {
            i if i == results_idx => oper.recv(results).map_err(|_| PoolError::PoolShuttingDown),
            i if i == pool_idx => {
                let _ = oper.recv(running.scope.signal());
                Err(PoolError::PoolShuttingDown)
            }
            _ => {
                let _ = oper.recv(caller.signal());
                Err(PoolError::CallerCancelled(
                    caller.reason().unwrap_or(CancelReason::Cancelled),
                ))
            }
        }
    }

    /// Resize the worker set to `count`.
    ///
    /// Scale-up spawns the new workers before returning. Scale-down marks
    /// workers for retirement (idle ones first, then the newest); a retiring
    /// worker finishes its current job before exiting.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidWorkerCount`] if `count` is outside `[min, max]`
    /// - [`PoolError::NotRunning`] if the pool is stopped
    /// - [`PoolError::PoolShuttingDown`] if the pool stopped mid-request
    /// - [`PoolError::Internal`] if a worker thread could not be spawned
    pub fn set_worker_count(&self, count: usize) -> Result<(), PoolError> {
        let (min, max) = (self.config.min_workers, self.config.max_workers);
        if count < min || count > max {
            return Err(PoolError::InvalidWorkerCount {
                requested: count,
                min,
                max,
            });
        }
        let running = self.running().ok_or(PoolError::NotRunning)?;
        let (reply, reply_rx) = bounded(1);
        running
            .control_tx
            .send(Command::Resize {
                target: count,
                reply,
            })
            .map_err(|_| PoolError::PoolShuttingDown)?;
        reply_rx.recv().map_err(|_| PoolError::PoolShuttingDown)?
    }

    /// Workers not marked for retirement.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.running()
            .map_or(0, |r| r.gauges.live.load(Ordering::Acquire))
    }

    /// Snapshots of every worker thread still alive, including retiring ones.
    /// Empty when stopped.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        let Some(running) = self.running() else {
            return Vec::new();
        };
        let (reply, reply_rx) = bounded(1);
        if running.control_tx.send(Command::Inspect { reply }).is_err() {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }

    /// Jobs waiting across all bands.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.running().map_or(0, |r| r.gauges.dispatcher.depth())
    }

    /// Jobs waiting per band, highest first.
    #[must_use]
    pub fn band_depths(&self) -> [(Band, usize); 3] {
        self.running().map_or_else(
            || Band::ALL.map(|band| (band, 0)),
            |r| r.gauges.dispatcher.band_depths(),
        )
    }

    /// Current metrics with freshly sampled gauges.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        if let Some(running) = self.running() {
            running.gauges.publish(&self.metrics);
        }
        self.metrics.snapshot()
    }

    /// Zero all metrics counters.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

impl<P, R, E> Drop for WorkerPool<P, R, E> {
    fn drop(&mut self) {
        // Signal only; joining here could hang on a stuck job body.
        if let Some(running) = self.state.get_mut().take() {
            running.scope.cancel();
            debug!("WorkerPool dropped without explicit stop - workers will be detached");
        }
    }
}

/// Owner of the worker set for one run.
struct Controller<P, R, E> {
    ctx: WorkerContext<P, R, E>,
    workers: WorkerSet,
    next_id: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
    min: usize,
    max: usize,
    policy: ScalingPolicy,
}

impl<P, R, E> Controller<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: JobExecutor<P, R>,
{
    fn run(
        mut self,
        control_rx: &Receiver<Command>,
        exit_rx: &Receiver<WorkerId>,
        autoscale: Option<Duration>,
    ) -> WorkerSet {
        let scope = self.ctx.pool_scope.clone();
        let ticker = autoscale.map_or_else(never, tick);
        debug!(?autoscale, "Pool controller started");

        loop {
            select! {
                recv(control_rx) -> cmd => match cmd {
                    Ok(cmd) => self.handle(cmd),
                    Err(_) => break,
                },
                recv(exit_rx) -> id => {
                    if let Ok(id) = id {
                        self.reap(id);
                    }
                }
                recv(ticker) -> _ => self.autoscale(),
                recv(scope.signal()) -> _ => break,
            }
        }

        debug!(workers = self.workers.len(), "Pool controller exiting");
        self.workers
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Resize { target, reply } => {
                let result = self.resize(target);
                let _ = reply.send(result);
            }
            Command::Inspect { reply } => {
                let _ = reply.send(self.workers.values().map(WorkerHandle::snapshot).collect());
            }
        }
    }

    fn live_count(&self) -> usize {
        self.workers.values().filter(|w| !w.is_retiring()).count()
    }

    fn publish(&self) {
        self.live.store(self.live_count(), Ordering::Release);
    }

    fn spawn_one(&mut self) -> Result<WorkerId, PoolError> {
        let id = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = spawn_worker(id, self.ctx.clone())?;
        self.workers.insert(id, handle);
        debug!(worker_id = %id, "Worker spawned");
        Ok(id)
    }

    /// Retire `count` workers, idle ones first, then the newest.
    fn retire(&self, count: usize) {
        let mut candidates: Vec<&WorkerHandle> =
            self.workers.values().filter(|w| !w.is_retiring()).collect();
        candidates.sort_by_key(|w| (w.status() != WorkerStatus::Idle, Reverse(w.id)));
        for worker in candidates.into_iter().take(count) {
            debug!(worker_id = %worker.id, "Retiring worker");
            worker.retire();
        }
    }

    fn resize(&mut self, target: usize) -> Result<(), PoolError> {
        let live = self.live_count();
        let result = if target > live {
            (live..target).try_for_each(|_| self.spawn_one().map(|_| ()))
        } else {
            self.retire(live - target);
            Ok(())
        };
        self.publish();
        info!(from = live, to = self.live_count(), "Worker count adjusted");
        result
    }

    fn reap(&mut self, id: WorkerId) {
        let Some(handle) = self.workers.remove(&id) else {
            return;
        };
        let retired = handle.is_retiring();
        handle.join();
        if retired {
            debug!(worker_id = %id, "Retired worker joined");
        } else if !self.ctx.pool_scope.is_cancelled() {
            warn!(worker_id = %id, "Worker exited unexpectedly");
            if self.live_count() < self.min {
                if let Err(e) = self.spawn_one() {
                    error!(error = %e, "Failed to replace worker");
                }
            }
        }
        self.publish();
    }

    fn autoscale(&mut self) {
        let depth = self.ctx.dispatcher.depth();
        let live = self.live_count();
        match self.policy.decide(depth, live, self.min, self.max) {
            ScaleDecision::Up => match self.spawn_one() {
                Ok(id) => info!(worker_id = %id, queue_depth = depth, workers = live + 1, "Autoscale: worker added"),
                Err(e) => error!(error = %e, "Autoscale: failed to add worker"),
            },
            ScaleDecision::Down => {
                self.retire(1);
                info!(queue_depth = depth, workers = live - 1, "Autoscale: worker retired");
            }
            ScaleDecision::Hold => {}
        }
        self.publish();
    }
}

fn run_sampler<P>(
    metrics: &MetricsRecorder,
    gauges: &Gauges<P>,
    interval: Duration,
    scope: &CancelScope,
) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                gauges.publish(metrics);
                let m = metrics.snapshot();
                debug!(
                    queue_depth = m.queue_depth,
                    active_workers = m.active_workers,
                    total_workers = m.total_workers,
                    jobs_processed = m.jobs_processed,
                    "Pool metrics sampled"
                );
            }
            recv(scope.signal()) -> _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::executor_fn;
    use crate::core::AppResult;

    fn config() -> PoolConfig {
        PoolConfig::default()
            .with_workers(0, 4, 1)
            .with_queue_capacity(8)
            .with_autoscale_interval_ms(0)
            .with_shutdown_grace_period_ms(2_000)
    }

    type TestPool = WorkerPool<u64, u64, crate::core::executor::FnExecutor<fn(CancelScope, Job<u64>) -> futures::future::Ready<AppResult<u64>>, u64, u64>>;

    fn doubling(_scope: CancelScope, job: Job<u64>) -> futures::future::Ready<AppResult<u64>> {
        futures::future::ready(Ok(job.payload * 2))
    }

    fn pool(config: PoolConfig) -> Result<TestPool, PoolError> {
        WorkerPool::new(config, executor_fn(doubling as fn(_, _) -> _))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = pool(config().with_workers(3, 2, 2)).err();
        assert!(matches!(err, Some(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_lifecycle_errors() {
        let pool = pool(config()).unwrap();
        assert!(matches!(pool.stop(), Err(PoolError::NotRunning)));
        assert!(matches!(pool.submit(Job::new("a", 1)), Err(PoolError::NotRunning)));
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(PoolError::AlreadyRunning)));
        pool.stop().unwrap();
        assert!(matches!(pool.stop(), Err(PoolError::NotRunning)));
    }

    #[test]
    fn test_restart_keeps_worker_ids_unique() {
        let pool = pool(config()).unwrap();
        pool.start().unwrap();
        let first = pool.workers();
        pool.stop().unwrap();
        pool.start().unwrap();
        let second = pool.workers();
        pool.stop().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(second[0].id > first[0].id);
    }

    #[test]
    fn test_retire_prefers_idle_then_newest() {
        let pool = pool(config()).unwrap();
        pool.start().unwrap();
        pool.set_worker_count(3).unwrap();
        pool.set_worker_count(2).unwrap();
        assert_eq!(pool.worker_count(), 2);
        let newest_retired = pool
            .workers()
            .into_iter()
            .filter(|w| w.retiring)
            .all(|w| w.id == WorkerId(3));
        assert!(newest_retired);
        pool.stop().unwrap();
    }

    #[test]
    fn test_send_racing_shutdown_is_reported() {
        let pool = pool(config()).unwrap();
        let scope = CancelScope::new();
        let id = JobId::new("late");

        assert!(pool
            .settle_submission(&id, Band::Low, Ok(Band::Low), None, &scope)
            .is_ok());
        scope.cancel();
        let err = pool
            .settle_submission(&id, Band::Low, Ok(Band::Low), None, &scope)
            .unwrap_err();
        assert!(matches!(err, PoolError::PoolShuttingDown));

        let err = pool
            .settle_submission(
                &id,
                Band::High,
                Err(EnqueueError::Full),
                Some(Duration::from_millis(3)),
                &CancelScope::new(),
            )
            .unwrap_err();
        assert!(matches!(err, PoolError::SubmissionTimeout { band: Band::High, .. }));
    }

    #[test]
    fn test_drop_fires_scope() {
        let pool = pool(config()).unwrap();
        pool.start().unwrap();
        let scope = pool.running().map(|r| r.scope.clone()).unwrap();
        drop(pool);
        assert_eq!(scope.reason(), Some(CancelReason::Cancelled));
    }
}
