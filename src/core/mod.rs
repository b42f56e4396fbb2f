//! Core scheduling abstractions: jobs, cancellation, dispatch, workers and the
//! pool manager.

pub mod cancel;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod scaler;
pub mod worker;

pub use cancel::{CancelReason, CancelScope};
pub use dispatcher::{Band, BandThresholds, PriorityDispatcher};
pub use error::{AppResult, JobError, PoolError};
pub use executor::{executor_fn, FnExecutor, JobExecutor};
pub use job::{Job, JobId, JobResult};
pub use metrics::{MetricsRecorder, PoolMetrics};
pub use pool::WorkerPool;
pub use scaler::{ScaleDecision, ScalingPolicy};
pub use worker::{ResultHandler, WorkerId, WorkerSnapshot, WorkerStatus};
