//! Error types for pool operations and job execution.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::cancel::CancelReason;
use crate::core::dispatcher::Band;

/// Errors returned by the pool manager.
///
/// Job failures are never reported through this type; they travel inside
/// [`JobResult`](crate::core::JobResult) as a [`JobError`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration validation failed; the pool cannot be built.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a running pool.
    #[error("pool is already running")]
    AlreadyRunning,

    /// The operation requires a running pool.
    #[error("pool is not running")]
    NotRunning,

    /// The submitted job failed validation.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// The target band had no free slot and the caller asked not to wait.
    #[error("queue full: {0} priority band")]
    QueueFull(Band),

    /// The target band stayed full for the whole submission timeout.
    #[error("job submission timed out after {waited:?} ({band} priority band full)")]
    SubmissionTimeout {
        /// Band the job was routed to.
        band: Band,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The caller's cancellation scope fired while waiting.
    #[error("caller cancelled: {0}")]
    CallerCancelled(CancelReason),

    /// The pool began shutting down while the caller was waiting.
    #[error("pool is shutting down")]
    PoolShuttingDown,

    /// Requested worker count is outside the configured bounds.
    #[error("invalid worker count {requested}: must be within [{min}, {max}]")]
    InvalidWorkerCount {
        /// Requested count.
        requested: usize,
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Workers were still running when the shutdown grace period elapsed.
    #[error("shutdown grace period exceeded with {outstanding} worker(s) still running")]
    ShutdownTimeoutExceeded {
        /// Workers that had not exited.
        outstanding: usize,
    },

    /// Internal failure (thread spawn error, control loop gone, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Execution errors captured in a job result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum JobError {
    /// The job body returned an error.
    #[error("job failed: {0}")]
    Failed(String),

    /// The pool scope was cancelled before the body completed.
    #[error("job cancelled")]
    Cancelled,

    /// The job's timeout elapsed before the body completed.
    #[error("job deadline exceeded")]
    DeadlineExceeded,

    /// The job body panicked.
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl From<CancelReason> for JobError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Cancelled => Self::Cancelled,
            CancelReason::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Application-facing result used by job bodies.
pub type AppResult<T> = Result<T, anyhow::Error>;
