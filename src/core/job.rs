//! Job and job-result data model.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::JobError;
use crate::core::worker::WorkerId;

/// Unique job identifier supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap a caller-provided identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random (UUID v4) identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A unit of work submitted to the pool.
///
/// Jobs are immutable once submitted; the pool only stamps `created_at_ms`
/// when the caller left it unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "P: serde::Serialize"))]
#[serde(bound(deserialize = "P: serde::de::DeserializeOwned"))]
pub struct Job<P> {
    /// Unique identifier.
    pub id: JobId,
    /// Opaque payload handed to the job body.
    pub payload: P,
    /// Priority ordinal; higher is more urgent.
    pub priority: i32,
    /// Execution timeout. `None` or zero uses the pool default.
    pub timeout: Option<Duration>,
    /// Creation timestamp in milliseconds since epoch.
    pub created_at_ms: Option<u128>,
}

impl<P> Job<P> {
    /// Create a job with default priority and timeout.
    pub fn new(id: impl Into<JobId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
            priority: 0,
            timeout: None,
            created_at_ms: None,
        }
    }

    /// Set the priority ordinal.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set a per-job execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate caller-supplied fields.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("job id is required".into());
        }
        Ok(())
    }

    /// Timeout to apply, falling back to `default` when unset or zero.
    #[must_use]
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        match self.timeout {
            Some(t) if !t.is_zero() => t,
            _ => default,
        }
    }
}

/// Outcome of executing one job. Produced exactly once per accepted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "R: serde::Serialize"))]
#[serde(bound(deserialize = "R: serde::de::DeserializeOwned"))]
pub struct JobResult<R> {
    /// Originating job.
    pub job_id: JobId,
    /// Output on success, error otherwise.
    pub outcome: Result<R, JobError>,
    /// Worker that executed the job.
    pub worker_id: WorkerId,
    /// Execution start (ms since epoch).
    pub started_at_ms: u128,
    /// Execution end (ms since epoch).
    pub finished_at_ms: u128,
    /// Measured execution time.
    pub duration: Duration,
}

impl<R> JobResult<R> {
    /// Whether the job produced an output.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The output, if the job succeeded.
    #[must_use]
    pub fn output(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    /// The error, if the job failed.
    #[must_use]
    pub fn error(&self) -> Option<&JobError> {
        self.outcome.as_ref().err()
    }

    /// Consume the result, returning the output.
    ///
    /// # Errors
    ///
    /// Returns the captured [`JobError`] if the job failed.
    pub fn into_output(self) -> Result<R, JobError> {
        self.outcome
    }
}
