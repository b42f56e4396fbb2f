//! Tests for error types

use std::time::Duration;

use prometheus_job_engine::core::{Band, CancelReason, JobError, PoolError};

#[test]
fn test_queue_full_error() {
    let err = PoolError::QueueFull(Band::High);
    assert_eq!(format!("{}", err), "queue full: high priority band");
}

#[test]
fn test_submission_timeout_error() {
    let err = PoolError::SubmissionTimeout {
        band: Band::Low,
        waited: Duration::from_millis(100),
    };
    assert_eq!(
        format!("{}", err),
        "job submission timed out after 100ms (low priority band full)"
    );
}

#[test]
fn test_caller_cancelled_error() {
    let err = PoolError::CallerCancelled(CancelReason::DeadlineExceeded);
    assert!(format!("{}", err).starts_with("caller cancelled"));
}

#[test]
fn test_invalid_worker_count_error() {
    let err = PoolError::InvalidWorkerCount {
        requested: 9,
        min: 1,
        max: 4,
    };
    assert_eq!(format!("{}", err), "invalid worker count 9: must be within [1, 4]");
}

#[test]
fn test_job_error_serializes() {
    let err = JobError::Failed("boom".into());
    let json = serde_json::to_string(&err).unwrap();
    let back: JobError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
    assert_eq!(JobError::from(CancelReason::Cancelled), JobError::Cancelled);
}
