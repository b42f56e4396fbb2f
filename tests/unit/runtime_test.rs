//! Tests for the API surface

use std::time::Duration;

use prometheus_job_engine::config::{PoolConfig, SchedulerConfig};
use prometheus_job_engine::core::{executor_fn, Band, CancelScope, Job, WorkerPool};
use prometheus_job_engine::runtime::{health, list_pools, status, submit_job, JobResultResponse, JobSubmission};

fn config() -> PoolConfig {
    PoolConfig::default()
        .with_workers(0, 2, 1)
        .with_autoscale_interval_ms(0)
        .with_shutdown_grace_period_ms(1_000)
}

#[test]
fn test_status_and_health() {
    let pool = WorkerPool::new(
        config(),
        executor_fn(|_scope: CancelScope, job: Job<String>| async move {
            Ok::<_, anyhow::Error>(job.payload.to_uppercase())
        }),
    )
    .unwrap();

    let stopped = health(&pool);
    assert!(!stopped.ok);
    assert!(!stopped.running);

    pool.start().unwrap();
    let req: JobSubmission<String> =
        serde_json::from_str(r#"{"priority": 9, "timeout_ms": 1000, "payload": "hi"}"#).unwrap();
    let id = submit_job(&pool, req).unwrap();
    assert!(!id.is_empty());

    let result = pool.get_result_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result.job_id, id);
    let response = JobResultResponse::from(result);
    assert_eq!(response.output.as_deref(), Some("HI"));
    assert!(response.error.is_none());

    let snapshot = status(&pool);
    assert!(snapshot.running);
    assert_eq!(snapshot.workers.len(), 1);
    assert_eq!(snapshot.metrics.jobs_processed, 1);
    assert_eq!(snapshot.bands[0].band, Band::High);
    assert!(serde_json::to_string(&snapshot).is_ok());

    let healthy = health(&pool);
    assert!(healthy.ok);
    assert_eq!(healthy.workers, 1);

    pool.stop().unwrap();
}

#[test]
fn test_list_pools_sorted() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{"pools": {
            "b": {"min_workers": 1, "max_workers": 2, "initial_workers": 1},
            "a": {"min_workers": 1, "max_workers": 3, "initial_workers": 1}
        }}"#,
    )
    .unwrap();
    let pools = list_pools(&cfg);
    assert_eq!(pools[0].name, "a");
    assert_eq!(pools[0].max_workers, 3);
    assert_eq!(pools[1].name, "b");
}
