//! Tests for builder modules

use prometheus_job_engine::builders::build_pools;
use prometheus_job_engine::config::SchedulerConfig;
use prometheus_job_engine::core::{executor_fn, CancelScope, FnExecutor, Job, PoolError};

type Body = FnExecutor<
    fn(CancelScope, Job<u32>) -> futures::future::Ready<anyhow::Result<u32>>,
    u32,
    u32,
>;

#[test]
fn test_build_pools_from_config() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{"pools": {
            "fast": {"min_workers": 1, "max_workers": 2, "initial_workers": 1},
            "slow": {"min_workers": 0, "max_workers": 1, "initial_workers": 0}
        }}"#,
    )
    .unwrap();

    let mut names = Vec::new();
    let pools = build_pools(&cfg, |name, _cfg| {
        names.push(name.to_string());
        Ok(executor_fn(|_scope: CancelScope, job: Job<u32>| async move {
            Ok::<_, anyhow::Error>(job.payload)
        }))
    })
    .unwrap();

    assert_eq!(pools.len(), 2);
    assert_eq!(names.len(), 2);
    assert_eq!(pools["slow"].config().max_workers, 1);
    assert!(pools.values().all(|p| !p.is_running()));
}

#[test]
fn test_build_pools_propagates_factory_error() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{"pools": {"only": {"min_workers": 1, "max_workers": 1, "initial_workers": 1}}}"#,
    )
    .unwrap();
    let res = build_pools(&cfg, |name, _cfg| {
        Err::<Body, _>(PoolError::InvalidConfig(format!("no executor for {name}")))
    });
    assert!(matches!(res, Err(PoolError::InvalidConfig(msg)) if msg.contains("only")));
}
