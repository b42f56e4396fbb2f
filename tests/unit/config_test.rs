//! Tests for configuration validation

use prometheus_job_engine::config::{PoolConfig, SchedulerConfig};
use prometheus_job_engine::core::Band;

#[test]
fn test_pool_config_defaults_are_valid() {
    let config = PoolConfig::default();
    assert!(config.validate().is_ok());
    assert!(config.min_workers <= config.initial_workers);
    assert!(config.initial_workers <= config.max_workers);
    assert_eq!(config.thresholds().route(8), Band::High);
    assert_eq!(config.thresholds().route(5), Band::Medium);
    assert_eq!(config.thresholds().route(4), Band::Low);
}

#[test]
fn test_pool_config_invalid_bounds() {
    assert!(PoolConfig::default().with_workers(4, 2, 3).validate().is_err());
    assert!(PoolConfig::default().with_workers(2, 4, 1).validate().is_err());
    assert!(PoolConfig::default().with_workers(0, 0, 0).validate().is_err());
    assert!(PoolConfig::default().with_workers(0, 1, 0).validate().is_ok());
}

#[test]
fn test_pool_config_invalid_capacity() {
    let invalid = PoolConfig::default().with_queue_capacity(0);
    assert!(invalid.validate().unwrap_err().contains("queue_capacity"));
}

#[test]
fn test_pool_config_invalid_thresholds() {
    let invalid = PoolConfig::default().with_thresholds(5, 5);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_autoscale_interval_zero_disables() {
    assert!(PoolConfig::default()
        .with_autoscale_interval_ms(0)
        .autoscale_interval()
        .is_none());
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "pools": {
            "inference": {
                "min_workers": 1,
                "max_workers": 4,
                "initial_workers": 2,
                "queue_capacity": 32
            }
        }
    }"#;
    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    let pool = &cfg.pools["inference"];
    assert_eq!(pool.max_workers, 4);
    assert_eq!(pool.queue_capacity, 32);
    // Missing fields fall back to defaults.
    assert_eq!(pool.default_job_timeout_ms, 30_000);
}

#[test]
fn test_scheduler_config_rejects_empty_and_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{"pools": {}}"#).is_err());
    let err = SchedulerConfig::from_json_str(
        r#"{"pools": {"bad": {"min_workers": 3, "max_workers": 1, "initial_workers": 1}}}"#,
    )
    .unwrap_err();
    assert!(err.contains("pool `bad` invalid"));
    assert!(SchedulerConfig::from_json_str("not json").unwrap_err().starts_with("parse error"));
}
