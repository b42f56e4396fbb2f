//! Tests for the circuit breaker and token bucket guards

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use prometheus_job_engine::core::{CancelReason, CancelScope};
use prometheus_job_engine::guard::{CircuitBreaker, CircuitState, GuardError, TokenBucket};

#[test]
fn test_breaker_fails_fast_when_open() {
    let breaker = CircuitBreaker::new("payments", 3, Duration::from_secs(30));
    for _ in 0..3 {
        let res = breaker.execute(|| Err::<(), _>(anyhow::anyhow!("503")));
        assert!(matches!(res, Err(GuardError::Inner(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    let res = breaker.execute(|| Ok::<_, anyhow::Error>(()));
    assert!(matches!(res, Err(GuardError::CircuitOpen(name)) if name == "payments"));
    assert_eq!(
        breaker.execute(|| Ok::<_, anyhow::Error>(())).unwrap_err().to_string(),
        "circuit breaker `payments` is open"
    );
}

#[test]
fn test_bucket_limits_concurrent_callers() {
    let bucket = Arc::new(TokenBucket::new(Duration::from_secs(60), 5));
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            thread::spawn(move || bucket.allow())
        })
        .collect();
    let allowed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(allowed, 5);
    assert_eq!(bucket.available(), 0);
}

#[test]
fn test_wait_for_token_cancelled_by_parent_scope() {
    let bucket = TokenBucket::new(Duration::from_secs(60), 1);
    assert!(bucket.allow());

    let parent = CancelScope::new();
    let child = parent.child();
    let canceller = parent.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        canceller.cancel();
    });
    let err = bucket.wait_for_token(&child).unwrap_err();
    assert!(matches!(err, GuardError::Cancelled(CancelReason::Cancelled)));
    handle.join().unwrap();
}
