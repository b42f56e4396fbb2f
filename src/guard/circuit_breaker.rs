//! Consecutive-failure circuit breaker.
//!
//! ```text
//! Closed --(max_failures consecutive failures)--> Open
//! Open   --(reset_timeout elapsed)--------------> HalfOpen
//! HalfOpen --(success)--> Closed    HalfOpen --(failure)--> Open
//! ```

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::GuardError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls fail fast.
    Open,
    /// Next call is a probe.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Fails fast after `max_failures` consecutive failures until `reset_timeout`
/// has passed.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker. `max_failures` of zero is treated as one.
    pub fn new(name: impl Into<String>, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            max_failures: max_failures.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Breaker name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, moving Open to HalfOpen if the reset timeout elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Consecutive failures recorded since the last success.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.reset_timeout)
        {
            debug!(breaker = %self.name, "Circuit half-open");
            inner.state = CircuitState::HalfOpen;
            inner.failures = 0;
        }
    }

    fn admit<E>(&self) -> Result<(), GuardError<E>> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        if inner.state == CircuitState::Open {
            return Err(GuardError::CircuitOpen(self.name.clone()));
        }
        Ok(())
    }

    fn record(&self, success: bool) {
        let mut inner = self.inner.lock();
        if success {
            if inner.state == CircuitState::HalfOpen {
                debug!(breaker = %self.name, "Circuit closed");
            }
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.opened_at = None;
            return;
        }
        inner.failures = inner.failures.saturating_add(1);
        if inner.state == CircuitState::HalfOpen || inner.failures >= self.max_failures {
            if inner.state != CircuitState::Open {
                warn!(breaker = %self.name, failures = inner.failures, "Circuit opened");
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Run `f` unless the breaker is open, recording its outcome.
    ///
    /// # Errors
    ///
    /// [`GuardError::CircuitOpen`] without calling `f`, or
    /// [`GuardError::Inner`] with `f`'s error.
    pub fn execute<T, E, F>(&self, f: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.admit()?;
        let out = f();
        self.record(out.is_ok());
        out.map_err(GuardError::Inner)
    }

    /// Async variant of [`execute`](Self::execute). The lock is not held
    /// while `f` runs.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;
        let out = f().await;
        self.record(out.is_ok());
        out.map_err(GuardError::Inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> Result<(), &'static str> {
        Err("down")
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("db", 2, Duration::from_secs(60));
        assert!(matches!(cb.execute(fail), Err(GuardError::Inner("down"))));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.execute(fail).is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        let mut called = false;
        let res = cb.execute(|| {
            called = true;
            Ok::<_, &str>(())
        });
        assert!(matches!(res, Err(GuardError::CircuitOpen(name)) if name == "db"));
        assert!(!called);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("db", 2, Duration::from_secs(60));
        let _ = cb.execute(fail);
        cb.execute(|| Ok::<_, &str>(1)).unwrap();
        assert_eq!(cb.failures(), 0);
        let _ = cb.execute(fail);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe() {
        let cb = CircuitBreaker::new("svc", 1, Duration::from_millis(20));
        let _ = cb.execute(fail);
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // A failed probe reopens immediately.
        let _ = cb.execute(fail);
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.execute(|| Ok::<_, &str>("up")).unwrap(), "up");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_async_call() {
        let cb = CircuitBreaker::new("rpc", 1, Duration::from_secs(60));
        let out = cb.call(|| async { Ok::<_, anyhow::Error>(7) }).await.unwrap();
        assert_eq!(out, 7);
        let err = cb
            .call(|| async { Err::<(), _>(anyhow::anyhow!("timeout")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "timeout");
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
