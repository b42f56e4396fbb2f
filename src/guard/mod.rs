//! Optional guards a caller can wrap around submission or job bodies.
//!
//! Neither guard is wired into the pool; both are small, self-contained and
//! cheap to share behind an `Arc`.

pub mod circuit_breaker;
pub mod rate_limiter;

use thiserror::Error;

use crate::core::cancel::CancelReason;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::TokenBucket;

/// Errors produced by guards.
#[derive(Debug, Error)]
pub enum GuardError<E = anyhow::Error> {
    /// The breaker is open; the call was not attempted.
    #[error("circuit breaker `{0}` is open")]
    CircuitOpen(String),

    /// The scope fired while waiting for a token.
    #[error("token wait interrupted: {0}")]
    Cancelled(CancelReason),

    /// The guarded call failed.
    #[error("{0}")]
    Inner(E),
}
