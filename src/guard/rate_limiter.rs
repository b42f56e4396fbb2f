//! Token-bucket admission guard.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::GuardError;
use crate::core::cancel::CancelScope;

#[derive(Debug)]
struct Bucket {
    tokens: usize,
    last_refill: Instant,
}

/// Token bucket holding up to `bucket_size` tokens, refilled by one token
/// every `refill_interval`. Starts full.
///
/// Refill is computed lazily on access; no background thread is involved.
///
/// ```
/// use std::time::Duration;
/// use prometheus_job_engine::guard::TokenBucket;
///
/// let bucket = TokenBucket::new(Duration::from_secs(1), 2);
/// assert!(bucket.allow());
/// assert!(bucket.allow());
/// assert!(!bucket.allow());
/// ```
#[derive(Debug)]
pub struct TokenBucket {
    refill_interval: Duration,
    bucket_size: usize,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// Create a full bucket. A zero interval or size is raised to the minimum
    /// usable value.
    #[must_use]
    pub fn new(refill_interval: Duration, bucket_size: usize) -> Self {
        let bucket_size = bucket_size.max(1);
        Self {
            refill_interval: refill_interval.max(Duration::from_millis(1)),
            bucket_size,
            bucket: Mutex::new(Bucket {
                tokens: bucket_size,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.bucket_size
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        if bucket.tokens >= self.bucket_size {
            bucket.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let periods = elapsed.as_nanos() / self.refill_interval.as_nanos();
        if periods == 0 {
            return;
        }
        let added = usize::try_from(periods).unwrap_or(usize::MAX);
        bucket.tokens = bucket.tokens.saturating_add(added).min(self.bucket_size);
        if bucket.tokens >= self.bucket_size {
            bucket.last_refill = now;
        } else {
            // Keep the partial period so refill stays on schedule.
            let step = self.refill_interval * u32::try_from(periods).unwrap_or(u32::MAX);
            bucket.last_refill += step;
        }
    }

    /// Tokens currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Take a token if one is available.
    #[must_use]
    pub fn allow(&self) -> bool {
        self.try_take().is_ok()
    }

    /// Take a token, or report when the next one is due.
    fn try_take(&self) -> Result<(), Instant> {
        let now = Instant::now();
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Ok(())
        } else {
            Err(bucket.last_refill + self.refill_interval)
        }
    }

    /// Block until a token is taken or `scope` fires.
    ///
    /// # Errors
    ///
    /// [`GuardError::Cancelled`] with the scope's reason.
    pub fn wait_for_token(&self, scope: &CancelScope) -> Result<(), GuardError> {
        loop {
            if let Some(reason) = scope.reason() {
                return Err(GuardError::Cancelled(reason));
            }
            match self.try_take() {
                Ok(()) => return Ok(()),
                Err(next) => {
                    let wait = next.saturating_duration_since(Instant::now());
                    if let Some(reason) = scope.wait_timeout(wait) {
                        return Err(GuardError::Cancelled(reason));
                    }
                }
            }
        }
    }

    /// Async variant of [`wait_for_token`](Self::wait_for_token).
    ///
    /// # Errors
    ///
    /// [`GuardError::Cancelled`] with the scope's reason.
    pub async fn acquire(&self, scope: &CancelScope) -> Result<(), GuardError> {
        loop {
            if let Some(reason) = scope.reason() {
                return Err(GuardError::Cancelled(reason));
            }
            match self.try_take() {
                Ok(()) => return Ok(()),
                Err(next) => {
                    tokio::select! {
                        reason = scope.cancelled() => return Err(GuardError::Cancelled(reason)),
                        () = tokio::time::sleep_until(next.into()) => {}
                    }
                }
            }
        }
    }
}
