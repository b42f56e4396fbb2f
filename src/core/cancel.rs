//! Hierarchical, one-shot cancellation scopes.
//!
//! A [`CancelScope`] wraps a [`CancellationToken`] and is shared by the pool,
//! by every job it executes and by any sub-work a job body derives from it.
//! Firing a scope fires all of its descendants; a fired scope never un-fires.
//! On top of the token a scope records the first [`CancelReason`] and carries
//! an optional deadline.
//!
//! Scopes can be awaited from async code ([`CancelScope::cancelled`]) and
//! selected on from blocking code ([`CancelScope::signal`]). The signal channel
//! never carries a message: it disconnects when the token is cancelled, which
//! makes it ready in any `crossbeam_channel::Select`.
//!
//! Deadlines are observed lazily. A scope whose deadline has passed reports
//! itself cancelled with [`CancelReason::DeadlineExceeded`] the first time it is
//! inspected or awaited, so blocking waiters should bound their wait with
//! [`CancelScope::deadline`] as well as the signal.
//!
//! ```
//! use prometheus_job_engine::core::{CancelReason, CancelScope};
//!
//! let pool = CancelScope::new();
//! let job = pool.child();
//! pool.cancel();
//! assert_eq!(job.reason(), Some(CancelReason::Cancelled));
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Wake, Waker};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Why a scope fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Explicitly cancelled (or inherited from a cancelled ancestor).
    Cancelled,
    /// The scope's deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Drops the signal sender once the token is cancelled.
///
/// The token's cancellation future is polled with a waker pointing back here,
/// so cancellation of any ancestor disconnects the channel synchronously from
/// inside `CancellationToken::cancel`.
struct SignalBridge {
    signal_tx: Mutex<Option<Sender<()>>>,
    wait: Mutex<Option<Pin<Box<WaitForCancellationFutureOwned>>>>,
}

struct BridgeWaker(Weak<SignalBridge>);

impl Wake for BridgeWaker {
    fn wake(self: Arc<Self>) {
        if let Some(bridge) = self.0.upgrade() {
            SignalBridge::poll(&bridge);
        }
    }
}

impl SignalBridge {
    fn attach(token: &CancellationToken, signal_tx: Sender<()>) -> Arc<Self> {
        let bridge = Arc::new(Self {
            signal_tx: Mutex::new(Some(signal_tx)),
            wait: Mutex::new(Some(Box::pin(token.clone().cancelled_owned()))),
        });
        Self::poll(&bridge);
        bridge
    }

    fn poll(bridge: &Arc<Self>) {
        let waker = Waker::from(Arc::new(BridgeWaker(Arc::downgrade(bridge))));
        let mut cx = Context::from_waker(&waker);
        let mut wait = bridge.wait.lock();
        let fired = match &mut *wait {
            Some(fut) => fut.as_mut().poll(&mut cx).is_ready(),
            None => false,
        };
        if fired {
            *wait = None;
            drop(wait);
            bridge.disconnect();
        }
    }

    fn disconnect(&self) {
        self.signal_tx.lock().take();
    }
}

struct ScopeInner {
    token: CancellationToken,
    /// First reason recorded by this scope itself; inherited reasons live on
    /// the ancestor that fired.
    reason: Mutex<Option<CancelReason>>,
    parent: Option<Arc<ScopeInner>>,
    deadline: Option<Instant>,
    bridge: Arc<SignalBridge>,
    signal_rx: Receiver<()>,
}

impl ScopeInner {
    fn recorded_reason(&self) -> Option<CancelReason> {
        let mut scope = Some(self);
        while let Some(inner) = scope {
            if let Some(reason) = *inner.reason.lock() {
                return Some(reason);
            }
            scope = inner.parent.as_deref();
        }
        None
    }
}

/// Cloneable handle to a cancellation scope.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

impl fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelScope")
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelScope {
    /// Create a root scope with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::build(CancellationToken::new(), None, None)
    }

    /// Create a root scope that fires with `DeadlineExceeded` after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(
            CancellationToken::new(),
            Instant::now().checked_add(timeout),
            None,
        )
    }

    fn build(
        token: CancellationToken,
        deadline: Option<Instant>,
        parent: Option<Arc<ScopeInner>>,
    ) -> Self {
        let (signal_tx, signal_rx) = bounded(0);
        let bridge = SignalBridge::attach(&token, signal_tx);
        Self {
            inner: Arc::new(ScopeInner {
                token,
                reason: Mutex::new(None),
                parent,
                deadline,
                bridge,
                signal_rx,
            }),
        }
    }

    /// Derive a child scope that fires whenever this scope fires.
    #[must_use]
    pub fn child(&self) -> Self {
        self.derive(self.inner.deadline)
    }

    /// Derive a child scope with its own timeout layered on this scope.
    ///
    /// The child's deadline is the earlier of `now + timeout` and this scope's
    /// deadline.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (own, self.inner.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.derive(deadline)
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        Self::build(
            self.inner.token.child_token(),
            deadline,
            Some(Arc::clone(&self.inner)),
        )
    }

    /// Underlying token, for handing to code built on `tokio_util`.
    ///
    /// Cancelling the token directly fires the scope with `Cancelled`.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Fire the scope (and all descendants) with `Cancelled`.
    ///
    /// Returns `false` if the scope had already fired.
    pub fn cancel(&self) -> bool {
        self.fire(CancelReason::Cancelled)
    }

    fn fire(&self, reason: CancelReason) -> bool {
        {
            let mut recorded = self.inner.reason.lock();
            if recorded.is_some() || self.inner.token.is_cancelled() {
                return false;
            }
            *recorded = Some(reason);
        }
        self.inner.token.cancel();
        self.inner.bridge.disconnect();
        true
    }

    /// Whether the scope has fired. Observes an elapsed deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.token.is_cancelled() {
            return true;
        }
        if self.deadline_elapsed() {
            self.fire(CancelReason::DeadlineExceeded);
            return true;
        }
        false
    }

    /// The reason the scope fired, if it has.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        if self.is_cancelled() {
            Some(
                self.inner
                    .recorded_reason()
                    .unwrap_or(CancelReason::Cancelled),
            )
        } else {
            None
        }
    }

    /// Absolute deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left until the deadline, if any.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn deadline_elapsed(&self) -> bool {
        self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Receiver that becomes ready (disconnected) once the scope fires.
    ///
    /// Only explicit or inherited cancellation disconnects it; combine it with
    /// [`deadline`](Self::deadline) when waiting on a deadline scope.
    #[must_use]
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal_rx
    }
    /// Block the current thread until the scope fires.
    pub fn wait(&self) -> CancelReason {
        loop {
            if let Some(reason) = self.reason() {
                return reason;
            }
            match self.inner.deadline {
                Some(deadline) => {
                    let _ = self.inner.signal_rx.recv_deadline(deadline);
                }
                None => {
                    let _ = self.inner.signal_rx.recv();
                }
            }
        }
    }

    /// Block for at most `timeout`; returns the reason if the scope fired.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelReason> {
        let limit = Instant::now() + timeout;
        loop {
            if let Some(reason) = self.reason() {
                return Some(reason);
            }
            let until = self.inner.deadline.map_or(limit, |d| d.min(limit));
            match self.inner.signal_rx.recv_deadline(until) {
                Err(RecvTimeoutError::Timeout) if Instant::now() >= limit => {
                    return self.reason();
                }
                _ => {}
            }
        }
    }

    /// Resolve once the scope fires, firing it with `DeadlineExceeded` when the
    /// deadline elapses first.
    pub async fn cancelled(&self) -> CancelReason {
        if let Some(reason) = self.reason() {
            return reason;
        }
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.inner.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline.into()) => {
                        self.fire(CancelReason::DeadlineExceeded);
                    }
                }
            }
            None => self.inner.token.cancelled().await,
        }
        self.reason().unwrap_or(CancelReason::Cancelled)
    }
}
