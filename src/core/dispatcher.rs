//! Priority dispatcher: severity-ordered bounded bands.
//!
//! Every job is routed to one of three bands by its priority ordinal. Each band
//! is a bounded `crossbeam_channel`, so backpressure and mutual exclusion come
//! from the channel itself. Workers always take from the highest non-empty band;
//! FIFO order is preserved within a band.
//!
//! Strict priority is deliberate: while the high band stays saturated, lower
//! bands make no progress. Callers that need fairness must rate-limit their
//! high-priority submissions.

use std::fmt;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::cancel::{CancelReason, CancelScope};
use crate::core::job::Job;

/// Priority band, ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    /// Served first.
    High,
    /// Served when the high band is empty.
    Medium,
    /// Served when both higher bands are empty.
    Low,
}

impl Band {
    /// All bands in receive order.
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Priority thresholds mapping ordinals to bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandThresholds {
    /// Minimum priority for the high band.
    pub high: i32,
    /// Minimum priority for the medium band.
    pub medium: i32,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self { high: 8, medium: 5 }
    }
}

impl BandThresholds {
    /// Band for a priority ordinal.
    #[must_use]
    pub const fn route(&self, priority: i32) -> Band {
        if priority >= self.high {
            Band::High
        } else if priority >= self.medium {
            Band::Medium
        } else {
            Band::Low
        }
    }
}

/// Why a blocking submission did not enqueue the job.
#[derive(Debug)]
pub(crate) enum EnqueueError {
    /// The band was full (immediately, or for the whole wait).
    Full,
    /// The caller's scope fired.
    Caller(CancelReason),
    /// The pool scope fired or the band was closed.
    Shutdown,
}

/// What a worker got from [`PriorityDispatcher::next_job`].
#[derive(Debug)]
pub(crate) enum Dequeued<P> {
    /// A job to execute.
    Job(Job<P>),
    /// The worker was told to retire.
    Retired,
    /// The pool scope fired.
    Shutdown,
}

/// Routes jobs into bands and hands them out in priority order.
pub struct PriorityDispatcher<P> {
    thresholds: BandThresholds,
    capacity: usize,
    /// Dropped on `close` so no further job can be accepted.
    senders: RwLock<Option<[Sender<Job<P>>; 3]>>,
    receivers: [Receiver<Job<P>>; 3],
}

impl<P> PriorityDispatcher<P> {
    /// Create a dispatcher with `capacity` slots per band.
    #[must_use]
    pub fn new(thresholds: BandThresholds, capacity: usize) -> Self {
        let (high_tx, high_rx) = bounded(capacity);
        let (medium_tx, medium_rx) = bounded(capacity);
        let (low_tx, low_rx) = bounded(capacity);
        Self {
            thresholds,
            capacity,
            senders: RwLock::new(Some([high_tx, medium_tx, low_tx])),
            receivers: [high_rx, medium_rx, low_rx],
        }
    }

    /// Band a priority ordinal maps to.
    #[must_use]
    pub const fn route(&self, priority: i32) -> Band {
        self.thresholds.route(priority)
    }

    /// Slots per band.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn sender(&self, band: Band) -> Option<Sender<Job<P>>> {
        self.senders
            .read()
            .as_ref()
            .map(|senders| senders[band.index()].clone())
    }

    /// Enqueue without waiting.
    pub(crate) fn try_enqueue(&self, job: Job<P>) -> Result<Band, EnqueueError> {
        let band = self.route(job.priority);
        let tx = self.sender(band).ok_or(EnqueueError::Shutdown)?;
        match tx.try_send(job) {
            Ok(()) => Ok(band),
            Err(TrySendError::Full(_)) => Err(EnqueueError::Full),
            Err(TrySendError::Disconnected(_)) => Err(EnqueueError::Shutdown),
        }
    }

    /// Enqueue, waiting for space until `deadline`, the caller scope or the pool
    /// scope fires, whichever comes first.
    pub(crate) fn enqueue(
        &self,
        job: Job<P>,
        deadline: Instant,
        caller: Option<&CancelScope>,
        pool: &CancelScope,
    ) -> Result<Band, EnqueueError> {
        let band = self.route(job.priority);
        let tx = self.sender(band).ok_or(EnqueueError::Shutdown)?;

        // Fast path keeps a free slot from racing with an already-fired scope.
        let job = match tx.try_send(job) {
            Ok(()) => return Ok(band),
            Err(TrySendError::Disconnected(_)) => return Err(EnqueueError::Shutdown),
            Err(TrySendError::Full(job)) => job,
        };

        let caller_deadline = caller.and_then(CancelScope::deadline);
        let wait_until = caller_deadline.map_or(deadline, |d| d.min(deadline));

        let mut sel = Select::new();
        let send_idx = sel.send(&tx);
        let pool_idx = sel.recv(pool.signal());
        let caller_idx = caller.map(|scope| sel.recv(scope.signal()));

        let Ok(oper) = sel.select_deadline(wait_until) else {
            if let Some(reason) = caller.and_then(CancelScope::reason) {
                return Err(EnqueueError::Caller(reason));
            }
            return if pool.is_cancelled() {
                Err(EnqueueError::Shutdown)
            } else {
                Err(EnqueueError::Full)
            };
        };

        match oper.index() {
            i if i == send_idx => oper
                .send(&tx, job)
                .map(|()| band)
                .map_err(|_| EnqueueError::Shutdown),
            i if i == pool_idx => {
                let _ = oper.recv(pool.signal());
                Err(EnqueueError::Shutdown)
            }
            i => {
                // Only the caller scope remains.
                debug_assert_eq!(Some(i), caller_idx);
                let scope = caller.ok_or(EnqueueError::Shutdown)?;
                let _ = oper.recv(scope.signal());
                Err(EnqueueError::Caller(
                    scope.reason().unwrap_or(CancelReason::Cancelled),
                ))
            }
        }
    }

    /// Next job in strict priority order.
    ///
    /// Checks the pool scope first and the retire signal second, so a job is
    /// never taken once shutdown has begun and a retiring worker never claims
    /// new work. Blocks until one of the bands, the pool scope or the retire
    /// signal becomes ready.
    pub(crate) fn next_job(&self, pool: &CancelScope, retire: &Receiver<()>) -> Dequeued<P> {
        loop {
            if pool.is_cancelled() {
                return Dequeued::Shutdown;
            }
            match retire.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return Dequeued::Retired,
                Err(TryRecvError::Empty) => {}
            }

            let mut open = 0;
            for rx in &self.receivers {
                match rx.try_recv() {
                    Ok(job) => return Dequeued::Job(job),
                    Err(TryRecvError::Empty) => open += 1,
                    Err(TryRecvError::Disconnected) => {}
                }
            }
            if open == 0 {
                return Dequeued::Shutdown;
            }

            let mut sel = Select::new();
            for rx in &self.receivers {
                sel.recv(rx);
            }
            sel.recv(pool.signal());
            sel.recv(retire);
            let _ = sel.ready();
        }
    }

    /// Jobs waiting across all bands.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.receivers.iter().map(Receiver::len).sum()
    }

    /// Jobs waiting per band, highest first.
    #[must_use]
    pub fn band_depths(&self) -> [(Band, usize); 3] {
        Band::ALL.map(|band| (band, self.receivers[band.index()].len()))
    }

    /// Stop accepting jobs. Already-queued jobs stay until drained.
    pub fn close(&self) {
        self.senders.write().take();
    }

    /// Discard every queued job, returning how many were dropped.
    pub fn drain(&self) -> usize {
        self.receivers.iter().map(|rx| rx.try_iter().count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(id: &str, priority: i32) -> Job<()> {
        Job::new(id, ()).with_priority(priority)
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(50)
    }

    #[test]
    fn test_routing_thresholds() {
        let t = BandThresholds::default();
        assert_eq!(t.route(10), Band::High);
        assert_eq!(t.route(8), Band::High);
        assert_eq!(t.route(7), Band::Medium);
        assert_eq!(t.route(5), Band::Medium);
        assert_eq!(t.route(4), Band::Low);
        assert_eq!(t.route(-3), Band::Low);

        let custom = BandThresholds { high: 100, medium: 50 };
        assert_eq!(custom.route(99), Band::Medium);
    }

    #[test]
    fn test_strict_priority_with_fifo_within_band() {
        let d = PriorityDispatcher::new(BandThresholds::default(), 8);
        let pool = CancelScope::new();
        let (_retire_tx, retire_rx) = bounded::<()>(1);

        for j in [job("c", 2), job("a", 9), job("m", 6), job("b", 9)] {
            d.enqueue(j, soon(), None, &pool).unwrap();
        }
        assert_eq!(d.depth(), 4);

        let order: Vec<String> = (0..4)
            .map(|_| match d.next_job(&pool, &retire_rx) {
                Dequeued::Job(j) => j.id.to_string(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(order, ["a", "b", "m", "c"]);
    }

    #[test]
    fn test_try_enqueue_full_band() {
        let d = PriorityDispatcher::new(BandThresholds::default(), 1);
        d.try_enqueue(job("a", 0)).unwrap();
        assert!(matches!(d.try_enqueue(job("b", 0)), Err(EnqueueError::Full)));
        // Other bands are independent.
        assert_eq!(d.try_enqueue(job("c", 9)).unwrap(), Band::High);
    }

    #[test]
    fn test_enqueue_times_out_when_full() {
        let d = PriorityDispatcher::new(BandThresholds::default(), 1);
        let pool = CancelScope::new();
        d.enqueue(job("a", 0), soon(), None, &pool).unwrap();

        let start = Instant::now();
        let deadline = start + Duration::from_millis(100);
        let err = d.enqueue(job("b", 0), deadline, None, &pool).unwrap_err();
        assert!(matches!(err, EnqueueError::Full));
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_enqueue_unblocks_on_caller_cancel() {
        let d = PriorityDispatcher::new(BandThresholds::default(), 1);
        let pool = CancelScope::new();
        let caller = CancelScope::new();
        d.enqueue(job("a", 0), soon(), None, &pool).unwrap();

        let canceller = {
            let caller = caller.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                caller.cancel();
            })
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = d
            .enqueue(job("b", 0), deadline, Some(&caller), &pool)
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Caller(CancelReason::Cancelled)));
        canceller.join().unwrap();
    }

    #[test]
    fn test_enqueue_unblocks_on_pool_cancel() {
        let d = PriorityDispatcher::new(BandThresholds::default(), 1);
        let pool = CancelScope::new();
        d.enqueue(job("a", 0), soon(), None, &pool).unwrap();
        pool.cancel();
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = d.enqueue(job("b", 0), deadline, None, &pool).unwrap_err();
        assert!(matches!(err, EnqueueError::Shutdown));
    }

    #[test]
    fn test_next_job_prefers_shutdown_and_retire() {
        let d = PriorityDispatcher::new(BandThresholds::default(), 4);
        let pool = CancelScope::new();
        let (retire_tx, retire_rx) = bounded::<()>(1);
        d.try_enqueue(job("a", 9)).unwrap();

        retire_tx.send(()).unwrap();
        assert!(matches!(d.next_job(&pool, &retire_rx), Dequeued::Retired));

        pool.cancel();
        assert!(matches!(d.next_job(&pool, &retire_rx), Dequeued::Shutdown));
        assert_eq!(d.depth(), 1);
    }

    #[test]
    fn test_next_job_blocks_until_job_arrives() {
        let d = std::sync::Arc::new(PriorityDispatcher::new(BandThresholds::default(), 4));
        let pool = CancelScope::new();
        let (_retire_tx, retire_rx) = bounded::<()>(1);

        let producer = {
            let d = std::sync::Arc::clone(&d);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                d.try_enqueue(job("late", 1)).unwrap();
            })
        };
        match d.next_job(&pool, &retire_rx) {
            Dequeued::Job(j) => assert_eq!(j.id.as_str(), "late"),
            other => panic!("unexpected {other:?}"),
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_close_and_drain() {
        let d = PriorityDispatcher::new(BandThresholds::default(), 4);
        d.try_enqueue(job("a", 9)).unwrap();
        d.try_enqueue(job("b", 1)).unwrap();
        d.close();
        assert!(matches!(d.try_enqueue(job("c", 1)), Err(EnqueueError::Shutdown)));
        assert_eq!(d.drain(), 2);
        assert_eq!(d.depth(), 0);
    }
}
