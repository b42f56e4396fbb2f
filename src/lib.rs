//! # Prometheus Job Engine
//!
//! A concurrent, priority-aware job execution engine.
//!
//! Callers submit jobs carrying a priority and an optional timeout. Jobs are
//! routed into one of three bounded priority bands and executed by a pool of
//! dedicated worker threads that always take the highest-priority ready job.
//! Every job runs under a cancellation scope derived from the pool's, so a job
//! timeout or a pool shutdown interrupts the body promptly. Results are
//! collected from a shared result stream (or pushed to a handler).
//!
//! ## Key Features
//!
//! - **Strict priority dispatch**: high, medium and low bands, FIFO within a
//!   band, with configurable thresholds and backpressure on full bands
//! - **Hierarchical cancellation**: one-shot [`CancelScope`](core::CancelScope)s
//!   with deadlines, usable from blocking and async code alike
//! - **Panic isolation**: a failing or panicking job never takes its worker down
//! - **Dynamic scaling**: explicit resizing plus a queue-depth autoscaler,
//!   always within the configured bounds
//! - **Lock-free metrics**: counters, latency and gauges with serializable
//!   snapshots
//! - **Guards**: an optional circuit breaker and token bucket for callers
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_job_engine::config::PoolConfig;
//! use prometheus_job_engine::core::{executor_fn, CancelScope, Job, WorkerPool};
//!
//! let pool = WorkerPool::new(
//!     PoolConfig::default().with_workers(1, 8, 4),
//!     executor_fn(|scope: CancelScope, job: Job<String>| async move {
//!         // Long-running work should await or poll `scope`.
//!         Ok::<_, anyhow::Error>(job.payload.len())
//!     }),
//! )?;
//!
//! pool.start()?;
//! pool.submit(Job::new("urgent", "hello".to_string()).with_priority(9))?;
//! let result = pool.get_result()?;
//! println!("{} -> {:?}", result.job_id, result.outcome);
//! pool.stop()?;
//! ```
//!
//! For complete examples, see `tests/worker_pool_test.rs`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: jobs, cancellation, dispatch, workers.
pub mod core;
/// Configuration models for pools.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Optional circuit-breaker and rate-limiting guards.
pub mod guard;
/// API surface (request/response models) for transport layers.
pub mod runtime;
/// Shared utilities.
pub mod util;
