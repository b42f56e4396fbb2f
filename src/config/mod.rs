//! Configuration models for worker pools.

pub mod pool;

pub use pool::{PoolConfig, SchedulerConfig, ENV_PREFIX};
