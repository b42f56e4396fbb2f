//! Builders to construct worker pools from configuration.

use std::collections::HashMap;

use crate::config::{PoolConfig, SchedulerConfig};
use crate::core::{JobExecutor, PoolError, WorkerPool};

/// Build stopped worker pools from scheduler configuration, one per named
/// entry, using `executor_factory` to supply each pool's job body.
///
/// # Errors
///
/// Returns [`PoolError::InvalidConfig`] if the configuration is invalid, or
/// the first error returned by `executor_factory`.
pub fn build_pools<P, R, E, FE>(
    cfg: &SchedulerConfig,
    mut executor_factory: FE,
) -> Result<HashMap<String, WorkerPool<P, R, E>>, PoolError>
where
    P: Send + 'static,
    R: Send + 'static,
    E: JobExecutor<P, R>,
    FE: FnMut(&str, &PoolConfig) -> Result<E, PoolError>,
{
    cfg.validate().map_err(PoolError::InvalidConfig)?;

    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        let executor = executor_factory(name, pool_cfg)?;
        let pool = WorkerPool::new(pool_cfg.clone(), executor)?;
        pools.insert(name.clone(), pool);
    }

    Ok(pools)
}
