//! API surface handed to the transport layer.

pub mod api;

pub use api::{
    health, list_pools, status, submit_job, BandDepth, Health, JobResultResponse, JobSubmission,
    PoolSnapshot, PoolStatus,
};
