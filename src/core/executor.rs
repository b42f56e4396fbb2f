//! Job body abstraction.
//!
//! The pool is configured with a single job body: anything implementing
//! [`JobExecutor`]. Closures are adapted with [`executor_fn`]; variant job
//! kinds are expressed as an enum payload the body matches on.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::core::cancel::CancelScope;
use crate::core::error::AppResult;
use crate::core::job::Job;

/// Executes a job payload and produces an output.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_job_engine::core::{AppResult, CancelScope, Job, JobExecutor};
///
/// #[derive(Clone)]
/// struct Resize;
///
/// enum ImageJob {
///     Thumbnail { path: String },
///     Full { path: String, width: u32 },
/// }
///
/// #[async_trait]
/// impl JobExecutor<ImageJob, Vec<u8>> for Resize {
///     async fn execute(&self, scope: CancelScope, job: Job<ImageJob>) -> AppResult<Vec<u8>> {
///         match job.payload {
///             ImageJob::Thumbnail { path } => thumbnail(&path, &scope).await,
///             ImageJob::Full { path, width } => resize(&path, width, &scope).await,
///         }
///     }
/// }
/// ```
///
/// # Threading
///
/// Each worker owns a clone of the executor and drives `execute` on its own
/// single-threaded tokio runtime. The returned future is dropped when `scope`
/// fires, so bodies that `.await` are cancelled promptly; bodies doing long
/// synchronous work should poll [`CancelScope::is_cancelled`].
#[async_trait]
pub trait JobExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Run the job body under `scope`.
    async fn execute(&self, scope: CancelScope, job: Job<P>) -> AppResult<R>;
}

/// Adapter turning a closure into a [`JobExecutor`].
pub struct FnExecutor<F, P, R> {
    f: F,
    _marker: PhantomData<fn(P) -> R>,
}

impl<F: Clone, P, R> Clone for FnExecutor<F, P, R> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            _marker: PhantomData,
        }
    }
}

/// Wrap `f` as a job body.
///
/// ```
/// use prometheus_job_engine::core::{executor_fn, CancelScope, Job};
///
/// let body = executor_fn(|_scope: CancelScope, job: Job<u64>| async move {
///     Ok::<_, anyhow::Error>(job.payload * 2)
/// });
/// # let _ = body;
/// ```
pub fn executor_fn<F, Fut, P, R>(f: F) -> FnExecutor<F, P, R>
where
    F: Fn(CancelScope, Job<P>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = AppResult<R>> + Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    FnExecutor {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, P, R> JobExecutor<P, R> for FnExecutor<F, P, R>
where
    F: Fn(CancelScope, Job<P>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = AppResult<R>> + Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    async fn execute(&self, scope: CancelScope, job: Job<P>) -> AppResult<R> {
        (self.f)(scope, job).await
    }
}
