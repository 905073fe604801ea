use crate::core::{DbError, Result};
use std::future::Future;
use std::sync::Arc;
use std::thread;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// Fixed-size pool of worker threads that bulk writes are scheduled on.
///
/// Either owns a dedicated multi-thread runtime or borrows the handle of an
/// existing one. Clones share the owned runtime; it shuts down when the last
/// clone is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    name: String,
    num_workers: usize,
    handle: Handle,
    runtime: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime {
    runtime: Option<Runtime>,
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        // The last clone may go away on one of this runtime's own workers
        if Handle::try_current().is_ok() {
            thread::spawn(move || runtime.shutdown_background());
        } else {
            runtime.shutdown_background();
        }
    }
}

impl WorkerPool {
    /// Start a dedicated runtime with `num_workers` worker threads.
    pub fn new(name: &str, num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(DbError::WorkerPool("num_workers must be > 0".into()));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(num_workers)
            .thread_name(format!("{name}-worker"))
            .enable_all()
            .build()?;

        Ok(Self {
            name: name.to_string(),
            num_workers,
            handle: runtime.handle().clone(),
            runtime: Some(Arc::new(OwnedRuntime {
                runtime: Some(runtime),
            })),
        })
    }

    /// Schedule onto an existing runtime, partitioning work as if it had `num_workers` threads.
    pub fn from_handle(handle: Handle, num_workers: usize) -> Self {
        Self {
            name: "shared".to_string(),
            num_workers: num_workers.max(1),
            handle,
            runtime: None,
        }
    }

    /// Wrap the runtime the caller is currently running on.
    pub fn current(num_workers: usize) -> Result<Self> {
        let handle = Handle::try_current().map_err(|err| DbError::WorkerPool(err.to_string()))?;
        Ok(Self::from_handle(handle, num_workers))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Drive `future` to completion from a thread outside the pool.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}
