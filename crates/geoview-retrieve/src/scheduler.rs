//! Worker pools that execute retrieval jobs.
//!
//! Retrievers block, so every scheduler runs tasks on threads where blocking is
//! allowed: tokio's blocking pool or dedicated OS threads.

use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::Result;

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Background work.
    #[default]
    Normal,
    /// A caller is blocked waiting for this task.
    High,
}

/// Executes tasks on worker threads.
///
/// A scheduler may drop a task without running it (for example after shutdown);
/// jobs observe that and complete as interrupted.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, priority: Priority, task: Task);
}

/// Shuts the runtime down without blocking, so the last owner may be dropped on a worker.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Runs tasks on a tokio runtime's blocking pool.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
    _runtime: Option<Arc<OwnedRuntime>>,
}

impl TokioScheduler {
    /// Build a dedicated multi-thread runtime with `worker_threads` async workers.
    pub fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("retrieval-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Schedule onto an existing runtime owned by the host.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _runtime: None,
        }
    }

    /// Handle of the underlying runtime, for retrievers that drive async clients.
    pub fn handle(&self) -> &Handle { &self.handle }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, priority: Priority, task: Task) {
        tracing::trace!(?priority, "scheduling task on blocking pool");
        // Dropping the JoinHandle detaches the task; completion is tracked by the job.
        drop(self.handle.spawn_blocking(task));
    }
}

/// Runs each task on its own named OS thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadScheduler {
    name: Option<String>,
}

impl ThreadScheduler {
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, priority: Priority, task: Task) {
        let name = self.name.clone().unwrap_or_else(|| match priority {
            Priority::Normal => "retrieval-worker".to_string(),
            Priority::High => "retrieval-immediate".to_string(),
        });
        // On spawn failure the task is dropped unrun, which interrupts its job.
        if let Err(e) = std::thread::Builder::new().name(name).spawn(task) {
            tracing::error!(error = %e, "failed to spawn retrieval thread");
        }
    }
}
