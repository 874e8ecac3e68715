//! The job manager contract.
//!
//! Pass bodies may be scheduled onto an application-provided worker pool; the frame
//! graph itself only needs these two operations from it. The [`InlineJobManager`] runs
//! everything on the calling thread and is the default for tools and tests.

/// Priority hint for asynchronous work.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    Low,
    Medium,
    High,
}

/// Interface to an externally supplied job system.
pub trait JobManager: Send + Sync {
    /// Schedule `body` to run on a worker, at the given priority.
    fn run_async(&self, priority: JobPriority, body: Box<dyn FnOnce() + Send>);

    /// Run `body` on the main thread and wait for it to finish.
    fn sync_on_main_thread(&self, body: Box<dyn FnOnce() + Send>);
}

/// Runs every job synchronously on the calling thread.
#[derive(Debug, Default, Copy, Clone)]
pub struct InlineJobManager;

impl JobManager for InlineJobManager {
    fn run_async(&self, _priority: JobPriority, body: Box<dyn FnOnce() + Send>) {
        body();
    }

    fn sync_on_main_thread(&self, body: Box<dyn FnOnce() + Send>) {
        body();
    }
}
