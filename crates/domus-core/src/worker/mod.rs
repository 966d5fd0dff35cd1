//! Processing on a dedicated thread
//!
//! A [`Worker`] is driven by a [`WorkerThread`](thread::WorkerThread)
//! and steered by progress hints from other threads.

use anyhow::Result;

pub mod progress;
use self::progress::ProgressHintReceiver;

pub mod thread;

mod maintenance;
pub use self::maintenance::MaintenanceWorker;

/// How the worker wants to proceed after returning from
/// [`Worker::perform_work()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Park until resumed
    Suspending,

    /// Stop working for good
    Finishing,
}

/// Work that is performed on a single thread
///
/// All functions are invoked on the same worker thread in the
/// following order: `start_working` once, `perform_work` one or more
/// times, and finally `finish_working` once unless a previous
/// invocation failed.
pub trait Worker {
    /// Shared context that is passed into every invocation
    type Environment;

    fn start_working(&mut self, env: &mut Self::Environment) -> Result<()>;

    /// Process pending work until interrupted by a progress hint
    /// or until there is nothing left to do
    fn perform_work(
        &mut self,
        env: &Self::Environment,
        progress_hint_rx: &ProgressHintReceiver,
    ) -> Result<CompletionStatus>;

    fn finish_working(&mut self, env: &mut Self::Environment) -> Result<()>;
}
