use std::{
    any::Any,
    io,
    thread::{self, JoinHandle},
};

use anyhow::Result;
use thiserror::Error;

use super::{
    progress::{ProgressHintReceiver, ProgressHintSender, SwitchProgressHintResult},
    CompletionStatus, Worker,
};

/// Observable states of a worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    Running,
    Suspending,
    Finishing,
    Stopping,
}

/// Callbacks that are invoked on the worker thread
pub trait Events {
    fn on_state_changed(&mut self, state: State);
}

pub type EventsBoxed = Box<dyn Events + Send + 'static>;

impl Events for EventsBoxed {
    fn on_state_changed(&mut self, state: State) {
        (**self).on_state_changed(state);
    }
}

/// Everything that is moved into the worker thread
///
/// Handed back after joining the thread unless it panicked.
#[allow(missing_debug_implementations)]
pub struct RecoverableParams<W: Worker, E> {
    pub progress_hint_rx: ProgressHintReceiver,
    pub worker: W,
    pub environment: W::Environment,
    pub events: E,
}

impl<W: Worker, E: Events> RecoverableParams<W, E> {
    fn enter_state(&mut self, state: State) {
        log::debug!("{state:?}");
        self.events.on_state_changed(state);
    }

    fn run(&mut self) -> Result<()> {
        self.enter_state(State::Starting);
        self.worker.start_working(&mut self.environment)?;
        loop {
            self.enter_state(State::Running);
            let status = self
                .worker
                .perform_work(&self.environment, &self.progress_hint_rx)?;
            match status {
                CompletionStatus::Suspending => {
                    // Finishing has precedence over suspending
                    if !self.progress_hint_rx.try_suspending() {
                        log::debug!("Not suspending while finishing");
                        continue;
                    }
                    self.enter_state(State::Suspending);
                    self.progress_hint_rx.wait_while_suspending();
                }
                CompletionStatus::Finishing => {
                    if !self.progress_hint_rx.try_finishing() {
                        continue;
                    }
                    self.enter_state(State::Finishing);
                    self.worker.finish_working(&mut self.environment)?;
                    break;
                }
            }
        }
        self.enter_state(State::Stopping);
        Ok(())
    }
}

/// A worker thread that has terminated regularly
#[allow(missing_debug_implementations)]
pub struct TerminatedThread<W: Worker, E> {
    /// The outcome of the worker
    pub result: Result<()>,

    pub recovered_params: RecoverableParams<W, E>,
}

/// The worker thread panicked and the parameters are lost
#[derive(Debug, Error)]
#[error("worker thread {thread_name} panicked: {message}")]
pub struct WorkerThreadPanicked {
    pub thread_name: String,
    pub message: String,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown cause".to_owned()
}

/// Drives a [`Worker`] on a named thread
///
/// Keeps a sender of the progress hint for steering the worker.
#[allow(missing_debug_implementations)]
pub struct WorkerThread<W: Worker, E> {
    thread_name: String,
    progress_hint_tx: ProgressHintSender,
    join_handle: JoinHandle<TerminatedThread<W, E>>,
}

impl<W, E> WorkerThread<W, E>
where
    W: Worker + Send + 'static,
    W::Environment: Send + 'static,
    E: Events + Send + 'static,
{
    pub fn spawn(
        thread_name: impl Into<String>,
        recoverable_params: RecoverableParams<W, E>,
    ) -> io::Result<Self> {
        let thread_name = thread_name.into();
        let progress_hint_tx = ProgressHintSender::attach(&recoverable_params.progress_hint_rx);
        let join_handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut recovered_params = recoverable_params;
                let result = recovered_params.run();
                if let Err(err) = &result {
                    log::error!("Worker failed: {err:#}");
                }
                TerminatedThread {
                    result,
                    recovered_params,
                }
            })?;
        Ok(Self {
            thread_name,
            progress_hint_tx,
            join_handle,
        })
    }

    #[must_use]
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Steer the worker from other threads
    #[must_use]
    pub fn progress_hint_tx(&self) -> &ProgressHintSender {
        &self.progress_hint_tx
    }

    pub fn suspend(&self) -> SwitchProgressHintResult {
        self.progress_hint_tx.suspend()
    }

    pub fn resume(&self) -> SwitchProgressHintResult {
        self.progress_hint_tx.resume()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Block until the thread has terminated
    ///
    /// Doesn't ask the worker to finish, see [`Self::finish_and_join()`].
    pub fn join(self) -> Result<TerminatedThread<W, E>, WorkerThreadPanicked> {
        let Self {
            thread_name,
            join_handle,
            ..
        } = self;
        join_handle.join().map_err(|payload| WorkerThreadPanicked {
            thread_name,
            message: panic_message(payload.as_ref()),
        })
    }

    /// Ask the worker to finish and wait until the thread has terminated
    pub fn finish_and_join(self) -> Result<TerminatedThread<W, E>, WorkerThreadPanicked> {
        if let Err(err) = self.progress_hint_tx.finish() {
            // The worker has already terminated
            log::debug!("Failed to finish worker thread {}: {err}", self.thread_name);
        }
        self.join()
    }
}
