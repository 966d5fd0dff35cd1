use std::{sync::Arc, time::Duration};

use domus_core::{
    bus::BusInterfaceBoxed,
    event::Event as ModelEvent,
    maintenance::{
        Environment as EngineEnvironment, MaintenanceConfig, ModelMaintenance,
        PendingChangesOutcome, Statistics,
    },
    persistence::{PersistenceEvents, SaveReport, SharedModelStore},
    store,
    worker::{
        thread::{self as worker_thread, EventsBoxed, RecoverableParams, TerminatedThread, WorkerThread},
        MaintenanceWorker,
    },
    ProcessedCount,
};

use crate::{
    api::event::{Event, IncidentEvent, NotificationEvent},
    Error, EventPubSub, Result,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum State {
    /// Events are processed as they arrive
    Running,

    /// Events are accepted but not processed
    Suspended,

    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: State,
    pub processed_count: ProcessedCount,
    pub queue_len: usize,

    /// The processed count that needs to be reached until all
    /// pending synchronization points have been processed
    pub next_sync_state: ProcessedCount,

    pub is_bus_ready: bool,
    pub statistics: Statistics,
    pub model_save_count: usize,
}

/// Publishes the outcome of flushing the model
struct ContextEventCallback {
    event_pubsub: EventPubSub,
}

impl PersistenceEvents for ContextEventCallback {
    fn on_model_saved(&self, report: &SaveReport) {
        let event = Event::Notification(NotificationEvent::ModelSaved(report.clone()));
        self.event_pubsub.publish_event(event);
    }

    fn on_model_save_failed(&self, err: &store::Error) {
        let event = Event::Incident(IncidentEvent::ModelSaveFailed {
            message: err.to_string(),
        });
        self.event_pubsub.publish_event(event);
    }
}

struct WorkerThreadEvents;

impl worker_thread::Events for WorkerThreadEvents {
    fn on_state_changed(&mut self, state: worker_thread::State) {
        log::debug!("Worker thread state changed: {state:?}");
    }
}

type MaintenanceWorkerThread = WorkerThread<MaintenanceWorker, EventsBoxed>;

#[allow(missing_debug_implementations)]
pub(crate) struct Context {
    state: State,
    engine: Arc<ModelMaintenance>,
    worker_thread: Option<MaintenanceWorkerThread>,
}

impl Context {
    pub(crate) fn try_new(
        store: SharedModelStore,
        bus: BusInterfaceBoxed,
        event_pubsub: EventPubSub,
        config: MaintenanceConfig,
        worker_thread_name: String,
    ) -> Result<Self> {
        let environment = EngineEnvironment {
            store,
            bus,
            persistence_events: Some(Box::new(ContextEventCallback { event_pubsub })),
        };
        let engine = ModelMaintenance::new(config, environment)?;
        engine.initialize()?;
        let engine = Arc::new(engine);
        let events: EventsBoxed = Box::new(WorkerThreadEvents);
        let worker_thread = WorkerThread::spawn(
            worker_thread_name,
            RecoverableParams {
                progress_hint_rx: Default::default(),
                worker: MaintenanceWorker::new(),
                environment: Arc::clone(&engine),
                events,
            },
        )?;
        Ok(Self {
            state: State::Running,
            engine,
            worker_thread: Some(worker_thread),
        })
    }

    pub(crate) const fn state(&self) -> State {
        self.state
    }

    pub(crate) fn status(&self) -> Status {
        let engine = &self.engine;
        Status {
            state: self.state,
            processed_count: engine.processed_count(),
            queue_len: engine.queue_len(),
            next_sync_state: engine.index_of_next_sync_state(),
            is_bus_ready: engine.is_bus_ready(),
            statistics: engine.statistics(),
            model_save_count: engine.persistence().save_count(),
        }
    }

    pub(crate) fn enqueue(&self, event: ModelEvent) -> Result<()> {
        self.engine.enqueue(event).map_err(Into::into)
    }

    /// Blocks the current thread
    pub(crate) fn await_pending_changes(&self, timeout: Duration) -> PendingChangesOutcome {
        self.engine.wait_for_pending_changes(timeout)
    }

    fn worker_thread(&self) -> Result<&MaintenanceWorkerThread> {
        self.worker_thread.as_ref().ok_or(Error::InvalidState)
    }

    /// Switch from [`State::Running`] to [`State::Suspended`]
    ///
    /// Returns the previous state.
    pub(crate) fn suspend(&mut self) -> Result<State> {
        match self.state {
            State::Running => (),
            State::Suspended => return Ok(State::Suspended),
            State::Terminated => return Err(Error::InvalidState),
        }
        log::debug!("Suspending");
        self.worker_thread()?.suspend()?;
        Ok(std::mem::replace(&mut self.state, State::Suspended))
    }

    /// Switch from [`State::Suspended`] to [`State::Running`]
    ///
    /// Returns the previous state.
    pub(crate) fn resume(&mut self) -> Result<State> {
        match self.state {
            State::Suspended => (),
            State::Running => return Ok(State::Running),
            State::Terminated => return Err(Error::InvalidState),
        }
        log::debug!("Resuming");
        self.worker_thread()?.resume()?;
        Ok(std::mem::replace(&mut self.state, State::Running))
    }

    /// Stop the worker thread and terminate the engine
    ///
    /// Pending changes of the model are flushed before returning.
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        if self.state == State::Terminated {
            return Ok(());
        }
        self.state = State::Terminated;
        let Some(worker_thread) = self.worker_thread.take() else {
            self.engine.shutdown();
            return Ok(());
        };
        log::debug!("Finishing worker thread");
        let result = match worker_thread.finish_and_join() {
            Ok(TerminatedThread { result, .. }) => result.map_err(Error::Other),
            Err(err) => Err(Error::Other(err.into())),
        };
        // The worker may have failed before terminating the engine
        self.engine.shutdown();
        result
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("Failed to shutdown: {err}");
        }
    }
}
