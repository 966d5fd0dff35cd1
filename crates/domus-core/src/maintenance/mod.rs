//! Synchronization of the model
//!
//! Many producer threads enqueue events that are applied to the
//! model one after another by a single consumer. Callers are able
//! to wait until all synchronization points that were pending at
//! the time of their request have been processed.
//!
//! ```puml
//! @startuml
//! participant Producer
//! participant ModelMaintenance
//! participant Processor
//!
//! Producer -> ModelMaintenance: enqueue(event)
//! Producer -> ModelMaintenance: pending_changes_barrier(timeout)
//! activate Producer
//!
//! Processor -> ModelMaintenance: process_one()
//! activate Processor
//! ModelMaintenance -> ModelMaintenance: apply event to model
//! ModelMaintenance -> ModelMaintenance: increment processed count
//! ModelMaintenance --> Producer: notify
//! deactivate Processor
//!
//! <- Producer: true
//! deactivate Producer
//! @enduml
//! ```

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::{
    bus::{BusInterface, BusInterfaceBoxed},
    counter::ProcessedCount,
    event::{Event, EventKind},
    model::Model,
    persistence::{
        default_persistence_config, DebouncedPersistence, PersistenceConfig,
        PersistenceEventsBoxed, SharedModel, SharedModelStore,
    },
    store,
    sync::{Arc, AtomicBool, Condvar, Mutex, Ordering, RwLock},
};

mod handlers;
pub use self::handlers::HandlerError;

pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub persistence: PersistenceConfig,

    /// Maximum time for parking the processor while the queue is empty
    pub idle_wait: Duration,

    /// Start value of the processed count
    pub initial_processed_count: ProcessedCount,
}

#[must_use]
pub const fn default_config() -> MaintenanceConfig {
    MaintenanceConfig {
        persistence: default_persistence_config(),
        idle_wait: DEFAULT_IDLE_WAIT,
        initial_processed_count: ProcessedCount::ZERO,
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        default_config()
    }
}

/// External collaborators
#[allow(missing_debug_implementations)]
pub struct Environment {
    pub store: SharedModelStore,
    pub bus: BusInterfaceBoxed,
    pub persistence_events: Option<PersistenceEventsBoxed>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the model to be loaded, events are rejected
    Initializing,

    /// Accepting and processing events
    Running,

    /// No events are accepted anymore
    Terminated,
}

#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("not yet initialized")]
    Initializing(Event),

    #[error("terminated")]
    Terminated(Event),
}

impl EnqueueError {
    /// Recover the rejected event
    #[must_use]
    pub fn into_event(self) -> Event {
        match self {
            Self::Initializing(event) | Self::Terminated(event) => event,
        }
    }
}

#[derive(Error, Debug)]
pub enum InitializeError {
    #[error("already initialized")]
    AlreadyInitialized,

    #[error("terminated")]
    Terminated,

    #[error(transparent)]
    Store(#[from] store::Error),
}

/// Outcome of [`ModelMaintenance::wait_for_pending_changes()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingChangesOutcome {
    /// All synchronization points that were pending when starting
    /// to wait have been processed
    Reached,

    TimedOut,

    /// Terminated while waiting
    Terminated,
}

/// Counters of side effects that have been executed or skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub persistence_triggers: u64,
    pub operating_state_refreshes: u64,
    pub coalesced_events: u64,
    pub unsupported_events: u64,
    pub failed_events: u64,
}

#[derive(Debug)]
struct EventQueue {
    state: State,
    events: VecDeque<Event>,
    processed_count: ProcessedCount,

    /// The kind of the event that has been dequeued but is
    /// not yet counted as processed
    in_flight: Option<EventKind>,

    bus_ready: bool,
}

impl EventQueue {
    const fn new(initial_processed_count: ProcessedCount) -> Self {
        Self {
            state: State::Initializing,
            events: VecDeque::new(),
            processed_count: initial_processed_count,
            in_flight: None,
            bus_ready: false,
        }
    }

    fn index_of_next_sync_state(&self) -> ProcessedCount {
        let mut target = self.processed_count;
        if self.in_flight.map_or(false, EventKind::is_sync_point) {
            target = target.advanced_by(1);
        }
        // The event in flight will be counted before any queued event
        let in_flight_offset = u32::from(self.in_flight.is_some());
        if let Some(index) = self.events.iter().rposition(Event::is_sync_point) {
            target = target.latest(
                self.processed_count
                    .advanced_by(in_flight_offset + index as u32 + 1),
            );
        }
        target
    }

    /// Check if another event of the given kind is still queued
    fn contains_kind(&self, kind: EventKind) -> bool {
        self.events.iter().any(|event| event.kind() == kind)
    }
}

/// Marks the processor as busy until dropped
struct ProcessingScope<'a>(&'a AtomicBool);

impl<'a> ProcessingScope<'a> {
    fn try_enter(processing: &'a AtomicBool) -> Option<Self> {
        processing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(processing))
    }
}

impl Drop for ProcessingScope<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The model synchronization engine
///
/// Supposed to be shared between threads as `Arc<ModelMaintenance>`.
/// Producers only [`enqueue`](Self::enqueue) events. A single consumer
/// invokes [`process_one`](Self::process_one) repeatedly.
#[allow(missing_debug_implementations)]
pub struct ModelMaintenance {
    config: MaintenanceConfig,
    queue: Mutex<EventQueue>,
    enqueued_condvar: Condvar,
    processed_condvar: Condvar,
    processing: AtomicBool,
    statistics: Mutex<Statistics>,
    model: SharedModel,
    store: SharedModelStore,
    bus: BusInterfaceBoxed,
    persistence: DebouncedPersistence,
}

impl ModelMaintenance {
    /// Create a new engine in state [`State::Initializing`]
    ///
    /// Spawns the flush thread of the model.
    pub fn new(config: MaintenanceConfig, environment: Environment) -> std::io::Result<Self> {
        let Environment {
            store,
            bus,
            persistence_events,
        } = environment;
        let model = Arc::new(RwLock::new(Model::new()));
        let persistence = DebouncedPersistence::spawn(
            config.persistence.clone(),
            Arc::clone(&model),
            Arc::clone(&store),
            persistence_events,
        )?;
        Ok(Self {
            queue: Mutex::new(EventQueue::new(config.initial_processed_count)),
            config,
            enqueued_condvar: Condvar::new(),
            processed_condvar: Condvar::new(),
            processing: AtomicBool::new(false),
            statistics: Default::default(),
            model,
            store,
            bus,
            persistence,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// The shared model
    ///
    /// Readers must not hold the lock for a long time, otherwise
    /// they would stall the processor.
    #[must_use]
    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    #[must_use]
    pub fn persistence(&self) -> &DebouncedPersistence {
        &self.persistence
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.queue.lock().state
    }

    #[must_use]
    pub fn processed_count(&self) -> ProcessedCount {
        self.queue.lock().processed_count
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().events.len()
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        *self.statistics.lock()
    }

    #[must_use]
    pub fn is_bus_ready(&self) -> bool {
        self.queue.lock().bus_ready
    }

    /// Load the model from the store and start accepting events
    pub fn initialize(&self) -> Result<(), InitializeError> {
        match self.state() {
            State::Initializing => (),
            State::Running => return Err(InitializeError::AlreadyInitialized),
            State::Terminated => return Err(InitializeError::Terminated),
        }
        let loaded = self.store.load()?;
        let mut queue = self.queue.lock();
        match queue.state {
            State::Initializing => (),
            State::Running => return Err(InitializeError::AlreadyInitialized),
            State::Terminated => return Err(InitializeError::Terminated),
        }
        {
            let mut model = self.model.write();
            if let Some(loaded) = loaded {
                *model = loaded;
            } else {
                log::info!("Starting with an empty model");
            }
            model.refresh_operating_state();
        }
        queue.state = State::Running;
        log::debug!("Running");
        Ok(())
    }

    /// Stop accepting events and release all waiting threads
    ///
    /// Blocks until the event that is currently processed has been
    /// applied. Pending changes of the model are flushed before returning,
    /// including those of discarded dirty events.
    pub fn shutdown(&self) {
        let mut queue = self.queue.lock();
        if queue.state == State::Terminated {
            return;
        }
        queue.state = State::Terminated;
        let discarded = queue.events.len();
        // Preceding dirty events might have been coalesced with
        // one of the discarded events
        let discarded_dirty = queue.contains_kind(EventKind::ModelDirty);
        queue.events.clear();
        self.enqueued_condvar.notify_all();
        self.processed_condvar.notify_all();
        // The model must not be flushed for the last time while
        // the processor is still mutating it
        while queue.in_flight.is_some() {
            self.processed_condvar.wait(&mut queue);
        }
        drop(queue);
        if discarded > 0 {
            log::warn!("Discarded {discarded} unprocessed event(s)");
        }
        if discarded_dirty {
            self.persistence.trigger();
        }
        log::debug!("Terminated");
        self.persistence.terminate();
    }

    /// Append an event to the tail of the queue
    ///
    /// Never blocks. Wakes up the processor if it is waiting
    /// for new events.
    pub fn enqueue(&self, event: Event) -> Result<(), EnqueueError> {
        let mut queue = self.queue.lock();
        match queue.state {
            State::Initializing => return Err(EnqueueError::Initializing(event)),
            State::Terminated => return Err(EnqueueError::Terminated(event)),
            State::Running => (),
        }
        queue.events.push_back(event);
        drop(queue);
        self.enqueued_condvar.notify_one();
        Ok(())
    }

    /// The processed count that needs to be reached for applying all
    /// synchronization points that are currently pending
    ///
    /// Returns the position of the last synchronization point in the
    /// queue. If none is pending then the current processed count
    /// is returned.
    #[must_use]
    pub fn index_of_next_sync_state(&self) -> ProcessedCount {
        self.queue.lock().index_of_next_sync_state()
    }

    /// Wait until all currently pending synchronization points have
    /// been processed
    ///
    /// The target is determined once when invoked. Events that are
    /// enqueued afterwards will not extend the waiting time.
    ///
    /// A zero `timeout` only checks the current state without blocking.
    pub fn wait_for_pending_changes(&self, timeout: Duration) -> PendingChangesOutcome {
        // None if the timeout is too long to be represented
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.queue.lock();
        let target = queue.index_of_next_sync_state();
        loop {
            if queue.processed_count.has_reached(target) {
                return PendingChangesOutcome::Reached;
            }
            if queue.state == State::Terminated {
                return PendingChangesOutcome::Terminated;
            }
            if timeout.is_zero() {
                return PendingChangesOutcome::TimedOut;
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .processed_condvar
                        .wait_until(&mut queue, deadline)
                        .timed_out()
                    {
                        return if queue.processed_count.has_reached(target) {
                            PendingChangesOutcome::Reached
                        } else {
                            PendingChangesOutcome::TimedOut
                        };
                    }
                }
                None => self.processed_condvar.wait(&mut queue),
            }
        }
    }

    /// Wait until all currently pending synchronization points have
    /// been processed
    ///
    /// Returns `true` on success and `false` if the timeout expired
    /// or the engine has been terminated.
    pub fn pending_changes_barrier(&self, timeout: Duration) -> bool {
        self.wait_for_pending_changes(timeout) == PendingChangesOutcome::Reached
    }

    /// Park the processor until the queue is not empty
    ///
    /// Returns `true` if events are available and `false` on
    /// timeout or termination.
    pub fn wait_for_events(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.queue.lock();
        loop {
            if !queue.events.is_empty() {
                return true;
            }
            if queue.state == State::Terminated || timeout.is_zero() {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .enqueued_condvar
                        .wait_until(&mut queue, deadline)
                        .timed_out()
                    {
                        return !queue.events.is_empty();
                    }
                }
                None => self.enqueued_condvar.wait(&mut queue),
            }
        }
    }

    /// Wait until the bus has been reported as ready
    pub fn wait_for_bus_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.queue.lock();
        loop {
            if queue.bus_ready {
                return true;
            }
            if queue.state == State::Terminated || timeout.is_zero() {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .processed_condvar
                        .wait_until(&mut queue, deadline)
                        .timed_out()
                    {
                        return queue.bus_ready;
                    }
                }
                None => self.processed_condvar.wait(&mut queue),
            }
        }
    }

    /// Process the event at the front of the queue
    ///
    /// Returns `false` without any side effects if the queue is empty.
    ///
    /// Must only be invoked by a single consumer at a time. Concurrent
    /// invocations are rejected.
    pub fn process_one(&self) -> bool {
        let Some(_processing_scope) = ProcessingScope::try_enter(&self.processing) else {
            log::error!("Rejecting concurrent processing of events");
            return false;
        };
        let (event, coalesced) = {
            let mut queue = self.queue.lock();
            if queue.state == State::Terminated {
                return false;
            }
            let Some(event) = queue.events.pop_front() else {
                return false;
            };
            let coalesced = event.is_sync_point() && queue.contains_kind(event.kind());
            queue.in_flight = Some(event.kind());
            (event, coalesced)
        };
        log::trace!("Processing {event}");
        // The queue is not locked while mutating the model
        self.dispatch(&event, coalesced);
        let mut queue = self.queue.lock();
        queue.in_flight = None;
        queue.processed_count.increment();
        if event.kind() == EventKind::BusReady {
            queue.bus_ready = true;
        }
        drop(queue);
        self.processed_condvar.notify_all();
        true
    }

    fn dispatch(&self, event: &Event, coalesced: bool) {
        let result = match event.kind() {
            EventKind::ModelDirty => {
                if coalesced {
                    self.count_coalesced(event);
                } else {
                    self.persistence.trigger();
                    self.statistics.lock().persistence_triggers += 1;
                }
                Ok(None)
            }
            EventKind::OperatingModeChanged => {
                if coalesced {
                    self.count_coalesced(event);
                } else {
                    self.model.write().refresh_operating_state();
                    self.statistics.lock().operating_state_refreshes += 1;
                }
                Ok(None)
            }
            EventKind::BusReady => handlers::on_bus_ready(&self.model),
            EventKind::DeviceDiscovered => {
                handlers::on_device_discovered(&self.model, self.bus(), event)
            }
            EventKind::DeviceLost => handlers::on_device_lost(&self.model, event),
            EventKind::MeterLost => handlers::on_meter_lost(&self.model, event),
            EventKind::CallSceneOnDevice => handlers::on_call_scene(&self.model, event),
            EventKind::DeviceNeedsRepair => {
                handlers::on_device_needs_repair(&self.model, self.bus(), event)
            }
            EventKind::Dummy => Ok(None),
            EventKind::Unsupported(code) => {
                log::warn!("Ignoring unsupported event with code {code}");
                self.statistics.lock().unsupported_events += 1;
                Ok(None)
            }
        };
        match result {
            Ok(None) => (),
            Ok(Some(derived)) => {
                log::trace!("Enqueuing {derived} derived from {event}");
                if let Err(err) = self.enqueue(derived) {
                    let derived = err.into_event();
                    if derived.kind() == EventKind::ModelDirty {
                        log::debug!("Saving changes of {event} without enqueuing {derived}");
                        self.persistence.trigger();
                    } else {
                        log::debug!("Dropping derived event {derived}");
                    }
                }
            }
            Err(err) => {
                log::warn!("Failed to process {event}: {err}");
                self.statistics.lock().failed_events += 1;
            }
        }
    }

    fn count_coalesced(&self, event: &Event) {
        log::debug!("Coalescing {event} with a subsequent event");
        self.statistics.lock().coalesced_events += 1;
    }

    fn bus(&self) -> &dyn BusInterface {
        &self.bus
    }
}

impl Drop for ModelMaintenance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
