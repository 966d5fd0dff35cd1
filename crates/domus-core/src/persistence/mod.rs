//! Debounced write-behind of the model
//!
//! Bursts of triggers are collapsed into a single flush that is
//! executed on a dedicated thread after a quiet window has passed
//! without any new trigger. A continuously retriggered flush is
//! executed at the latest after a maximum delay.

use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use time::OffsetDateTime;

use crate::{
    model::Model,
    store::{self, ModelStore},
    sync::{Arc, Condvar, Mutex, RwLock},
};

pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_secs(1);

pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Time without any new trigger before flushing
    pub quiet_window: Duration,

    /// Upper bound for postponing a flush after the first trigger
    pub max_delay: Duration,
}

#[must_use]
pub const fn default_persistence_config() -> PersistenceConfig {
    PersistenceConfig {
        quiet_window: DEFAULT_QUIET_WINDOW,
        max_delay: DEFAULT_MAX_DELAY,
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        default_persistence_config()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub saved_at: OffsetDateTime,

    /// Number of triggers that have been collapsed into this flush
    pub trigger_count: usize,
}

/// Event callbacks
///
/// Invoked on the flush thread.
pub trait PersistenceEvents {
    fn on_model_saved(&self, report: &SaveReport);

    fn on_model_save_failed(&self, err: &store::Error);
}

pub type PersistenceEventsBoxed = Box<dyn PersistenceEvents + Send + Sync + 'static>;

pub type SharedModel = Arc<RwLock<Model>>;

pub type SharedModelStore = Arc<dyn ModelStore + Send + Sync + 'static>;

#[derive(Debug, Default)]
struct FlushSchedule {
    first_trigger: Option<Instant>,
    last_trigger: Option<Instant>,
    trigger_count: usize,
    terminating: bool,
}

impl FlushSchedule {
    fn trigger(&mut self, now: Instant) {
        self.first_trigger.get_or_insert(now);
        self.last_trigger = Some(now);
        self.trigger_count += 1;
    }

    fn deadline(&self, config: &PersistenceConfig) -> Option<Instant> {
        let first_trigger = self.first_trigger?;
        let last_trigger = self.last_trigger.unwrap_or(first_trigger);
        Some((last_trigger + config.quiet_window).min(first_trigger + config.max_delay))
    }

    /// Reset the schedule and return the number of pending triggers
    fn take_pending(&mut self) -> usize {
        self.first_trigger = None;
        self.last_trigger = None;
        std::mem::take(&mut self.trigger_count)
    }
}

struct Shared {
    config: PersistenceConfig,
    model: SharedModel,
    store: SharedModelStore,
    events: Option<PersistenceEventsBoxed>,
    schedule: Mutex<FlushSchedule>,
    schedule_condvar: Condvar,
    save_count: Mutex<usize>,
}

impl Shared {
    fn flush(&self, trigger_count: usize) {
        debug_assert!(trigger_count > 0);
        // Only hold the read lock while taking the snapshot and not
        // while writing it into the store
        let snapshot = self.model.read().clone();
        match self.store.save(&snapshot) {
            Ok(()) => {
                *self.save_count.lock() += 1;
                log::debug!("Saved model after {trigger_count} trigger(s)");
                if let Some(events) = &self.events {
                    events.on_model_saved(&SaveReport {
                        saved_at: OffsetDateTime::now_utc(),
                        trigger_count,
                    });
                }
            }
            Err(err) => {
                log::error!("Failed to save model: {err}");
                if let Some(events) = &self.events {
                    events.on_model_save_failed(&err);
                }
            }
        }
    }

    fn thread_fn(&self) {
        log::debug!("Starting flush thread");
        let mut schedule = self.schedule.lock();
        loop {
            if schedule.terminating {
                let trigger_count = schedule.take_pending();
                drop(schedule);
                if trigger_count > 0 {
                    log::debug!("Flushing pending changes before terminating");
                    self.flush(trigger_count);
                }
                break;
            }
            match schedule.deadline(&self.config) {
                None => {
                    self.schedule_condvar.wait(&mut schedule);
                }
                Some(deadline) => {
                    if Instant::now() < deadline {
                        // The deadline might have been postponed
                        // when waking up, so just loop again
                        self.schedule_condvar.wait_until(&mut schedule, deadline);
                        continue;
                    }
                    let trigger_count = schedule.take_pending();
                    drop(schedule);
                    self.flush(trigger_count);
                    schedule = self.schedule.lock();
                }
            }
        }
        log::debug!("Flush thread terminated");
    }
}

/// Write-behind trigger for the model
#[allow(missing_debug_implementations)]
pub struct DebouncedPersistence {
    shared: Arc<Shared>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedPersistence {
    /// Spawn the flush thread
    pub fn spawn(
        config: PersistenceConfig,
        model: SharedModel,
        store: SharedModelStore,
        events: Option<PersistenceEventsBoxed>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            config,
            model,
            store,
            events,
            schedule: Default::default(),
            schedule_condvar: Condvar::new(),
            save_count: Mutex::new(0),
        });
        let join_handle = thread::Builder::new()
            .name("model-flush".to_owned())
            .spawn({
                let shared = Arc::clone(&shared);
                move || shared.thread_fn()
            })?;
        Ok(Self {
            shared,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PersistenceConfig {
        &self.shared.config
    }

    /// Request a flush of the model
    ///
    /// Ignored after [`DebouncedPersistence::terminate()`].
    pub fn trigger(&self) {
        let mut schedule = self.shared.schedule.lock();
        if schedule.terminating {
            log::debug!("Ignoring trigger after termination");
            return;
        }
        schedule.trigger(Instant::now());
        drop(schedule);
        self.shared.schedule_condvar.notify_one();
    }

    /// Check if a flush has been scheduled
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.schedule.lock().first_trigger.is_some()
    }

    /// Number of successful flushes
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.shared.save_count.lock()
    }

    /// Flush pending changes immediately and stop the flush thread
    ///
    /// Blocks until the flush thread has terminated. Idempotent.
    pub fn terminate(&self) {
        let mut schedule = self.shared.schedule.lock();
        schedule.terminating = true;
        drop(schedule);
        self.shared.schedule_condvar.notify_one();
        let Some(join_handle) = self.join_handle.lock().take() else {
            return;
        };
        if join_handle.join().is_err() {
            log::error!("Flush thread panicked");
        }
    }
}

impl Drop for DebouncedPersistence {
    fn drop(&mut self) {
        self.terminate();
    }
}
