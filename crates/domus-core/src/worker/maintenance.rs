use anyhow::Result;

use crate::{
    maintenance::{ModelMaintenance, State},
    sync::Arc,
};

use super::{
    progress::{ProgressHint, ProgressHintReceiver},
    CompletionStatus, Worker,
};

/// The single consumer of a [`ModelMaintenance`] engine
///
/// Processes events one after another and parks while the queue
/// is empty. Progress hints are checked between events and at least
/// once per idle wait period.
#[derive(Debug, Default)]
pub struct MaintenanceWorker {
    processed_events: u64,
}

impl MaintenanceWorker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            processed_events: 0,
        }
    }

    /// Number of events that have been processed by this worker
    #[must_use]
    pub const fn processed_events(&self) -> u64 {
        self.processed_events
    }
}

impl Worker for MaintenanceWorker {
    type Environment = Arc<ModelMaintenance>;

    fn start_working(&mut self, env: &mut Self::Environment) -> Result<()> {
        if env.state() == State::Initializing {
            log::info!("Loading model");
            env.initialize()?;
        }
        Ok(())
    }

    fn perform_work(
        &mut self,
        env: &Self::Environment,
        progress_hint_rx: &ProgressHintReceiver,
    ) -> Result<CompletionStatus> {
        let idle_wait = env.config().idle_wait;
        loop {
            match progress_hint_rx.peek() {
                ProgressHint::Continue => (),
                ProgressHint::Suspend => return Ok(CompletionStatus::Suspending),
                ProgressHint::Finish => return Ok(CompletionStatus::Finishing),
            }
            if env.process_one() {
                self.processed_events += 1;
                continue;
            }
            if env.state() == State::Terminated {
                log::debug!("Finishing after termination");
                return Ok(CompletionStatus::Finishing);
            }
            env.wait_for_events(idle_wait);
        }
    }

    fn finish_working(&mut self, env: &mut Self::Environment) -> Result<()> {
        log::info!(
            "Finished after processing {} event(s)",
            self.processed_events
        );
        env.shutdown();
        Ok(())
    }
}
