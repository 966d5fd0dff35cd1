use std::time::Duration;

use domus_core::event::Event as ModelEvent;

use crate::ResultSender;

use super::PendingChangesOutcome;

#[derive(Debug)]
pub enum Command {
    Enqueue(ResultSender<()>, ModelEvent),

    /// Wait for all synchronization points that are pending
    /// when the command is handled
    AwaitPendingChanges(ResultSender<PendingChangesOutcome>, Duration),

    Suspend(ResultSender<()>),
    Resume(ResultSender<()>),
    Shutdown(ResultSender<()>),
}
