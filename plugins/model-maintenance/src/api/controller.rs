use std::time::Duration;

use domus_core::event::Event as ModelEvent;

use domus_plugin::{reply_channel, send_message_receive_result};

use crate::{MessageSender, PluginResult};

use super::{Command, PendingChangesOutcome, Query, Status};

/// Remote controller for the plugin
///
/// Wraps the message-based communication with the plugin
/// into asynchronous functions.
#[derive(Debug, Clone)]
pub struct Controller {
    message_tx: MessageSender,
}

impl Controller {
    #[must_use]
    pub const fn new(message_tx: MessageSender) -> Self {
        Self { message_tx }
    }

    pub async fn command_enqueue(&self, event: ModelEvent) -> PluginResult<()> {
        let (reply_tx, reply_rx) = reply_channel();
        let command = Command::Enqueue(reply_tx, event);
        send_message_receive_result(command, &self.message_tx, reply_rx).await
    }

    pub async fn command_await_pending_changes(
        &self,
        timeout: Duration,
    ) -> PluginResult<PendingChangesOutcome> {
        let (reply_tx, reply_rx) = reply_channel();
        let command = Command::AwaitPendingChanges(reply_tx, timeout);
        send_message_receive_result(command, &self.message_tx, reply_rx).await
    }

    pub async fn command_suspend(&self) -> PluginResult<()> {
        let (reply_tx, reply_rx) = reply_channel();
        let command = Command::Suspend(reply_tx);
        send_message_receive_result(command, &self.message_tx, reply_rx).await
    }

    pub async fn command_resume(&self) -> PluginResult<()> {
        let (reply_tx, reply_rx) = reply_channel();
        let command = Command::Resume(reply_tx);
        send_message_receive_result(command, &self.message_tx, reply_rx).await
    }

    pub async fn command_shutdown(&self) -> PluginResult<()> {
        let (reply_tx, reply_rx) = reply_channel();
        let command = Command::Shutdown(reply_tx);
        send_message_receive_result(command, &self.message_tx, reply_rx).await
    }

    pub async fn query_status(&self) -> PluginResult<Status> {
        let (reply_tx, reply_rx) = reply_channel();
        let query = Query::Status(reply_tx);
        send_message_receive_result(query, &self.message_tx, reply_rx).await
    }
}
