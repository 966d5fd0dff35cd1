use domus_core::{bus::BusInterfaceBoxed, persistence::SharedModelStore};

use domus_plugin::{message_channel, MessageLoop};

use crate::{
    api::{event::LifecycleEvent, Command, Event, Message, Query},
    EventPubSub, MessageSender, PluginSetup, Result,
};

use super::{context::Context, invoke_context_from_message_loop};

pub(crate) fn create_message_loop(
    store: SharedModelStore,
    bus: BusInterfaceBoxed,
    event_pubsub: EventPubSub,
    plugin_setup: PluginSetup,
) -> Result<(MessageLoop, MessageSender)> {
    let PluginSetup {
        config,
        worker_thread_name,
    } = plugin_setup;
    let (message_tx, mut message_rx) = message_channel();
    let mut context = Context::try_new(
        store,
        bus,
        event_pubsub.clone(),
        config,
        worker_thread_name,
    )?;
    let message_loop = async move {
        let mut exit_message_loop = false;
        log::info!("Starting message loop");
        event_pubsub.publish_event(Event::Lifecycle(LifecycleEvent::Started));
        while let Some(msg) = message_rx.recv().await {
            match msg {
                Message::Command(command) => {
                    log::trace!("Received command {:?}", command);
                    match command {
                        Command::Enqueue(reply_tx, event) => {
                            invoke_context_from_message_loop::command_enqueue(
                                &context, reply_tx, event,
                            );
                        }
                        Command::AwaitPendingChanges(reply_tx, timeout) => {
                            invoke_context_from_message_loop::command_await_pending_changes(
                                &context, reply_tx, timeout,
                            );
                        }
                        Command::Suspend(reply_tx) => {
                            invoke_context_from_message_loop::command_suspend(
                                &mut context,
                                &event_pubsub,
                                reply_tx,
                            );
                        }
                        Command::Resume(reply_tx) => {
                            invoke_context_from_message_loop::command_resume(
                                &mut context,
                                &event_pubsub,
                                reply_tx,
                            );
                        }
                        Command::Shutdown(reply_tx) => {
                            invoke_context_from_message_loop::command_shutdown(
                                &mut context,
                                reply_tx,
                            );
                            exit_message_loop = true;
                        }
                    }
                }
                Message::Query(query) => {
                    log::debug!("Received query {:?}", query);
                    match query {
                        Query::Status(reply_tx) => {
                            invoke_context_from_message_loop::query_status(&context, reply_tx);
                        }
                    }
                }
            }
            if exit_message_loop {
                log::info!("Exiting message loop");
                break;
            }
        }
        log::info!("Message loop terminated");
        drop(context);
        event_pubsub.publish_event(Event::Lifecycle(LifecycleEvent::Stopped));
    };
    Ok((Box::pin(message_loop), message_tx))
}
