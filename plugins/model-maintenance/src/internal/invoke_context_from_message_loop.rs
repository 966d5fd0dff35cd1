use std::time::Duration;

use tokio::task;

use domus_core::event::Event as ModelEvent;

use domus_plugin::send_reply;

use crate::{
    api::{event::LifecycleEvent, Event, PendingChangesOutcome, State, Status},
    EventPubSub, ResultSender,
};

use super::context::Context;

pub(crate) fn command_enqueue(context: &Context, reply_tx: ResultSender<()>, event: ModelEvent) {
    // Never blocks
    let result = context.enqueue(event).map_err(|err| {
        log::warn!("Failed to enqueue event: {}", err);
        err
    });
    send_reply(reply_tx, result);
}

pub(crate) fn command_await_pending_changes(
    context: &Context,
    reply_tx: ResultSender<PendingChangesOutcome>,
    timeout: Duration,
) {
    let outcome = task::block_in_place(|| context.await_pending_changes(timeout));
    if outcome != PendingChangesOutcome::Reached {
        log::debug!("Pending changes have not been reached: {outcome:?}");
    }
    send_reply(reply_tx, Ok(outcome));
}

fn publish_state_changed(event_pubsub: &EventPubSub, old_state: State, new_state: State) {
    if old_state == new_state {
        return;
    }
    let event = Event::Lifecycle(LifecycleEvent::StateChanged(new_state));
    event_pubsub.publish_event(event);
}

pub(crate) fn command_suspend(
    context: &mut Context,
    event_pubsub: &EventPubSub,
    reply_tx: ResultSender<()>,
) {
    let result = context
        .suspend()
        .map_err(|err| {
            log::warn!("Failed to suspend: {}", err);
            err
        })
        .map(|old_state| publish_state_changed(event_pubsub, old_state, context.state()));
    send_reply(reply_tx, result);
}

pub(crate) fn command_resume(
    context: &mut Context,
    event_pubsub: &EventPubSub,
    reply_tx: ResultSender<()>,
) {
    let result = context
        .resume()
        .map_err(|err| {
            log::warn!("Failed to resume: {}", err);
            err
        })
        .map(|old_state| publish_state_changed(event_pubsub, old_state, context.state()));
    send_reply(reply_tx, result);
}

pub(crate) fn command_shutdown(context: &mut Context, reply_tx: ResultSender<()>) {
    // Joins the worker thread and flushes the model
    let result = task::block_in_place(|| {
        context.shutdown().map_err(|err| {
            log::warn!("Failed to shutdown: {}", err);
            err
        })
    });
    send_reply(reply_tx, result);
}

pub(crate) fn query_status(context: &Context, reply_tx: ResultSender<Status>) {
    let status = context.status();
    send_reply(reply_tx, Ok(status));
}
