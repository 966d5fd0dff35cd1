#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::explicit_deref_methods)]
#![warn(clippy::explicit_into_iter_loop)]
#![warn(clippy::explicit_iter_loop)]
#![warn(clippy::must_use_candidate)]
#![warn(rustdoc::broken_intra_doc_links)]
#![cfg_attr(not(test), deny(clippy::panic_in_result_fn))]
#![cfg_attr(not(debug_assertions), deny(clippy::used_underscore_binding))]

use std::io::Error as IoError;

use thiserror::Error;

use domus_core::{
    bus::BusInterfaceBoxed,
    maintenance::{EnqueueError, InitializeError},
    persistence::SharedModelStore,
    worker::progress::SwitchProgressHintError,
};

use domus_plugin::EventPublisherIndex;

pub mod api;

mod internal;
use self::internal::message_loop::create_message_loop;

#[allow(missing_debug_implementations)]
pub struct Environment {
    pub event_publisher_index: EventPublisherIndex,

    /// Loads the model on startup and receives the debounced snapshots
    pub store: SharedModelStore,

    pub bus: BusInterfaceBoxed,
}

#[must_use]
pub const fn default_config() -> api::Config {
    domus_core::maintenance::default_config()
}

pub const DEFAULT_WORKER_THREAD_NAME: &str = "model-maintenance";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSetup {
    pub config: api::Config,
    pub worker_thread_name: String,
}

impl Default for PluginSetup {
    fn default() -> Self {
        Self {
            config: default_config(),
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_owned(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid state")]
    InvalidState,

    #[error(transparent)]
    Initialize(#[from] InitializeError),

    #[error("event rejected: {0}")]
    Enqueue(#[from] EnqueueError),

    #[error(transparent)]
    ProgressHint(#[from] SwitchProgressHintError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub type PluginError = domus_plugin::PluginError<Error>;
pub type PluginResult<T> = domus_plugin::PluginResult<T, Error>;

pub type MessageSender = domus_plugin::MessageSender<api::Message>;
pub type MessageReceiver = domus_plugin::MessageReceiver<api::Message>;

pub type ResultSender<T> = domus_plugin::ResultSender<T, Error>;
pub type ResultReceiver<T> = domus_plugin::ResultReceiver<T, Error>;

pub type PublishedEvent = domus_plugin::PublishedEvent<api::Event>;
pub type EventReceiver = domus_plugin::EventReceiver<api::Event>;
type EventPubSub = domus_plugin::EventPubSub<api::Event>;

pub type Plugin = domus_plugin::PluginContainer<api::Message, api::Event>;
pub type PluginPorts = domus_plugin::PluginPorts<api::Message, api::Event>;

/// Create the plugin
///
/// The model is loaded from the store and the worker thread is
/// started immediately. Events are processed as soon as they arrive,
/// even before the message loop is spawned.
pub fn create_plugin(
    environment: Environment,
    plugin_setup: PluginSetup,
    event_channel_capacity: usize,
) -> Result<Plugin> {
    let Environment {
        event_publisher_index,
        store,
        bus,
    } = environment;
    let (event_pubsub, event_subscriber) =
        EventPubSub::new(event_publisher_index, event_channel_capacity);
    let (message_loop, message_tx) = create_message_loop(store, bus, event_pubsub, plugin_setup)?;
    Ok(Plugin {
        ports: PluginPorts {
            message_tx,
            event_subscriber,
        },
        message_loop,
    })
}

#[cfg(test)]
mod tests;
