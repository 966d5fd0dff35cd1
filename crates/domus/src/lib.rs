#![cfg_attr(not(test), deny(clippy::panic_in_result_fn))]
#![cfg_attr(not(debug_assertions), deny(clippy::used_underscore_binding))]

pub use domus_core as core;

#[cfg(feature = "plugin")]
pub use domus_plugin as plugin;
