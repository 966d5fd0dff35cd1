#![cfg_attr(not(test), deny(clippy::panic_in_result_fn))]
#![cfg_attr(not(debug_assertions), deny(clippy::used_underscore_binding))]

//! Synchronization of a home automation model
//!
//! Events reported by the bus and by other subsystems are queued
//! and applied to the in-memory [`model::Model`] by a single
//! consumer. See [`maintenance`] for the engine.

mod counter;
pub use self::counter::{ProcessedCount, ProcessedCountValue};

pub mod audit;
pub mod bus;
pub mod event;
pub mod maintenance;
pub mod model;
pub mod persistence;
pub mod store;
mod sync;
pub mod worker;
