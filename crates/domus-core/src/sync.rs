//! Synchronization primitives used throughout the crate

pub(crate) use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc, Weak,
};

pub(crate) use parking_lot::{Condvar, Mutex, RwLock};
