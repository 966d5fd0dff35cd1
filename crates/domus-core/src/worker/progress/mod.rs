//! Steering a worker thread from other threads
//!
//! Controlling threads post a [`ProgressHint`] through a
//! [`ProgressHintSender`]. The worker thread owns the single
//! [`ProgressHintReceiver`] and polls the hint between units of work.
//! Every accepted change wakes up the worker if it is parked.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::sync::{Arc, AtomicU8, Condvar, Mutex, Ordering, Weak};

/// Desired worker progress
///
/// The worker decides when to obey. Hints are only checked
/// in between processing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProgressHint {
    /// Keep on processing
    #[default]
    Continue = 0,

    /// Return with [`CompletionStatus::Suspending`](super::CompletionStatus::Suspending)
    /// and park until resumed or finished
    Suspend = 1,

    /// Return with [`CompletionStatus::Finishing`](super::CompletionStatus::Finishing)
    Finish = 2,
}

impl ProgressHint {
    fn from_repr(repr: u8) -> Self {
        match repr {
            0 => Self::Continue,
            1 => Self::Suspend,
            2 => Self::Finish,
            _ => unreachable!("invalid progress hint: {repr}"),
        }
    }
}

/// Successful switch of the progress hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchProgressHintOk {
    /// The hint has been changed and the worker has been woken up
    Accepted { previous_state: ProgressHint },

    /// The hint already had the desired value
    Ignored,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SwitchProgressHintError {
    /// The worker thread is gone
    #[error("detached")]
    Detached,

    #[error("rejected while {current_state:?}")]
    Rejected { current_state: ProgressHint },
}

pub type SwitchProgressHintResult = Result<SwitchProgressHintOk, SwitchProgressHintError>;

/// Edge-triggered wakeup of the parked worker
#[derive(Debug, Default)]
struct Wakeup {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Wakeup {
    fn notify(&self) {
        let mut pending = self.pending.lock();
        if *pending {
            return;
        }
        *pending = true;
        drop(pending);
        self.condvar.notify_one();
    }

    /// Block until notified and consume the notification
    fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.condvar.wait(&mut pending);
        }
        *pending = false;
    }

    /// Returns `true` if a notification has been consumed
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut pending = self.pending.lock();
        while !*pending {
            if self.condvar.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *pending, false)
    }
}

#[derive(Debug, Default)]
struct Handshake {
    hint: AtomicU8,
    wakeup: Wakeup,
}

impl Handshake {
    fn load(&self, ordering: Ordering) -> ProgressHint {
        ProgressHint::from_repr(self.hint.load(ordering))
    }

    /// Switch unconditionally
    fn switch_to(&self, desired: ProgressHint) -> SwitchProgressHintOk {
        let previous_state = ProgressHint::from_repr(self.hint.swap(desired as u8, Ordering::AcqRel));
        if previous_state == desired {
            SwitchProgressHintOk::Ignored
        } else {
            SwitchProgressHintOk::Accepted { previous_state }
        }
    }

    /// Switch only if the current hint matches the expected one
    fn switch_from(&self, expected: ProgressHint, desired: ProgressHint) -> SwitchProgressHintResult {
        self.hint
            .compare_exchange(
                expected as u8,
                desired as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| SwitchProgressHintOk::Accepted {
                previous_state: expected,
            })
            .or_else(|current| {
                let current_state = ProgressHint::from_repr(current);
                if current_state == desired {
                    Ok(SwitchProgressHintOk::Ignored)
                } else {
                    Err(SwitchProgressHintError::Rejected { current_state })
                }
            })
    }

    fn wake_up_if_accepted(&self, result: SwitchProgressHintResult) -> SwitchProgressHintResult {
        if let Ok(SwitchProgressHintOk::Accepted { .. }) = result {
            self.wakeup.notify();
        }
        result
    }
}

/// Sending side of the handshake
///
/// Cheap to clone. Does not keep the receiver alive.
#[derive(Debug, Clone)]
pub struct ProgressHintSender {
    handshake: Weak<Handshake>,
}

impl ProgressHintSender {
    #[must_use]
    pub fn attach(rx: &ProgressHintReceiver) -> Self {
        Self {
            handshake: Arc::downgrade(&rx.handshake),
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.handshake.strong_count() > 0
    }

    fn switch(
        &self,
        switch: impl FnOnce(&Handshake) -> SwitchProgressHintResult,
    ) -> SwitchProgressHintResult {
        let handshake = self
            .handshake
            .upgrade()
            .ok_or(SwitchProgressHintError::Detached)?;
        handshake.wake_up_if_accepted(switch(&handshake))
    }

    /// Ask a running worker to suspend
    pub fn suspend(&self) -> SwitchProgressHintResult {
        self.switch(|handshake| handshake.switch_from(ProgressHint::Continue, ProgressHint::Suspend))
    }

    /// Ask a suspended worker to continue
    pub fn resume(&self) -> SwitchProgressHintResult {
        self.switch(|handshake| handshake.switch_from(ProgressHint::Suspend, ProgressHint::Continue))
    }

    /// Ask the worker to finish, regardless of whether it is
    /// running or suspended
    pub fn finish(&self) -> SwitchProgressHintResult {
        self.switch(|handshake| Ok(handshake.switch_to(ProgressHint::Finish)))
    }
}

/// Receiving side of the handshake, owned by the worker thread
#[derive(Debug, Default)]
pub struct ProgressHintReceiver {
    handshake: Arc<Handshake>,
}

impl ProgressHintReceiver {
    /// Relaxed read for polling in a tight loop
    #[must_use]
    pub fn peek(&self) -> ProgressHint {
        self.handshake.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn load(&self) -> ProgressHint {
        self.handshake.load(Ordering::Acquire)
    }

    /// Park until the hint has been changed or the timeout expired
    ///
    /// Returns `true` if a change has been signaled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => {
                self.handshake.wakeup.wait();
                true
            }
        }
    }

    /// Park until the hint has been changed or the deadline expired
    ///
    /// Returns `true` if a change has been signaled.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.handshake.wakeup.wait_until(deadline)
    }

    /// Switch to [`ProgressHint::Suspend`] on behalf of the worker
    ///
    /// Fails if finishing has been requested in the meantime.
    pub(crate) fn try_suspending(&mut self) -> bool {
        self.handshake
            .switch_from(ProgressHint::Continue, ProgressHint::Suspend)
            .is_ok()
    }

    /// Park while [`ProgressHint::Suspend`]
    ///
    /// Returns the hint that ended the suspension.
    pub(crate) fn wait_while_suspending(&mut self) -> ProgressHint {
        loop {
            let hint = self.load();
            if hint != ProgressHint::Suspend {
                return hint;
            }
            self.handshake.wakeup.wait();
        }
    }

    /// Switch to [`ProgressHint::Finish`] on behalf of the worker
    pub(crate) fn try_finishing(&mut self) -> bool {
        self.handshake.switch_to(ProgressHint::Finish);
        true
    }

    /// Start over with a fresh handshake
    ///
    /// All senders that have been attached before are detached.
    pub fn detach(&mut self) {
        self.handshake = Default::default();
    }
}
