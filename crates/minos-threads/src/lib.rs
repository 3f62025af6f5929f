//! minos thread-coordination primitives.
//!
//! The three classic blocking primitives of the minos teaching-OS
//! simulation, built on the raw block/ready/yield surface of
//! [`minos_machine`]:
//!
//! - **[`alarm`]** -- [`Alarm`]: timer-driven sleep; threads suspend until
//!   a requested number of ticks has elapsed.
//! - **[`condition`]** -- [`Condition`]: wait/signal/broadcast over an
//!   associated [`minos_machine::Lock`], implemented with nothing but
//!   interrupt-disabled critical sections and raw suspend/resume.
//! - **[`rendezvous`]** -- [`Rendezvous`]: synchronous one-word exchange
//!   between paired speakers and listeners, built from one lock and four
//!   condition variables.
//!
//! Misusing a primitive (sleeping on a condition without holding its lock,
//! requesting a zero-tick alarm) is a contract violation and aborts the
//! run with a panic naming the offending thread; see the crate-level
//! discussion in [`minos_machine::error`].

pub mod alarm;
pub mod condition;
pub mod rendezvous;

pub use alarm::Alarm;
pub use condition::Condition;
pub use rendezvous::Rendezvous;

use minos_machine::ThreadHandle;

/// Abort on a violated precondition, blaming the calling thread.
pub(crate) fn contract(ok: bool, thread: &ThreadHandle, what: &str) {
    if !ok {
        panic!(
            "contract violation on thread `{}`: {}",
            thread.name(),
            what
        );
    }
}

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock internal state, ignoring poison left behind by a panicking
/// simulated thread.
pub(crate) fn hold<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
