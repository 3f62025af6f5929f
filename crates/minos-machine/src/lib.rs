//! minos simulated machine.
//!
//! This crate provides the "hardware" half of the minos teaching-OS
//! simulation: a cooperative single-logical-processor machine that the
//! coordination primitives in `minos-threads` are built on.
//!
//! - **[`machine`]** -- the [`Machine`] itself: interrupt disable/restore,
//!   the simulated timer (tick counter plus a periodic interrupt handler),
//!   and [`Machine::run`] which adopts the calling OS thread as the
//!   simulated `main` thread.
//! - **[`scheduler`]** -- the cooperative scheduler: spawn, yield, block,
//!   ready, and join. Exactly one simulated thread executes at any instant;
//!   each simulated thread is backed by a real OS thread parked on a
//!   [`crossbeam::sync::Parker`] until it is handed the run token.
//! - **[`thread`]** -- [`ThreadHandle`], the cheaply cloneable identity of a
//!   simulated thread.
//! - **[`lock`]** -- [`Lock`], a kernel mutex with ownership tracking and
//!   direct FIFO handoff, built from the block/ready primitives.
//! - **[`config`]** -- [`MachineConfig`] tuning knobs (timer interval, tick
//!   accounting, idle bound).
//! - **[`error`]** -- typed machine errors via [`thiserror`].
//!
//! Simulated time advances only at context-switch points, so a run of the
//! same program observes the same interleaving every time.

pub mod config;
pub mod error;
pub mod lock;
pub mod machine;
pub mod scheduler;
pub mod thread;

pub use config::MachineConfig;
pub use error::{MachineError, Result};
pub use lock::Lock;
pub use machine::Machine;
pub use thread::{ThreadHandle, ThreadId, ThreadStatus};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock an internal mutex, ignoring poison: a panicking simulated thread
/// (contract violations abort by panicking) must not wedge the scheduler
/// state while the panic unwinds through [`Machine::run`].
pub(crate) fn hold<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
