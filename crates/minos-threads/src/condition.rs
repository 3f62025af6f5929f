//! Condition variable built from raw suspend/resume.
//!
//! [`Condition`] provides wait/signal/broadcast over an associated
//! [`Lock`] without any native condition-variable primitive underneath:
//! just interrupt-disabled critical sections and the machine's
//! block/ready operations.
//!
//! The `sleep` ordering is the one race-free sequence: the waiter enqueues
//! itself *while still holding the lock*, so a concurrent `signal` (which
//! requires the same lock) cannot run before the waiter is queued, and it
//! suspends inside a disabled-interrupt section, so the wakeup cannot land
//! between release and suspension.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use minos_machine::{Lock, Machine, ThreadHandle};

use crate::{contract, hold};

/// A condition variable tied to one [`Lock`].
///
/// Callers must hold the lock across every operation; violating that is
/// fatal. Waiters are woken in FIFO order but reacquire the lock one at a
/// time as the scheduler runs them.
pub struct Condition {
    lock: Arc<Lock>,
    waiters: Mutex<VecDeque<ThreadHandle>>,
}

impl Condition {
    /// Create a condition variable associated with `lock`.
    #[must_use]
    pub fn new(lock: Arc<Lock>) -> Self {
        Self {
            lock,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    fn machine(&self) -> &Machine {
        self.lock.machine()
    }

    /// Atomically release the associated lock and suspend until another
    /// thread signals this condition. The lock is reacquired before
    /// returning.
    pub fn sleep(&self) {
        let machine = self.machine().clone();
        let me = machine.current_thread();
        contract(
            self.lock.is_held_by_current_thread(),
            &me,
            "Condition::sleep requires holding the associated Lock",
        );

        // Enqueue first, still holding the lock: no signal can miss us.
        hold(&self.waiters).push_back(me.clone());
        tracing::trace!(thread = %me, "sleeping on condition");

        let prev = machine.disable_interrupts();
        self.lock.release();
        machine.sleep_current();
        machine.restore_interrupts(prev);
        self.lock.acquire();
    }

    /// Wake the earliest waiter, if any. A signal with no waiters is a
    /// no-op, not an error.
    pub fn signal(&self) {
        let machine = self.machine().clone();
        let me = machine.current_thread();
        contract(
            self.lock.is_held_by_current_thread(),
            &me,
            "Condition::signal requires holding the associated Lock",
        );

        let prev = machine.disable_interrupts();
        if let Some(waiter) = hold(&self.waiters).pop_front() {
            tracing::trace!(waiter = %waiter, "condition signaled");
            machine.ready(&waiter);
        }
        machine.restore_interrupts(prev);
    }

    /// Wake every current waiter, in FIFO order.
    pub fn broadcast(&self) {
        let machine = self.machine().clone();
        let me = machine.current_thread();
        contract(
            self.lock.is_held_by_current_thread(),
            &me,
            "Condition::broadcast requires holding the associated Lock",
        );

        while !hold(&self.waiters).is_empty() {
            self.signal();
        }
    }
}
