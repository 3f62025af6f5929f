//! Timer-driven sleep.
//!
//! [`Alarm`] owns the machine's periodic timer interrupt. It keeps an
//! ordered set of pending wakeups and, on every interrupt, readies each
//! thread whose deadline has elapsed before forcing the running thread to
//! yield. The yield happens whether or not anything was due, which is what
//! gives the simulation periodic preemption.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};

use minos_machine::{Machine, Result, ThreadHandle};

use crate::{contract, hold};

/// One requested wakeup.
///
/// Ordered by `(deadline, seq)`; the per-alarm sequence counter breaks
/// deadline ties in scheduling order, so two threads that ask to wake at
/// the same tick resume in the order they asked.
struct PendingWakeup {
    deadline: u64,
    seq: u64,
    thread: ThreadHandle,
}

impl PendingWakeup {
    fn key(&self) -> (u64, u64) {
        (self.deadline, self.seq)
    }
}

impl PartialEq for PendingWakeup {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingWakeup {}

impl PartialOrd for PendingWakeup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingWakeup {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

struct AlarmState {
    pending: BTreeSet<PendingWakeup>,
    next_seq: u64,
}

/// Lets threads sleep until a deadline measured in simulated ticks.
pub struct Alarm {
    machine: Machine,
    state: Mutex<AlarmState>,
}

impl Alarm {
    /// Create the alarm and claim the machine's timer interrupt.
    ///
    /// Fails if a timer handler is already registered; a machine supports
    /// one alarm.
    pub fn new(machine: &Machine) -> Result<Arc<Self>> {
        let alarm = Arc::new(Self {
            machine: machine.clone(),
            state: Mutex::new(AlarmState {
                pending: BTreeSet::new(),
                next_seq: 0,
            }),
        });
        let weak: Weak<Alarm> = Arc::downgrade(&alarm);
        machine.set_timer_handler(move || {
            if let Some(alarm) = weak.upgrade() {
                alarm.on_timer_tick();
            }
        })?;
        Ok(alarm)
    }

    /// Suspend the calling thread for at least `x` ticks.
    ///
    /// The thread is readied during the first timer interrupt at which
    /// `current_tick >= request_tick + x`, never earlier. A zero delay is a
    /// fatal contract violation.
    pub fn wait_until(&self, x: u64) {
        let me = self.machine.current_thread();
        contract(x > 0, &me, "Alarm::wait_until requires a positive tick delay");

        // Insert and suspend inside one interrupt-disabled section, so the
        // deadline cannot fire before the thread is actually suspended.
        let prev = self.machine.disable_interrupts();
        let deadline = self.machine.ticks() + x;
        {
            let mut st = hold(&self.state);
            let seq = st.next_seq;
            st.next_seq += 1;
            st.pending.insert(PendingWakeup {
                deadline,
                seq,
                thread: me.clone(),
            });
        }
        tracing::trace!(thread = %me, deadline, "waiting for alarm");
        self.machine.sleep_current();
        self.machine.restore_interrupts(prev);
    }

    /// Timer interrupt handler: ready every thread whose deadline has
    /// elapsed, then preempt the running thread.
    ///
    /// Draining all due entries (rather than the earliest only) bounds
    /// wake latency at one timer interval past the deadline.
    fn on_timer_tick(&self) {
        let now = self.machine.ticks();
        loop {
            let due = {
                let mut st = hold(&self.state);
                let is_due = st.pending.first().is_some_and(|p| p.deadline <= now);
                if is_due { st.pending.pop_first() } else { None }
            };
            let Some(wakeup) = due else { break };
            tracing::trace!(thread = %wakeup.thread, deadline = wakeup.deadline, now, "alarm fired");
            self.machine.ready(&wakeup.thread);
        }
        self.machine.yield_now();
    }
}
