//! Cooperative scheduler.
//!
//! Exactly one simulated thread executes at any instant. A context switch
//! is a direct handoff: the outgoing thread marks the incoming one running,
//! unparks its backing OS thread, and parks itself. The ready queue is
//! FIFO; there is no priority or fairness policy beyond arrival order.
//!
//! The atomic enqueue+suspend and dequeue+ready transitions the
//! coordination primitives depend on come from the rule that every switch
//! point runs with interrupts disabled: the timer handler cannot observe a
//! thread that is enqueued but not yet suspended.

use crossbeam::sync::Parker;

use crate::error::{MachineError, Result};
use crate::hold;
use crate::machine::Machine;
use crate::thread::{ThreadHandle, ThreadStatus};

std::thread_local! {
    /// Parker of the backing OS thread, created lazily per OS thread.
    static PARKER: Parker = Parker::new();
}

/// Bind the calling OS thread's parker to a simulated thread handle.
pub(crate) fn register_current_parker(thread: &ThreadHandle) {
    PARKER.with(|p| thread.register_unparker(p.unparker().clone()));
}

fn park_current(thread: &ThreadHandle) {
    PARKER.with(|p| thread.park_until_running(p));
}

/// What becomes of the outgoing thread at a switch point.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Back onto the ready queue.
    Yield,
    /// Suspended until readied.
    Block,
    /// Terminal; the backing OS thread exits.
    Finish,
}

impl Machine {
    /// Create a simulated thread running `f` and place it on the ready
    /// queue. The backing OS thread parks until first scheduled.
    pub fn spawn(&self, name: impl Into<String>, f: impl FnOnce() + Send + 'static) -> Result<ThreadHandle> {
        let name = name.into();
        let handle = self.register_thread(&name);
        let machine = self.clone();
        let th = handle.clone();

        std::thread::Builder::new()
            .name(format!("{}#{}", name, handle.id()))
            .spawn(move || {
                register_current_parker(&th);
                park_current(&th);
                // First schedule: enable interrupts the way the switch-out
                // path of an established thread would have.
                machine.restore_interrupts(true);
                f();
                machine.finish_current();
            })
            .map_err(|source| MachineError::SpawnFailed {
                name: name.clone(),
                source,
            })?;

        let prev = self.disable_interrupts();
        self.ready(&handle);
        self.restore_interrupts(prev);
        tracing::trace!(thread = %handle, "thread spawned");
        Ok(handle)
    }

    /// Voluntarily relinquish the processor, staying runnable.
    ///
    /// Inside the timer handler this only records the request; the machine
    /// performs the switch once the handler returns.
    pub fn yield_now(&self) {
        {
            let mut s = hold(&self.inner.sched);
            if s.in_interrupt {
                s.yield_on_return = true;
                return;
            }
        }
        let prev = self.disable_interrupts();
        self.switch_current(Disposition::Yield);
        self.restore_interrupts(prev);
    }

    /// Suspend the calling thread until another thread readies it. Never
    /// returns early; there are no spurious wakeups.
    ///
    /// Interrupts must be disabled by the caller, making the caller's
    /// enqueue-then-suspend sequence atomic.
    pub fn sleep_current(&self) {
        assert!(
            !self.interrupts_enabled(),
            "sleep_current() requires interrupts disabled"
        );
        self.switch_current(Disposition::Block);
    }

    /// Mark a blocked (or never-run) thread ready. No-op for a thread that
    /// is already ready, running, or finished.
    ///
    /// Interrupts must be disabled by the caller so that the dequeue+ready
    /// transition it is part of stays atomic.
    pub fn ready(&self, thread: &ThreadHandle) {
        let mut s = hold(&self.inner.sched);
        assert!(!s.int_enabled, "ready() requires interrupts disabled");
        match thread.status() {
            ThreadStatus::Blocked | ThreadStatus::New => {
                thread.set_status(ThreadStatus::Ready);
                s.ready.push_back(thread.clone());
                tracing::trace!(thread = %thread, "thread readied");
            }
            ThreadStatus::Ready | ThreadStatus::Running | ThreadStatus::Finished => {}
        }
    }

    /// Block until `thread` finishes. Callable any number of times, from
    /// any thread except `thread` itself.
    pub fn join(&self, thread: &ThreadHandle) {
        let me = self.current_thread();
        assert!(me.id() != thread.id(), "a thread cannot join itself");
        let prev = self.disable_interrupts();
        while thread.status() != ThreadStatus::Finished {
            thread.push_joiner(me.clone());
            self.sleep_current();
        }
        self.restore_interrupts(prev);
    }

    /// Terminate the calling simulated thread: ready its joiners and hand
    /// the processor off for good.
    pub(crate) fn finish_current(&self) {
        let me = self.current_thread();
        // Not restored; the thread resumed by the final switch re-enables
        // on its own wake path.
        let _ = self.disable_interrupts();
        for joiner in me.take_joiners() {
            self.ready(&joiner);
        }
        tracing::trace!(thread = %me, "thread finished");
        self.switch_current(Disposition::Finish);
    }

    /// The context switch. Interrupts must be disabled.
    ///
    /// When the ready queue is empty the machine fast-forwards simulated
    /// time to successive timer boundaries so pending alarms can fire; a
    /// run that stays idle past the configured bound is deadlocked.
    fn switch_current(&self, disposition: Disposition) {
        let me = self.current_thread();
        let mut s = hold(&self.inner.sched);
        debug_assert!(!s.int_enabled);

        match disposition {
            Disposition::Yield => {
                me.set_status(ThreadStatus::Ready);
                s.ready.push_back(me.clone());
            }
            Disposition::Block => me.set_status(ThreadStatus::Blocked),
            Disposition::Finish => me.set_status(ThreadStatus::Finished),
        }

        let mut idle_intervals = 0u64;
        let next = loop {
            if let Some(next) = s.ready.pop_front() {
                break next;
            }

            // Every thread is suspended. Only a timer interrupt can ready
            // one, so jump straight to the next boundary and deliver it.
            let Some(handler) = hold(&self.inner.timer_handler).clone() else {
                drop(s);
                self.deadlock_abort("all threads blocked and no timer handler registered");
            };
            idle_intervals += 1;
            if idle_intervals > self.inner.config.max_idle_intervals {
                drop(s);
                self.deadlock_abort("idled past the configured timer-interval bound");
            }

            s.ticks = s.ticks.max(s.next_timer_due);
            s.next_timer_due += self.inner.config.timer_interval;
            s.in_interrupt = true;
            let ticks = s.ticks;
            drop(s);

            tracing::trace!(ticks, "idle: delivering timer interrupt");
            handler();

            s = hold(&self.inner.sched);
            s.in_interrupt = false;
            // A yield requested by the handler has no runnable current
            // thread to preempt here.
            s.yield_on_return = false;
        };

        next.set_status(ThreadStatus::Running);
        s.current = Some(next.clone());
        drop(s);

        if next.id() == me.id() {
            return;
        }
        tracing::trace!(from = %me, to = %next, "context switch");
        next.wake();
        if disposition == Disposition::Finish {
            return;
        }
        park_current(&me);
    }

    fn deadlock_abort(&self, reason: &str) -> ! {
        let blocked: Vec<String> = hold(&self.inner.threads)
            .iter()
            .filter(|th| th.status() == ThreadStatus::Blocked)
            .map(|th| th.to_string())
            .collect();
        panic!("deadlock: {reason}; blocked threads: {blocked:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Arc<Mutex<Vec<String>>>, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    #[test]
    fn spawn_and_join_runs_to_completion() {
        let machine = Machine::default();
        let events = log();
        let ev = Arc::clone(&events);
        machine
            .run(|| {
                let th = machine
                    .spawn("worker", move || push(&ev, "worker ran"))
                    .unwrap();
                machine.join(&th);
                assert_eq!(th.status(), ThreadStatus::Finished);
            })
            .unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["worker ran"]);
    }

    #[test]
    fn yield_rotates_fifo() {
        let machine = Machine::default();
        let events = log();
        machine
            .run(|| {
                let mut handles = Vec::new();
                for name in ["a", "b"] {
                    let ev = Arc::clone(&events);
                    let m = machine.clone();
                    handles.push(
                        machine
                            .spawn(name, move || {
                                for _ in 0..2 {
                                    push(&ev, name);
                                    m.yield_now();
                                }
                            })
                            .unwrap(),
                    );
                }
                for th in &handles {
                    machine.join(th);
                }
            })
            .unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn join_after_finish_returns_immediately() {
        let machine = Machine::default();
        machine
            .run(|| {
                let th = machine.spawn("quick", || ()).unwrap();
                machine.join(&th);
                machine.join(&th);
            })
            .unwrap();
    }

    #[test]
    fn multiple_joiners_all_resume() {
        let machine = Machine::default();
        let events = log();
        machine
            .run(|| {
                let slow = machine.spawn("slow", || ()).unwrap();
                let mut watchers = Vec::new();
                for name in ["w1", "w2"] {
                    let ev = Arc::clone(&events);
                    let m = machine.clone();
                    let target = slow.clone();
                    watchers.push(
                        machine
                            .spawn(name, move || {
                                m.join(&target);
                                push(&ev, name);
                            })
                            .unwrap(),
                    );
                }
                for th in &watchers {
                    machine.join(th);
                }
            })
            .unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["w1", "w2"]);
    }

    #[test]
    #[should_panic(expected = "deadlock")]
    fn blocking_everyone_aborts() {
        let machine = Machine::default();
        let _ = machine.run(|| {
            machine.disable_interrupts();
            machine.sleep_current();
        });
    }
}
