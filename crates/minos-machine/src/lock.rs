//! Kernel mutex with ownership tracking.
//!
//! Unlike a host mutex, [`Lock`] suspends the simulated calling thread and
//! hands ownership directly to the earliest waiter on release (FIFO
//! handoff). Direct handoff means a thread woken out of `acquire` already
//! owns the lock; no other thread can barge in between release and wake.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::hold;
use crate::machine::Machine;
use crate::thread::ThreadHandle;

struct LockState {
    holder: Option<ThreadHandle>,
    waiters: VecDeque<ThreadHandle>,
}

/// A sleeping mutex for simulated threads.
pub struct Lock {
    machine: Machine,
    state: Mutex<LockState>,
}

impl Lock {
    /// Create a lock on the given machine.
    #[must_use]
    pub fn new(machine: &Machine) -> Self {
        Self {
            machine: machine.clone(),
            state: Mutex::new(LockState {
                holder: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Machine this lock belongs to.
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Acquire the lock, suspending until it is available. Not reentrant.
    pub fn acquire(&self) {
        let me = self.machine.current_thread();
        let prev = self.machine.disable_interrupts();
        let mut st = hold(&self.state);
        match &st.holder {
            None => {
                st.holder = Some(me.clone());
                drop(st);
            }
            Some(holder) => {
                assert!(
                    holder.id() != me.id(),
                    "contract violation on thread `{}`: Lock is not reentrant",
                    me.name()
                );
                st.waiters.push_back(me.clone());
                drop(st);
                tracing::trace!(thread = %me, "waiting for lock");
                self.machine.sleep_current();
                // Direct handoff: release() made us the holder before
                // readying us.
                debug_assert!(self.is_held_by_current_thread());
            }
        }
        self.machine.restore_interrupts(prev);
    }

    /// Release the lock, waking the earliest waiter if any.
    pub fn release(&self) {
        let me = self.machine.current_thread();
        assert!(
            self.is_held_by_current_thread(),
            "contract violation on thread `{}`: released a Lock it does not hold",
            me.name()
        );
        let prev = self.machine.disable_interrupts();
        let mut st = hold(&self.state);
        match st.waiters.pop_front() {
            Some(next) => {
                st.holder = Some(next.clone());
                drop(st);
                self.machine.ready(&next);
            }
            None => {
                st.holder = None;
                drop(st);
            }
        }
        self.machine.restore_interrupts(prev);
    }

    /// Whether the calling simulated thread owns this lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        let me = self.machine.current_thread();
        hold(&self.state)
            .holder
            .as_ref()
            .is_some_and(|holder| holder.id() == me.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn uncontended_acquire_release() {
        let machine = Machine::default();
        machine
            .run(|| {
                let lock = Lock::new(&machine);
                assert!(!lock.is_held_by_current_thread());
                lock.acquire();
                assert!(lock.is_held_by_current_thread());
                lock.release();
                assert!(!lock.is_held_by_current_thread());
            })
            .unwrap();
    }

    #[test]
    fn critical_sections_do_not_interleave() {
        let machine = Machine::default();
        let lock = Arc::new(Lock::new(&machine));
        // Not atomic on purpose: mutual exclusion is what keeps the yield
        // inside the critical section from losing updates.
        let counter = Arc::new(Mutex::new(0u32));
        machine
            .run(|| {
                let mut handles = Vec::new();
                for i in 0..4 {
                    let l = Arc::clone(&lock);
                    let c = Arc::clone(&counter);
                    let m = machine.clone();
                    handles.push(
                        machine
                            .spawn(format!("adder-{i}"), move || {
                                for _ in 0..5 {
                                    l.acquire();
                                    let read = *c.lock().unwrap();
                                    m.yield_now();
                                    *c.lock().unwrap() = read + 1;
                                    l.release();
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
        assert_eq!(*counter.lock().unwrap(), 20);
    }

    #[test]
    fn handoff_is_fifo() {
        let machine = Machine::default();
        let lock = Arc::new(Lock::new(&machine));
        let order = Arc::new(Mutex::new(Vec::new()));
        machine
            .run(|| {
                lock.acquire();
                let mut handles = Vec::new();
                for i in 0..3 {
                    let l = Arc::clone(&lock);
                    let o = Arc::clone(&order);
                    handles.push(
                        machine
                            .spawn(format!("waiter-{i}"), move || {
                                l.acquire();
                                o.lock().unwrap().push(i);
                                l.release();
                            })
                            .unwrap(),
                    );
                }
                // Let every waiter queue up on the lock before releasing.
                for _ in 0..8 {
                    machine.yield_now();
                }
                lock.release();
                for th in &handles {
                    machine.join(th);
                }
            })
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn releasing_unheld_lock_panics() {
        let machine = Machine::default();
        let _ = machine.run(|| {
            let lock = Lock::new(&machine);
            lock.release();
        });
    }
}
