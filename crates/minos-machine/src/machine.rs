//! The simulated machine: interrupts, timer, and the simulation entry point.
//!
//! # Time model
//!
//! The machine keeps a monotonic tick counter. Time advances in exactly two
//! places: by [`MachineConfig::switch_ticks`] each time interrupts go from
//! disabled back to enabled (every context-switch point passes through
//! that transition), and in jumps to the next timer boundary when the
//! scheduler has no runnable thread. A registered timer handler is invoked
//! each time the counter crosses a multiple of
//! [`MachineConfig::timer_interval`].
//!
//! # Interrupt delivery
//!
//! The timer handler never runs while interrupts are disabled. A yield
//! requested from inside the handler is deferred until the handler
//! returns, then honored; when the handler was run from the idle loop
//! there is no runnable thread to preempt and the request is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::MachineConfig;
use crate::error::{MachineError, Result};
use crate::thread::{ThreadHandle, ThreadId, ThreadStatus};
use crate::{hold, scheduler};

pub(crate) type TimerHandler = Arc<dyn Fn() + Send + Sync>;

/// The shared scheduler state. This single lock is what realizes the
/// "non-blocking critical section" on a multi-threaded host: the interrupt
/// flag it guards gates timer delivery, and because exactly one simulated
/// thread holds the run token, a disabled-interrupt section is atomic from
/// the simulated program's point of view.
pub(crate) struct SchedState {
    pub(crate) ready: VecDeque<ThreadHandle>,
    pub(crate) current: Option<ThreadHandle>,
    pub(crate) int_enabled: bool,
    /// True while the timer handler is executing.
    pub(crate) in_interrupt: bool,
    /// A yield was requested from inside the timer handler.
    pub(crate) yield_on_return: bool,
    pub(crate) ticks: u64,
    /// Next tick at which the timer interrupt fires.
    pub(crate) next_timer_due: u64,
    pub(crate) ran: bool,
}

pub(crate) struct MachineInner {
    pub(crate) config: MachineConfig,
    pub(crate) sched: Mutex<SchedState>,
    pub(crate) timer_handler: Mutex<Option<TimerHandler>>,
    pub(crate) next_thread_id: AtomicU64,
    /// Every thread ever registered, for shutdown and deadlock diagnostics.
    pub(crate) threads: Mutex<Vec<ThreadHandle>>,
}

/// A cooperative single-logical-processor machine.
///
/// Cheaply cloneable (`Arc`-backed); clones share one simulation.
#[derive(Clone)]
pub struct Machine {
    pub(crate) inner: Arc<MachineInner>,
}

impl Machine {
    /// Create a machine with the given configuration.
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        Self {
            inner: Arc::new(MachineInner {
                config,
                sched: Mutex::new(SchedState {
                    ready: VecDeque::new(),
                    current: None,
                    int_enabled: false,
                    in_interrupt: false,
                    yield_on_return: false,
                    ticks: 0,
                    next_timer_due: config.timer_interval,
                    ran: false,
                }),
                timer_handler: Mutex::new(None),
                next_thread_id: AtomicU64::new(0),
                threads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The configuration this machine was built with.
    pub fn config(&self) -> &MachineConfig {
        &self.inner.config
    }

    /// Current value of the simulated tick counter.
    pub fn ticks(&self) -> u64 {
        hold(&self.inner.sched).ticks
    }

    /// Register the periodic timer interrupt handler.
    ///
    /// The machine drives exactly one handler; a second registration is
    /// rejected.
    pub fn set_timer_handler(&self, handler: impl Fn() + Send + Sync + 'static) -> Result<()> {
        let mut slot = hold(&self.inner.timer_handler);
        if slot.is_some() {
            return Err(MachineError::TimerHandlerRegistered);
        }
        *slot = Some(Arc::new(handler));
        Ok(())
    }

    /// Save the interrupt flag and disable preemption. Returns the prior
    /// state, to be handed back to [`Machine::restore_interrupts`].
    pub fn disable_interrupts(&self) -> bool {
        let mut s = hold(&self.inner.sched);
        let prev = s.int_enabled;
        s.int_enabled = false;
        prev
    }

    /// Restore the interrupt flag saved by [`Machine::disable_interrupts`].
    ///
    /// Re-enabling charges the context-switch tick cost and delivers a
    /// pending timer interrupt, so this is the only point (besides the idle
    /// loop) where the timer handler can run.
    pub fn restore_interrupts(&self, prev: bool) {
        if !prev {
            return;
        }
        let mut s = hold(&self.inner.sched);
        s.int_enabled = true;
        s.ticks += self.inner.config.switch_ticks;
        self.deliver_timer_if_due(s);
    }

    /// True while preemption is enabled.
    pub fn interrupts_enabled(&self) -> bool {
        hold(&self.inner.sched).int_enabled
    }

    /// Run a simulated program, adopting the calling OS thread as the
    /// `main` simulated thread. Returns the closure's value.
    ///
    /// Threads spawned by `f` and never joined are still parked when `f`
    /// returns; they are reported and abandoned.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        {
            let s = hold(&self.inner.sched);
            if s.ran {
                return Err(MachineError::AlreadyRan);
            }
        }
        let main = self.register_thread("main");
        {
            let mut s = hold(&self.inner.sched);
            s.ran = true;
            s.int_enabled = true;
            s.current = Some(main.clone());
        }
        main.set_status(ThreadStatus::Running);
        scheduler::register_current_parker(&main);
        tracing::debug!(thread = %main, "simulation started");

        let out = f();

        main.set_status(ThreadStatus::Finished);
        for th in hold(&self.inner.threads).iter() {
            if th.status() != ThreadStatus::Finished {
                tracing::warn!(thread = %th, status = ?th.status(), "thread abandoned at shutdown");
            }
        }
        tracing::debug!(ticks = self.ticks(), "simulation finished");
        Ok(out)
    }

    /// Handle of the currently running simulated thread.
    ///
    /// # Panics
    ///
    /// Panics when called outside [`Machine::run`].
    pub fn current_thread(&self) -> ThreadHandle {
        hold(&self.inner.sched)
            .current
            .clone()
            .expect("current_thread() called outside Machine::run")
    }

    pub(crate) fn register_thread(&self, name: &str) -> ThreadHandle {
        let id = ThreadId(self.inner.next_thread_id.fetch_add(1, Ordering::Relaxed));
        let handle = ThreadHandle::new(id, name);
        hold(&self.inner.threads).push(handle.clone());
        tracing::trace!(thread = %handle, "thread registered");
        handle
    }

    /// Deliver the timer interrupt if the counter has crossed the next
    /// boundary. Takes the scheduler guard by value so the handler runs
    /// with the lock released.
    fn deliver_timer_if_due(&self, mut s: std::sync::MutexGuard<'_, SchedState>) {
        if s.in_interrupt || !s.int_enabled || s.ticks < s.next_timer_due {
            return;
        }
        let Some(handler) = hold(&self.inner.timer_handler).clone() else {
            // No alarm installed; skip this boundary.
            let interval = self.inner.config.timer_interval;
            while s.next_timer_due <= s.ticks {
                s.next_timer_due += interval;
            }
            return;
        };
        s.in_interrupt = true;
        s.int_enabled = false;
        s.next_timer_due += self.inner.config.timer_interval;
        let ticks = s.ticks;
        drop(s);

        tracing::trace!(ticks, "timer interrupt");
        handler();

        let mut s = hold(&self.inner.sched);
        s.in_interrupt = false;
        s.int_enabled = true;
        let deferred_yield = s.yield_on_return;
        s.yield_on_return = false;
        drop(s);
        if deferred_yield {
            self.yield_now();
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}
