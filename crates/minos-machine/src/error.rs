//! Machine error types.
//!
//! Recoverable failures surface through [`MachineError`]. Contract
//! violations by simulated programs (releasing a lock that is not held,
//! sleeping without disabling interrupts, a zero alarm delay) are *not*
//! errors: they are fatal programming mistakes and abort the run with a
//! panic naming the offending thread.

/// Unified error type for the simulated machine.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    /// A timer interrupt handler is already registered. The machine drives
    /// a single handler; two alarms cannot share one timer.
    #[error("a timer interrupt handler is already registered")]
    TimerHandlerRegistered,

    /// [`crate::Machine::run`] was called a second time. A machine runs
    /// exactly one simulation; build a fresh machine for the next one.
    #[error("this machine has already run a simulation")]
    AlreadyRan,

    /// The backing OS thread for a simulated thread could not be spawned.
    #[error("failed to spawn backing OS thread for `{name}`")]
    SpawnFailed {
        /// Name of the simulated thread that could not be created.
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the machine crate.
pub type Result<T> = std::result::Result<T, MachineError>;
