//! Machine configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for a [`crate::Machine`].
///
/// All values are in simulated ticks. The defaults reproduce the classic
/// teaching-OS timings: a timer interrupt roughly every 500 ticks and a
/// 10-tick charge per context switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Ticks between timer interrupts.
    pub timer_interval: u64,

    /// Ticks charged each time interrupts go from disabled to enabled,
    /// i.e. at every context-switch point. Zero is allowed: time then
    /// advances only when the scheduler idles, which makes it possible to
    /// issue several alarm requests at the exact same tick.
    pub switch_ticks: u64,

    /// How many consecutive timer intervals the scheduler may fast-forward
    /// through with every thread blocked before the run is declared
    /// deadlocked and aborted.
    pub max_idle_intervals: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            timer_interval: 500,
            switch_ticks: 10,
            max_idle_intervals: 1024,
        }
    }
}
