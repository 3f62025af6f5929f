//! Simulated thread identity and lifecycle.
//!
//! A simulated thread is backed by a real OS thread that spends its life
//! parked on a [`crossbeam::sync::Parker`], waking only while it holds the
//! machine's run token. [`ThreadHandle`] is the cheap, cloneable identity
//! the scheduler and the coordination primitives pass around.

use std::fmt;
use std::sync::{Arc, Mutex};

use crossbeam::sync::{Parker, Unparker};
use serde::{Deserialize, Serialize};

use crate::hold;

/// Identifier of a simulated thread, unique within one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub(crate) u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Lifecycle state of a simulated thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created but never scheduled.
    New,
    /// Sitting on the ready queue.
    Ready,
    /// Holding the run token.
    Running,
    /// Suspended; waiting to be readied.
    Blocked,
    /// Ran to completion. Terminal.
    Finished,
}

/// Cheaply cloneable handle to a simulated thread.
#[derive(Clone)]
pub struct ThreadHandle {
    inner: Arc<ThreadInner>,
}

struct ThreadInner {
    id: ThreadId,
    name: String,
    status: Mutex<ThreadStatus>,
    wake: Mutex<WakeSlot>,
    joiners: Mutex<Vec<ThreadHandle>>,
}

/// One-shot resume capability for the backing OS thread.
///
/// The scheduler may try to wake a freshly spawned thread before its OS
/// thread has registered an [`Unparker`]; `pending` records that early wake
/// so registration can replay it.
struct WakeSlot {
    unparker: Option<Unparker>,
    pending: bool,
}

impl ThreadHandle {
    pub(crate) fn new(id: ThreadId, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id,
                name: name.into(),
                status: Mutex::new(ThreadStatus::New),
                wake: Mutex::new(WakeSlot {
                    unparker: None,
                    pending: false,
                }),
                joiners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Machine-local identifier of this thread.
    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    /// Name given at spawn time.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ThreadStatus {
        *hold(&self.inner.status)
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        *hold(&self.inner.status) = status;
    }

    /// Bind the calling OS thread's parker to this handle. Replays a wake
    /// that arrived before registration.
    pub(crate) fn register_unparker(&self, unparker: Unparker) {
        let mut slot = hold(&self.inner.wake);
        let replay = slot.pending;
        slot.pending = false;
        slot.unparker = Some(unparker);
        drop(slot);
        if replay {
            self.wake();
        }
    }

    /// Hand the run token to this thread's backing OS thread.
    pub(crate) fn wake(&self) {
        let mut slot = hold(&self.inner.wake);
        match &slot.unparker {
            Some(unparker) => unparker.unpark(),
            None => slot.pending = true,
        }
    }

    /// Park the calling OS thread until this thread is scheduled again.
    pub(crate) fn park_until_running(&self, parker: &Parker) {
        while self.status() != ThreadStatus::Running {
            parker.park();
        }
    }

    pub(crate) fn push_joiner(&self, joiner: ThreadHandle) {
        hold(&self.inner.joiners).push(joiner);
    }

    pub(crate) fn take_joiners(&self) -> Vec<ThreadHandle> {
        std::mem::take(&mut hold(&self.inner.joiners))
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.name, self.inner.id)
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}
