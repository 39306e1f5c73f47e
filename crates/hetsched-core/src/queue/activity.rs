//! Wake-up channel idle workers park on.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::config::MachineConfig;
use crate::sync::lock;

/// How many parked workers a push wakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    One,
    All,
}

impl Wakeup {
    /// Wake-up mode for a queue shared by every worker of `machine`.
    ///
    /// With mixed architectures the single woken worker might be unable to
    /// run the job, so every waiter is woken instead.
    pub fn for_shared_queue(machine: &MachineConfig) -> Self {
        if machine.is_heterogeneous() {
            Wakeup::All
        } else {
            Wakeup::One
        }
    }
}

/// A mutex/condition pair signalled when a queue may have become non-empty
/// or when the runtime shuts down.
///
/// Several queues may share one `Activity` (work stealing parks every worker on
/// the same one). The mutex guards no data: waiters check their predicate
/// while holding it, producers take it only to signal, never while holding a
/// queue's storage lock.
#[derive(Debug, Default)]
pub struct Activity {
    mutex: Mutex<()>,
    cond: Condvar,
}

impl Activity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal(&self, wakeup: Wakeup) {
        let _guard = lock(&self.mutex);
        match wakeup {
            Wakeup::One => self.cond.notify_one(),
            Wakeup::All => self.cond.notify_all(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        lock(&self.mutex)
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, ()>) -> MutexGuard<'a, ()> {
        self.cond
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}
