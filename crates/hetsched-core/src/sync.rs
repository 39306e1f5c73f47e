use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock, recovering the guard from a poisoned mutex.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
