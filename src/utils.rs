use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait MutexUtils<T> {
    /// Lock a mutex and execute a function with its lock.
    /// This makes sure that the mutex is locked only during the function execution.
    ///
    /// A poisoned mutex is still entered: a panicking worker must not take
    /// the whole queue down with it.
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R;
}

impl<T> MutexUtils<T> for Mutex<T> {
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R,
    {
        f(self.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Remove the characters that cannot appear in a file name on common platforms
pub fn sanitize_filename(name: &str) -> String {
    name.split(['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches('.')
        .to_owned()
}
