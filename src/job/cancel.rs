use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag shared between a job's owner and its worker.
///
/// Cloning gives another handle on the same flag. Workers and collaborators
/// poll it at their suspension points (between chunks, between reads of a
/// subprocess output) and stop on their own.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Return `err()` if cancellation was requested
    pub fn check<E, F: FnOnce() -> E>(&self, err: F) -> Result<(), E> {
        if self.is_canceled() {
            Err(err())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(other.check(|| ()).is_ok());

        token.cancel();
        assert!(other.is_canceled());
        assert_eq!(other.check(|| "stop"), Err("stop"));
    }
}
