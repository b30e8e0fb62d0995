//! Bounded admission for uncached requests

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Limits how many live (uncached) requests may be in flight at once.
///
/// Clones share the same permits. A gate built with [`ConcurrencyGate::unbounded`]
/// admits everything immediately.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGate {
    semaphore: Option<Arc<Semaphore>>,
}

/// Admission to the gate; released when dropped
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    /// A gate admitting at most `max` requests at once
    ///
    /// A limit of zero would never admit anything, so it is read as unbounded.
    pub fn new(max: usize) -> Self {
        if max == 0 {
            return Self::unbounded();
        }
        Self {
            semaphore: Some(Arc::new(Semaphore::new(max))),
        }
    }

    pub fn unbounded() -> Self {
        Self { semaphore: None }
    }

    /// `None` and `Some(0)` mean unbounded
    pub fn from_limit(max: Option<usize>) -> Self {
        match max {
            Some(max) => Self::new(max),
            None => Self::unbounded(),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.semaphore.is_some()
    }

    /// Permits currently free, or `None` for an unbounded gate
    pub fn available_permits(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Waits for admission
    pub async fn acquire(&self) -> GatePermit {
        let permit = match self.semaphore {
            // The semaphore is never closed, so acquisition cannot fail
            Some(ref semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        GatePermit { _permit: permit }
    }

    /// Blocks the current thread until admitted
    ///
    /// Must not be called from inside an async task.
    pub fn acquire_blocking(&self) -> GatePermit {
        futures::executor::block_on(self.acquire())
    }
}
