//! Per-container serialization of destructive operations.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct IdentityLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held for the duration of one operation on a container id.
pub struct IdentityGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other operation holds `id`.
    pub async fn acquire(&self, id: &str) -> IdentityGuard {
        let mutex = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        IdentityGuard {
            key: id.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of ids currently held or awaited.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        // release before pruning so the strong count only reflects the table and waiters
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
