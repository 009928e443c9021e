//! Per-workspace mutual exclusion keyed by directory name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tracing::debug;

/// Lazily grown map of named locks.
///
/// Entries are never evicted; one small mutex per workspace name is retained
/// for the life of the process.
#[derive(Debug, Default)]
pub struct WorkspaceLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the lock for `key`, creating it on first use.
    pub fn handle(&self, key: &str) -> WorkspaceLock {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key, "creating workspace lock");
                Arc::new(Mutex::new(()))
            })
            .clone();
        WorkspaceLock { lock }
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle to one named lock.
#[derive(Debug, Clone)]
pub struct WorkspaceLock {
    lock: Arc<Mutex<()>>,
}

impl WorkspaceLock {
    /// Block until the lock is held.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock only if nobody holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        match self.lock.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn same_key_shares_one_lock() {
        let locks = WorkspaceLocks::new();
        let a = locks.handle("abc");
        let b = locks.handle("abc");
        let _held = a.lock();
        assert!(b.try_lock().is_none());
        assert!(locks.handle("other").try_lock().is_some());
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn lock_serializes_critical_sections() {
        let locks = Arc::new(WorkspaceLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    let handle = locks.handle("ws");
                    let _guard = handle.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
    }
}
