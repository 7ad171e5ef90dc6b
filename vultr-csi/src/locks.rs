//! Keyed mutual exclusion for volume operations.
//!
//! The controller serializes state-changing calls per volume id (or per name
//! while creating) and rejects a second caller instead of queueing it, so the
//! orchestrator's own retry loop drives recovery. The node side uses the same
//! table but waits, because two calls for one staging path only need to be
//! ordered around the mount table check.
//!
//! A key is released when its [`KeyGuard`] drops, which covers early returns,
//! dropped futures (client cancellation, deadline expiry) and panics.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

/// A set of currently held keys.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<String>>,
    released: Notify,
}

/// Proof that a key is held. Dropping it releases the key.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned set only means another holder panicked while inserting or
    // removing; the set itself is still consistent.
    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take `key` if nobody holds it, without waiting.
    pub fn try_acquire(&self, key: &str) -> Option<KeyGuard<'_>> {
        if self.held().insert(key.to_string()) {
            Some(KeyGuard {
                locks: self,
                key: key.to_string(),
            })
        } else {
            None
        }
    }

    /// Take `key`, waiting for the current holder to release it.
    pub async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        loop {
            // Register for the wakeup before checking, so a release between
            // the check and the await is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.try_acquire(key) {
                return guard;
            }
            notified.await;
        }
    }

    /// Whether `key` is currently held.
    pub fn is_held(&self, key: &str) -> bool {
        self.held().contains(key)
    }
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.key);
        self.locks.released.notify_waiters();
    }
}
