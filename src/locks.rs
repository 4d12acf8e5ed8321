//! # Conversation Lock Module
//!
//! Serializes writers of the same conversation. The customer engine, provider
//! actions and admin actions all take the lock of an order's conversation key around
//! their find-then-mutate-then-persist section, so two near-simultaneous events can
//! neither create two orders nor apply conflicting transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::ConversationKey;

/// Registry of per-conversation async mutexes
///
/// Entries are created on first use and dropped again by [`ConversationLocks::prune`]
/// once nobody holds or waits for them.
#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<ConversationKey, Arc<AsyncMutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to a conversation
    ///
    /// The guard must be dropped before any notification is sent.
    pub async fn lock(&self, key: ConversationKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }

    /// Remove entries that are neither held nor awaited
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before - locks.len();
        if removed > 0 {
            tracing::trace!(removed, "Pruned idle conversation locks");
        }
    }

    /// Number of tracked conversations
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
