//! Per-run keyed locks
//!
//! Selecting and creating the instance of one action type in one run must not
//! interleave with another delivery to the same pair. Different runs and
//! different action types never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// (anchor guid, governance action type guid)
pub type RunKey = (Uuid, Uuid);

#[derive(Default)]
pub struct RunLocks {
    slots: Mutex<HashMap<RunKey, Arc<AsyncMutex<()>>>>,
}

/// Held while one (anchor, type) pair is being worked on
pub struct RunGuard<'a> {
    locks: &'a RunLocks,
    key: RunKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, anchor_guid: Uuid, action_type_guid: Uuid) -> RunGuard<'_> {
        let key = (anchor_guid, action_type_guid);
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key).or_default().clone()
        };

        let guard = slot.lock_owned().await;
        RunGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of pairs currently locked or waited on
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();

        // Only the map still references the slot: nobody is waiting
        if slots
            .get(&self.key)
            .map_or(false, |slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}
