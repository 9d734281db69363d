// Per-entity mutual exclusion
//
// One async mutex per entity currently being worked on. Entries are dropped
// as soon as nobody holds or waits for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

use crate::model::TechnicalId;

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
pub struct EntityLocks {
    slots: Mutex<HashMap<TechnicalId, Slot>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<TechnicalId, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for exclusive access to `technical_id`
    pub async fn lock(&self, technical_id: TechnicalId) -> EntityGuard<'_> {
        let slot = self.table().entry(technical_id).or_default().clone();
        // Created before the wait so a cancelled caller still prunes its entry
        let mut entry = EntityGuard {
            locks: self,
            technical_id,
            guard: None,
        };
        entry.guard = Some(slot.lock_owned().await);
        entry
    }

    /// Entities currently locked or waited on
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

pub struct EntityGuard<'a> {
    locks: &'a EntityLocks,
    technical_id: TechnicalId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.locks.table();
        if table
            .get(&self.technical_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            table.remove(&self.technical_id);
        }
    }
}
