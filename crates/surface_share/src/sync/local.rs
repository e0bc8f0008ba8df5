//! In-process stand-in for the OS named primitives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{NamedCounter, NamedLock, SyncBackend, SyncError};

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct LockSlot {
    owner: Mutex<Option<u64>>,
    freed: Condvar,
}

#[derive(Default)]
struct Tables {
    locks: HashMap<String, Arc<LockSlot>>,
    counters: HashMap<String, Arc<AtomicU64>>,
}

/// Named locks and counters shared by every clone of this value.
#[derive(Clone, Default)]
pub struct LocalSync {
    tables: Arc<Mutex<Tables>>,
}

impl LocalSync {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SyncBackend for LocalSync {
    type Lock = LocalLock;
    type Counter = LocalCounter;

    fn open_lock(&self, name: &str) -> Result<LocalLock, SyncError> {
        let slot = self.tables().locks.entry(name.to_owned()).or_default().clone();
        Ok(LocalLock {
            slot,
            holder: NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn open_counter(&self, name: &str) -> Result<LocalCounter, SyncError> {
        let value = self
            .tables()
            .counters
            .entry(name.to_owned())
            .or_default()
            .clone();
        Ok(LocalCounter { value })
    }
}

/// One opened handle to a named lock. Each handle is a distinct holder.
pub struct LocalLock {
    slot: Arc<LockSlot>,
    holder: u64,
}

impl LocalLock {
    fn owner(&self) -> MutexGuard<'_, Option<u64>> {
        self.slot.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NamedLock for LocalLock {
    fn try_acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut owner = self.owner();
        loop {
            match *owner {
                None => {
                    *owner = Some(self.holder);
                    return true;
                }
                Some(id) if id == self.holder => return true,
                Some(_) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            owner = self
                .slot
                .freed
                .wait_timeout(owner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn release(&self) {
        let mut owner = self.owner();
        if *owner == Some(self.holder) {
            *owner = None;
            self.slot.freed.notify_all();
        }
    }
}

impl Drop for LocalLock {
    // Mirrors an abandoned OS mutex: a holder that goes away frees the lock.
    fn drop(&mut self) {
        self.release();
    }
}

pub struct LocalCounter {
    value: Arc<AtomicU64>,
}

impl NamedCounter for LocalCounter {
    fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn read(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}
