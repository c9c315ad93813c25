//! Per-record access coordination.
//!
//! Cooperative read/write locks keyed by record id: any number of
//! concurrent readers per id, one writer at a time. A writer first
//! waits out any active writer, then waits for current readers to
//! drain; readers arriving while a writer waits queue behind it so the
//! writer cannot starve. Unrelated ids never contend.
//!
//! Waiting uses condition variables, not yield loops. Guards release on
//! drop, so a cancelled streaming read releases its lock with it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct LockState {
    readers: usize,
    writer_active: bool,
    writers_waiting: usize,
}

struct IdLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl IdLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }
}

/// Coordinator of per-id read/write locks.
pub struct AccessManager {
    locks: Mutex<HashMap<u64, Arc<IdLock>>>,
}

impl Default for AccessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: u64) -> Arc<IdLock> {
        let mut locks = self.locks.lock();
        locks.entry(id).or_insert_with(|| Arc::new(IdLock::new())).clone()
    }

    /// Acquire a shared read lock on `id`, blocking while a writer is
    /// active or waiting.
    pub fn read(&self, id: u64) -> ReadGuard {
        let lock = self.lock_for(id);
        {
            let mut state = lock.state.lock();
            while state.writer_active || state.writers_waiting > 0 {
                lock.cond.wait(&mut state);
            }
            state.readers += 1;
        }
        ReadGuard { lock }
    }

    /// Acquire the exclusive write lock on `id`, blocking until any
    /// active writer finishes and all readers drain.
    pub fn write(&self, id: u64) -> WriteGuard {
        let lock = self.lock_for(id);
        {
            let mut state = lock.state.lock();
            state.writers_waiting += 1;
            while state.writer_active || state.readers > 0 {
                lock.cond.wait(&mut state);
            }
            state.writers_waiting -= 1;
            state.writer_active = true;
        }
        WriteGuard { lock }
    }
}

/// Shared read access to one record id; released on drop.
pub struct ReadGuard {
    lock: Arc<IdLock>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.cond.notify_all();
        }
    }
}

/// Exclusive write access to one record id; released on drop.
pub struct WriteGuard {
    lock: Arc<IdLock>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.writer_active = false;
        self.lock.cond.notify_all();
    }
}
