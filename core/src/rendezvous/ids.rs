//! Numeric mailbox IDs handed to senders.
//!
//! `bind` returns the smallest positive integer not currently in use, so
//! passwords stay short on a quiet server.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Concurrent registry of IDs in use.
#[derive(Debug, Clone, Default)]
pub struct IdSet {
    in_use: Arc<Mutex<BTreeSet<u64>>>,
}

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the lowest unused ID (>= 1).
    pub fn bind(&self) -> u64 {
        let mut in_use = self.in_use.lock();
        let mut candidate = 1;
        // Sorted, so the first gap is the answer
        for &id in in_use.iter() {
            if id != candidate {
                break;
            }
            candidate += 1;
        }
        in_use.insert(candidate);
        candidate
    }

    /// Make `id` available again. Releasing an unknown ID is a no-op.
    pub fn release(&self, id: u64) {
        self.in_use.lock().remove(&id);
    }

    /// Reserve an ID that is released when the lease is dropped.
    pub fn lease(&self) -> IdLease {
        IdLease {
            id: self.bind(),
            set: self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.in_use.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.lock().is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.in_use.lock().contains(&id)
    }
}

/// An ID held for the lifetime of one sender connection.
#[derive(Debug)]
pub struct IdLease {
    id: u64,
    set: IdSet,
}

impl IdLease {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for IdLease {
    fn drop(&mut self) {
        self.set.release(self.id);
        tracing::debug!("Released id {}", self.id);
    }
}

// ============================================================================
// TESTS
// ============================================================================
