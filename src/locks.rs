//! Per-name lock table.
//!
//! Resolution of one name is serialized; different names never wait on each
//! other. Entries are kept for the lifetime of the table.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct NameLocks {
    table: DashMap<String, Arc<Mutex<()>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(name);
        let _held = lock.lock();
        f()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.table.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.table
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}
