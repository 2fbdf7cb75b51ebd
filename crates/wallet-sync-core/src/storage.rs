// Key-value string persistence consumed by the selection reconciler and the
// app's chain selection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Fallible get/set/remove of opaque strings by key.
///
/// Callers treat every error as "nothing stored" or "best-effort write"; an
/// implementation should still report failures so they can be logged.
pub trait PersistenceAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store for tests and ephemeral runs. Counts mutating calls so
/// callers can assert that nothing was written.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` and `remove` calls made so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().expect("memory store mutex poisoned")
    }
}

impl PersistenceAdapter for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn reads_are_not_counted_as_writes() {
        let store = MemoryStore::new();
        let _ = store.get("missing");
        assert_eq!(store.writes(), 0);
    }
}
