//! Window store abstraction and its in-memory implementations.
//!
//! The engine never reads an entry and writes it back in two steps. Every
//! mutation goes through [`WindowStore::update`], which hands the caller the
//! key's slot while holding that key's lock, so concurrent requests for the
//! same key observe a single linear sequence of counts.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::window::WindowEntry;

/// Storage for per-key window state.
///
/// Implementations backed by an external service must map `update` onto that
/// service's conditional-update primitive to keep the same guarantee.
pub trait WindowStore: Send + Sync {
    /// Run `f` against the slot for `key` atomically with respect to every
    /// other `update` on the same key.
    ///
    /// `None` in the slot means no entry exists. Leaving `Some` stores the
    /// entry, leaving `None` removes it. `f` must not call back into the store.
    fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<WindowEntry>) -> R;

    /// Snapshot of the entry for `key`, expired or not.
    fn get(&self, key: &str) -> Option<WindowEntry>;

    /// Remove every entry whose window ended at or before `now_ms`.
    ///
    /// Live entries are never touched. Returns the number of entries removed.
    fn sweep_expired(&self, now_ms: u64) -> usize;

    /// Number of stored entries, live or stale.
    fn len(&self) -> usize;

    /// Whether the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    fn clear(&self);
}

/// Window store sharded by key hash; requests for different keys rarely
/// contend. This is the default store.
#[derive(Debug, Default)]
pub struct ShardedWindowStore {
    entries: DashMap<String, WindowEntry>,
}

impl ShardedWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for ShardedWindowStore {
    fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<WindowEntry>) -> R,
    {
        // The shard write lock is held for the lifetime of `entry`.
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let mut slot = Some(*occupied.get());
                let result = f(&mut slot);
                match slot {
                    Some(entry) => *occupied.get_mut() = entry,
                    None => {
                        occupied.remove();
                    }
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                let result = f(&mut slot);
                if let Some(entry) = slot {
                    vacant.insert(entry);
                }
                result
            }
        }
    }

    fn get(&self, key: &str) -> Option<WindowEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(now_ms);
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Window store behind one global mutex.
///
/// Simpler than [`ShardedWindowStore`] and adequate for low request rates,
/// but every check serializes on the same lock.
#[derive(Debug, Default)]
pub struct LockedWindowStore {
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl LockedWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for LockedWindowStore {
    fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<WindowEntry>) -> R,
    {
        let mut entries = self.entries.lock();
        let mut slot = entries.get(key).copied();
        let result = f(&mut slot);
        match slot {
            Some(entry) => match entries.get_mut(key) {
                Some(existing) => *existing = entry,
                None => {
                    entries.insert(key.to_owned(), entry);
                }
            },
            None => {
                entries.remove(key);
            }
        }
        result
    }

    fn get(&self, key: &str) -> Option<WindowEntry> {
        self.entries.lock().get(key).copied()
    }

    fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_ms));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn exercise_update<S: WindowStore>(store: &S) {
        // Insert into an empty slot.
        let seen = store.update("a", |slot| {
            let seen = slot.is_some();
            *slot = Some(WindowEntry::open(0, Duration::from_millis(100)));
            seen
        });
        assert!(!seen);
        assert_eq!(store.get("a").map(|e| e.count), Some(1));

        // Mutate in place.
        store.update("a", |slot| {
            if let Some(entry) = slot.as_mut() {
                entry.count += 1;
            }
        });
        assert_eq!(store.get("a").map(|e| e.count), Some(2));

        // Leaving the slot untouched keeps the entry.
        store.update("a", |_| ());
        assert_eq!(store.len(), 1);

        // Clearing the slot removes it.
        store.update("a", |slot| *slot = None);
        assert!(store.get("a").is_none());
        assert!(store.is_empty());

        // A vacant slot left empty does not create an entry.
        store.update("b", |_| ());
        assert!(store.is_empty());
    }

    fn exercise_sweep<S: WindowStore>(store: &S) {
        let window = Duration::from_millis(1_000);
        store.update("stale", |slot| *slot = Some(WindowEntry::open(0, window)));
        store.update("edge", |slot| *slot = Some(WindowEntry::open(500, window)));
        store.update("live", |slot| *slot = Some(WindowEntry::open(1_000, window)));

        // "stale" ends at 1000, "edge" at 1500, "live" at 2000.
        assert_eq!(store.sweep_expired(1_500), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("live"), Some(WindowEntry::open(1_000, window)));

        assert_eq!(store.sweep_expired(1_999), 0);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_sharded_store_update() {
        exercise_update(&ShardedWindowStore::new());
    }

    #[test]
    fn test_locked_store_update() {
        exercise_update(&LockedWindowStore::new());
    }

    #[test]
    fn test_sharded_store_sweep() {
        exercise_sweep(&ShardedWindowStore::new());
    }

    #[test]
    fn test_locked_store_sweep() {
        exercise_sweep(&LockedWindowStore::new());
    }
}
