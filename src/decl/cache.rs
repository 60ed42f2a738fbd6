//! LRU cache of extracted declaration lists, keyed by source file path
use super::symbol::DeclarationSymbol;
use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_CAPACITY: usize = 50;

/// Declarations of one file, in extraction order.
pub type SymbolList = Arc<Vec<Arc<DeclarationSymbol>>>;

struct Entry {
    symbols: SymbolList,
    last_access: Instant,
}

/// Bounded map from file path to that file's declarations.
///
/// One lock covers the whole structure, including eviction. Lookups that
/// serve a search refresh the entry's recency; inserting a new key at
/// capacity drops the least recently used entry.
pub struct DeclarationCache {
    entries: Mutex<LruCache<PathBuf, Entry>>,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub symbols: usize,
}

impl Default for DeclarationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DeclarationCache {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached declarations for `path`, marking the entry as just used.
    pub fn get(&self, path: &Path) -> Option<SymbolList> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(path)?;
        entry.last_access = Instant::now();
        Some(Arc::clone(&entry.symbols))
    }

    /// Like [`get`](Self::get) without touching recency.
    pub fn peek(&self, path: &Path) -> Option<SymbolList> {
        self.entries
            .lock()
            .peek(path)
            .map(|entry| Arc::clone(&entry.symbols))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains(path)
    }

    /// Store the declarations of `path`. Returns the key evicted to make room,
    /// if any.
    pub fn insert(&self, path: PathBuf, symbols: Vec<Arc<DeclarationSymbol>>) -> Option<PathBuf> {
        let mut entries = self.entries.lock();

        let evicted = if !entries.contains(&path) && entries.len() >= self.capacity {
            entries.pop_lru().map(|(key, entry)| {
                debug!(
                    "Evicting declarations of {} (idle {:?})",
                    key.display(),
                    entry.last_access.elapsed()
                );
                key
            })
        } else {
            None
        };

        entries.put(
            path,
            Entry {
                symbols: Arc::new(symbols),
                last_access: Instant::now(),
            },
        );
        evicted
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.entries.lock().pop(path).is_some()
    }

    /// Mark `path` as just used. Returns whether it was cached.
    pub fn touch(&self, path: &Path) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(path) {
            Some(entry) => {
                entry.last_access = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Key that the next insertion at capacity would evict.
    pub fn least_recently_used(&self) -> Option<PathBuf> {
        self.entries.lock().peek_lru().map(|(key, _)| key.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            capacity: self.capacity,
            symbols: entries.iter().map(|(_, entry)| entry.symbols.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{SymbolKind, SymbolLocator};

    fn symbols(file: &str, names: &[&str]) -> Vec<Arc<DeclarationSymbol>> {
        names
            .iter()
            .map(|name| {
                Arc::new(DeclarationSymbol::new(
                    name.to_string(),
                    name.to_string(),
                    String::new(),
                    SymbolKind::Class,
                    SymbolLocator::Structural {
                        file: PathBuf::from(file),
                        start: None,
                    },
                ))
            })
            .collect()
    }

    fn key(i: usize) -> PathBuf {
        PathBuf::from(format!("/src/file{i}.cpp"))
    }

    #[test]
    fn test_insert_and_get() {
        let cache = DeclarationCache::new(4);
        assert!(cache.insert(key(1), symbols("/src/file1.cpp", &["A", "B"])).is_none());

        let list = cache.get(&key(1)).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "A");
        assert!(cache.get(&key(2)).is_none());
    }

    #[test]
    fn test_eviction_removes_least_recently_used() {
        let cache = DeclarationCache::new(3);
        for i in 0..3 {
            cache.insert(key(i), Vec::new());
        }
        assert_eq!(cache.least_recently_used(), Some(key(0)));

        // Touching 0 makes 1 the eviction candidate.
        assert!(cache.get(&key(0)).is_some());
        assert_eq!(cache.insert(key(3), Vec::new()), Some(key(1)));
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&key(0)));
        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn test_peek_does_not_touch() {
        let cache = DeclarationCache::new(2);
        cache.insert(key(0), Vec::new());
        cache.insert(key(1), Vec::new());
        assert!(cache.peek(&key(0)).is_some());
        assert_eq!(cache.insert(key(2), Vec::new()), Some(key(0)));
    }

    #[test]
    fn test_reinsert_same_key_does_not_evict() {
        let cache = DeclarationCache::new(2);
        cache.insert(key(0), Vec::new());
        cache.insert(key(1), Vec::new());
        assert!(cache
            .insert(key(0), symbols("/src/file0.cpp", &["X"]))
            .is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&key(0)).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_touch_and_stats() {
        let cache = DeclarationCache::default();
        assert_eq!(cache.capacity(), DEFAULT_CAPACITY);
        cache.insert(key(0), symbols("/a", &["A", "B", "C"]));
        cache.insert(key(1), symbols("/b", &["D"]));

        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 2,
                capacity: DEFAULT_CAPACITY,
                symbols: 4
            }
        );
        assert!(cache.touch(&key(0)));
        assert_eq!(cache.least_recently_used(), Some(key(1)));
        assert!(cache.remove(&key(1)));
        assert!(!cache.remove(&key(1)));
        assert!(!cache.touch(&key(1)));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = DeclarationCache::new(0);
        cache.insert(key(0), Vec::new());
        assert_eq!(cache.insert(key(1), Vec::new()), Some(key(0)));
        assert_eq!(cache.len(), 1);
    }
}
