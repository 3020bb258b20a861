use lru::LruCache;
use std::num::NonZeroUsize;

use super::EntityKind;

const DEFAULT_CAPACITY: usize = 4096;

/// Bounded LRU of resolved entity ids, keyed by `(kind, value)`.
///
/// Owned by a single [`Session`](crate::db::Session). Cleared whenever that
/// session rolls back or reconnects, and after a schema reset, so an id is
/// never served once the row behind it is gone. A capacity of 0 disables
/// caching entirely.
pub struct EntityCache {
    cache: Option<LruCache<(EntityKind, String), i64>>,
}

impl EntityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn get(&mut self, kind: EntityKind, value: &str) -> Option<i64> {
        self.cache
            .as_mut()
            .and_then(|c| c.get(&(kind, value.to_string())).copied())
    }

    pub fn put(&mut self, kind: EntityKind, value: &str, id: i64) {
        if let Some(c) = self.cache.as_mut() {
            c.put((kind, value.to_string()), id);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        if let Some(c) = self.cache.as_mut() {
            c.clear();
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
