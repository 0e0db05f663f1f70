use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::dns::{Name, RecordClass};

use super::keys::KeyEntry;

struct CacheSlot {
    entry: KeyEntry,
    expires_at: u64,
}

/// Short-term memoization of per-zone KeyEntries across requests, keyed by
/// (owner, class). Entries live up to their originating TTL; expiry is
/// checked on read, so stale slots simply fall out on access or via LRU
/// pressure.
pub struct KeyCache {
    inner: Mutex<LruCache<(Name, RecordClass), CacheSlot>>,
    bad_ttl: u64,
}

impl KeyCache {
    pub fn new(capacity: usize, bad_ttl: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        KeyCache {
            inner: Mutex::new(LruCache::new(capacity)),
            bad_ttl,
        }
    }

    pub fn get(&self, name: &Name, class: RecordClass, now: u64) -> Option<KeyEntry> {
        let mut cache = self.inner.lock();
        let key = (name.clone(), class);
        let expired = match cache.get(&key) {
            Some(slot) if slot.expires_at > now => {
                trace!(zone = %name, "key cache hit");
                return Some(slot.entry.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            trace!(zone = %name, "key cache entry expired");
            cache.pop(&key);
        }
        None
    }

    pub fn put(&self, entry: KeyEntry, now: u64) {
        let ttl = if entry.is_bad() {
            // Bad entries are kept only briefly to avoid revalidation thrash
            self.bad_ttl.min(entry.ttl() as u64)
        } else {
            entry.ttl() as u64
        };
        if ttl == 0 {
            return;
        }
        let key = (entry.name().clone(), entry.class());
        self.inner.lock().put(
            key,
            CacheSlot {
                entry,
                expires_at: now + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
