//! Caller-owned LRU cache of buffer sets

use crate::{BufferMode, BufferOutcome, BufferStyle, Crs, Layer};
use lru::LruCache;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Identity of one generated buffer set
///
/// The layer part is a content fingerprint, so editing any road id or coordinate
/// produces a different key and stale entries are simply never hit again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCacheKey {
    layer_fingerprint: u64,
    crs: Crs,
    distance_bits: u64,
    style_fingerprint: u64,
    mode: BufferMode,
}

impl BufferCacheKey {
    pub fn new(
        roads: &Layer,
        crs: Crs,
        distance: f64,
        style: &BufferStyle,
        mode: BufferMode,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        style.cap.hash(&mut hasher);
        style.join.hash(&mut hasher);
        style.arc_segments.hash(&mut hasher);
        style.mitre_limit.to_bits().hash(&mut hasher);

        Self {
            layer_fingerprint: roads.fingerprint(),
            crs,
            distance_bits: distance.to_bits(),
            style_fingerprint: hasher.finish(),
            mode,
        }
    }
}

/// LRU cache mapping [`BufferCacheKey`]s to generated buffers
pub struct BufferCache {
    inner: LruCache<BufferCacheKey, Arc<BufferOutcome>>,
    hits: u64,
    misses: u64,
}

impl BufferCache {
    /// Create a new cache holding up to `capacity` buffer sets (at least one)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(cap),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a buffer set, marking it as recently used
    pub fn get(&mut self, key: &BufferCacheKey) -> Option<Arc<BufferOutcome>> {
        match self.inner.get(key) {
            Some(outcome) => {
                self.hits += 1;
                Some(Arc::clone(outcome))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: BufferCacheKey, outcome: Arc<BufferOutcome>) {
        self.inner.put(key, outcome);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Number of buffer sets currently cached
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop all entries; hit and miss counters are kept
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl std::fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferCache")
            .field("len", &self.inner.len())
            .field("cap", &self.inner.cap())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}
