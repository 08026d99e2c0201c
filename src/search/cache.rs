//! Sharded LRU cache of fused rankings.
//!
//! Entries are keyed by a SHA-256 fingerprint of everything that determines
//! a ranking, index version included, and the whole cache is dropped when a
//! new version is published.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::{FieldKind, IndexVersion};

use super::fusion::Ranking;
use super::query::BugQuery;
use super::weights::{AbsentFieldPolicy, FieldWeights};

/// Stable hash of the inputs of one ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(
        query: &BugQuery,
        weights: &FieldWeights,
        policy: AbsentFieldPolicy,
        n: usize,
        version: IndexVersion,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(version.value().to_le_bytes());
        hasher.update((n as u64).to_le_bytes());
        hasher.update(policy.as_str().as_bytes());

        for (field, text) in query.field_texts() {
            hasher.update([field.tag()]);
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        // Field separator so texts can never run into the weights
        hasher.update([0xff]);
        for field in FieldKind::ALL {
            hasher.update(weights.get(field).to_bits().to_le_bytes());
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn shard(&self, shards: usize) -> usize {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        (u64::from_le_bytes(head) % shards as u64) as usize
    }
}

struct CachedRanking {
    version: IndexVersion,
    ranking: Arc<Ranking>,
}

/// Hit/miss counters and occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache split into independently locked shards.
pub struct ResultCache {
    shards: Vec<Mutex<LruCache<Fingerprint, CachedRanking>>>,
    capacity: usize,
    /// Rankings older than this version are not admitted
    floor: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("shards", &self.shards.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ResultCache {
    /// `capacity` is spread over `shards`; both are raised to at least 1.
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shards = shards.clamp(1, capacity.max(1));
        let per_shard = NonZeroUsize::new(capacity.max(1).div_ceil(shards)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shards).map(|_| Mutex::new(LruCache::new(per_shard))).collect(),
            capacity: per_shard.get() * shards,
            floor: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached ranking for `key`, only if it was computed against `version`.
    pub fn get(&self, key: &Fingerprint, version: IndexVersion) -> Option<Arc<Ranking>> {
        let mut shard = self.shards[key.shard(self.shards.len())].lock();
        let cached = shard
            .get(key)
            .map(|entry| (entry.version, Arc::clone(&entry.ranking)));
        let found = match cached {
            Some((cached_version, ranking)) if cached_version == version => Some(ranking),
            Some(_) => {
                shard.pop(key);
                None
            }
            None => None,
        };
        drop(shard);

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Stores `ranking` unless its version was already superseded. Returns
    /// whether it was stored.
    pub fn put(&self, key: Fingerprint, ranking: Arc<Ranking>) -> bool {
        let mut shard = self.shards[key.shard(self.shards.len())].lock();
        // Floor is read under the shard lock; advance_to raises it before clearing
        if ranking.version.value() < self.floor.load(Ordering::SeqCst) {
            return false;
        }
        let entry = CachedRanking {
            version: ranking.version,
            ranking,
        };
        shard.put(key, entry);
        true
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Called when `version` is published: later puts of older rankings are
    /// refused and every entry is dropped.
    pub fn advance_to(&self, version: IndexVersion) {
        self.floor.fetch_max(version.value(), Ordering::SeqCst);
        self.invalidate_all();
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
        }
    }
}
