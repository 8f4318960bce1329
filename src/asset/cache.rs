//! Process-wide asset cache with get-or-add semantics
//!
//! Each checksum maps to a single-assignment slot. Concurrent callers asking
//! for the same checksum wait on the same slot, so the factory that fetches
//! the asset runs once and every caller receives the identical asset.
//! Distinct checksums never contend beyond the short map lock.

use crate::asset::Asset;
use crate::checksum::Checksum;
use crate::error::{ReplicaError, ReplicaResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

type Slot = Arc<OnceCell<Asset>>;

/// Hit/miss counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from an existing entry
    pub hits: u64,
    /// Lookups that ran the factory
    pub misses: u64,
    /// Published entries
    pub entries: usize,
}

/// Checksum-keyed store shared by every service instance in the process
#[derive(Default)]
pub struct AssetCache {
    slots: Mutex<HashMap<Checksum, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

static GLOBAL: OnceLock<Arc<AssetCache>> = OnceLock::new();

impl AssetCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used when no explicit cache is supplied
    pub fn global() -> Arc<AssetCache> {
        GLOBAL.get_or_init(|| Arc::new(AssetCache::new())).clone()
    }

    /// Return the asset for `checksum`, running `factory` only if absent
    ///
    /// The factory's asset must hash to `checksum`; anything else is an
    /// integrity failure and is not published. A failed or cancelled factory
    /// leaves no entry behind.
    pub async fn get_or_add<F, Fut>(&self, checksum: Checksum, factory: F) -> ReplicaResult<Asset>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ReplicaResult<Asset>>,
    {
        let slot = self.slot(checksum);
        if let Some(asset) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Asset cache hit: {}", checksum.short());
            return Ok(asset.clone());
        }

        let mut ran = false;
        let result = slot
            .get_or_try_init(|| {
                ran = true;
                async move {
                    let asset = factory().await?;
                    if asset.checksum() != checksum {
                        return Err(ReplicaError::Integrity {
                            expected: checksum,
                            actual: asset.checksum(),
                        });
                    }
                    Ok(asset)
                }
            })
            .await;

        match result {
            Ok(asset) => {
                if ran {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!("Asset cache miss filled: {}", checksum.short());
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(asset.clone())
            }
            Err(e) => {
                self.unlink_empty(checksum, &slot);
                Err(e)
            }
        }
    }

    /// Get a published asset without fetching
    pub fn get(&self, checksum: &Checksum) -> Option<Asset> {
        self.slots
            .lock()
            .get(checksum)
            .and_then(|slot| slot.get().cloned())
    }

    /// Whether an asset has been published for `checksum`
    pub fn contains(&self, checksum: &Checksum) -> bool {
        self.slots
            .lock()
            .get(checksum)
            .is_some_and(|slot| slot.initialized())
    }

    /// Number of published assets
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Whether no asset has been published
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop an entry; the eviction hook for an external policy
    pub fn remove(&self, checksum: &Checksum) -> Option<Asset> {
        let removed = self.slots.lock().remove(checksum);
        removed.and_then(|slot| slot.get().cloned())
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn slot(&self, checksum: Checksum) -> Slot {
        self.slots
            .lock()
            .entry(checksum)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop an empty slot nobody else is waiting on
    ///
    /// Slots are only cloned under the map lock, so a strong count of two
    /// (the map and `slot`) means no other caller can take the slot over.
    /// A slot that still has waiters stays linked so later callers join the
    /// waiter's attempt instead of starting their own.
    fn unlink_empty(&self, checksum: Checksum, slot: &Slot) {
        let mut slots = self.slots.lock();
        let stale = slots.get(&checksum).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if stale {
            slots.remove(&checksum);
        }
    }
}
