//! Country to shard map with lock-free reads.
//!
//! ```text
//! ShardRegistry
//!   slots: RwLock<HashMap<country, Arc<CountrySlot>>>   (lookup / insert only)
//!     CountrySlot
//!       shard:      ArcSwapOption<PartitionShard>       (atomic pointer swap)
//!       write_lock: Mutex<()>                           (one writer per country)
//! ```
//!
//! Readers take an `Arc` snapshot of the current shard and never block
//! writers. Writers for one country build the replacement while holding
//! that country's lock and publish it with a single store, so a failed
//! build leaves the published shard untouched. Writers for different
//! countries never wait on each other.

use crate::shard::PartitionShard;
use arc_swap::ArcSwapOption;
use geoknn_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct CountrySlot {
    shard: ArcSwapOption<PartitionShard>,
    write_lock: Mutex<()>,
}

#[derive(Default)]
pub struct ShardRegistry {
    slots: RwLock<HashMap<String, Arc<CountrySlot>>>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the shard currently installed for `country`
    pub fn get(&self, country: &str) -> Option<Arc<PartitionShard>> {
        self.slots.read().get(country).and_then(|slot| slot.shard.load_full())
    }

    fn slot(&self, country: &str) -> Arc<CountrySlot> {
        if let Some(slot) = self.slots.read().get(country) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(country.to_string())
            .or_default()
            .clone()
    }

    /// Build and install a shard for `country`.
    ///
    /// `build` runs under the country's writer lock and receives the shard
    /// it is about to replace. If it fails nothing is installed.
    pub fn install<F>(&self, country: &str, build: F) -> Result<Arc<PartitionShard>>
    where
        F: FnOnce(Option<Arc<PartitionShard>>) -> Result<PartitionShard>,
    {
        let slot = self.slot(country);
        let guard = slot.write_lock.lock();
        match build(slot.shard.load_full()) {
            Ok(shard) => {
                let next = Arc::new(shard);
                slot.shard.store(Some(next.clone()));
                Ok(next)
            }
            Err(e) => {
                drop(guard);
                self.release_if_unused(country, &slot);
                Err(e)
            }
        }
    }

    /// Drop a slot that never received a shard once no other writer holds it
    fn release_if_unused(&self, country: &str, slot: &Arc<CountrySlot>) {
        let mut slots = self.slots.write();
        let ours = slots.get(country).is_some_and(|s| Arc::ptr_eq(s, slot));
        // Clones are only taken under the map lock, so the count is stable here
        if ours && slot.shard.load().is_none() && Arc::strong_count(slot) == 2 {
            slots.remove(country);
        }
    }

    /// Replace an installed shard with `update(current)`.
    /// Fails with `CountryNotLoaded` when nothing is installed.
    pub fn update<F>(&self, country: &str, update: F) -> Result<Arc<PartitionShard>>
    where
        F: FnOnce(&PartitionShard) -> Result<PartitionShard>,
    {
        let slot = self
            .slots
            .read()
            .get(country)
            .cloned()
            .ok_or_else(|| Error::CountryNotLoaded(country.to_string()))?;
        let _guard = slot.write_lock.lock();
        let current = slot
            .shard
            .load_full()
            .ok_or_else(|| Error::CountryNotLoaded(country.to_string()))?;
        let next = Arc::new(update(&current)?);
        slot.shard.store(Some(next.clone()));
        Ok(next)
    }

    /// Countries with an installed shard, sorted
    pub fn countries(&self) -> Vec<String> {
        let mut countries: Vec<String> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.shard.load().is_some())
            .map(|(country, _)| country.clone())
            .collect();
        countries.sort();
        countries
    }

    pub fn len(&self) -> usize {
        self.countries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoknn_core::{EmbeddingStore, HnswParams, IndexKind, Metric, SimilarityIndex};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn shard(country: &str, value: f32) -> PartitionShard {
        let store = EmbeddingStore::from_records(1, vec![(1u64, [value]), (2, [value + 1.0])]).unwrap();
        let index =
            SimilarityIndex::build(&store, &store.ids(), IndexKind::Flat, Metric::Dot, HnswParams::default())
                .unwrap();
        PartitionShard::new(country, store, index)
    }

    #[test]
    fn test_install_and_get() {
        let registry = ShardRegistry::new();
        assert!(registry.get("FR").is_none());
        registry.install("FR", |prev| {
            assert!(prev.is_none());
            Ok(shard("FR", 1.0))
        })
        .unwrap();
        assert_eq!(registry.get("FR").unwrap().country(), "FR");
        assert_eq!(registry.countries(), vec!["FR".to_string()]);
    }

    #[test]
    fn test_failed_install_keeps_previous() {
        let registry = ShardRegistry::new();
        registry.install("FR", |_| Ok(shard("FR", 1.0))).unwrap();
        let before = registry.get("FR").unwrap();

        let result = registry.install("FR", |_| Err(Error::IndexCorrupt("bad".into())));
        assert!(result.is_err());
        assert!(Arc::ptr_eq(&before, &registry.get("FR").unwrap()));

        // A failed first load leaves the country absent
        assert!(registry.install("DE", |_| Err(Error::IndexCorrupt("bad".into()))).is_err());
        assert!(registry.get("DE").is_none());
        assert_eq!(registry.countries(), vec!["FR".to_string()]);
    }

    #[test]
    fn test_failed_first_install_leaves_no_slot() {
        let registry = ShardRegistry::new();
        for country in ["DE", "FRR", "de"] {
            assert!(registry.install(country, |_| Err(Error::IndexCorrupt("bad".into()))).is_err());
        }
        assert!(registry.slots.read().is_empty());

        registry.install("FR", |_| Ok(shard("FR", 1.0))).unwrap();
        assert!(registry.install("FR", |_| Err(Error::IndexCorrupt("bad".into()))).is_err());
        assert_eq!(registry.slots.read().len(), 1);
        assert!(registry.get("FR").is_some());
    }

    #[test]
    fn test_failed_install_keeps_slot_for_waiting_writer() {
        let registry = Arc::new(ShardRegistry::new());
        let barrier = Arc::new(Barrier::new(2));

        let failing = {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                registry.install("FR", |_| {
                    barrier.wait();
                    // Let the second writer queue on the slot lock
                    thread::sleep(Duration::from_millis(30));
                    Err(Error::IndexCorrupt("bad".into()))
                })
            })
        };
        barrier.wait();
        registry.install("FR", |_| Ok(shard("FR", 2.0))).unwrap();
        assert!(failing.join().unwrap().is_err());

        assert_eq!(registry.get("FR").unwrap().store().get(1), Some(&[2.0][..]));
        assert_eq!(registry.countries(), vec!["FR".to_string()]);
    }

    #[test]
    fn test_update_requires_installed_shard() {
        let registry = ShardRegistry::new();
        assert!(matches!(
            registry.update("FR", |_| Ok(shard("FR", 1.0))),
            Err(Error::CountryNotLoaded(_))
        ));
        let _ = registry.install("FR", |_| Err(Error::IndexCorrupt("bad".into())));
        assert!(matches!(
            registry.update("FR", |_| Ok(shard("FR", 1.0))),
            Err(Error::CountryNotLoaded(_))
        ));
    }

    #[test]
    fn test_reader_keeps_old_snapshot() {
        let registry = ShardRegistry::new();
        registry.install("FR", |_| Ok(shard("FR", 1.0))).unwrap();
        let old = registry.get("FR").unwrap();
        registry.install("FR", |_| Ok(shard("FR", 5.0))).unwrap();

        assert_eq!(old.store().get(1), Some(&[1.0][..]));
        assert_eq!(registry.get("FR").unwrap().store().get(1), Some(&[5.0][..]));
    }

    #[test]
    fn test_different_countries_do_not_block() {
        let registry = Arc::new(ShardRegistry::new());
        let barrier = Arc::new(Barrier::new(2));

        // Both builders must be inside their build closures at the same
        // time for the barrier to release.
        let handles: Vec<_> = ["FR", "DE"]
            .into_iter()
            .map(|country| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    registry
                        .install(country, |_| {
                            barrier.wait();
                            Ok(shard(country, 1.0))
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.countries(), vec!["DE".to_string(), "FR".to_string()]);
    }

    #[test]
    fn test_same_country_serializes() {
        let registry = Arc::new(ShardRegistry::new());
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                let active = active.clone();
                thread::spawn(move || {
                    registry
                        .install("FR", |_| {
                            let inside = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            assert_eq!(inside, 0, "two builders ran at once");
                            thread::sleep(Duration::from_millis(10));
                            active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                            Ok(shard("FR", i as f32))
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(registry.get("FR").is_some());
    }

    #[test]
    fn test_update_and_install_serialize() {
        let registry = Arc::new(ShardRegistry::new());
        registry.install("FR", |_| Ok(shard("FR", 0.0))).unwrap();
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let enter = |active: &std::sync::atomic::AtomicUsize| {
            let inside = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            assert_eq!(inside, 0, "update and install overlapped");
            thread::sleep(Duration::from_millis(10));
            active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        };

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let registry = registry.clone();
                let active = active.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        registry
                            .update("FR", |current| {
                                assert_eq!(current.country(), "FR");
                                enter(&*active);
                                Ok(shard("FR", 100.0 + i as f32))
                            })
                            .unwrap();
                    } else {
                        registry
                            .install("FR", |_| {
                                enter(&*active);
                                Ok(shard("FR", i as f32))
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(active.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(registry.get("FR").is_some());
    }
}
