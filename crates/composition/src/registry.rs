//! Id-keyed composition registries.
//!
//! One lock guards the id map. Leases are taken under the read lock and
//! removal checks run under the write lock, so a lease can never be handed
//! out for a composition whose removal has already been validated.
//! Removal by ids is all-or-nothing.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;

use mixcast_common::error::{MixcastError, MixcastResult};

use crate::lease::{CompositionListener, Lease, Leasable};

/// Behaviour shared by video and audio compositions.
pub trait Composition: Leasable + Sized + 'static {
    type Snapshot: Serialize;

    /// Noun used in error messages.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn is_native(&self) -> bool;

    /// Custom and unreferenced.
    fn can_remove(&self) -> bool {
        !self.is_native() && self.ref_counter().count() == 0
    }

    fn lease(
        this: &Arc<Self>,
        listener: Option<Weak<dyn CompositionListener>>,
        holder_tag: &str,
    ) -> Lease<Self>;

    fn serialize(&self) -> MixcastResult<Self::Snapshot>;

    /// Release native resources. Called once the composition has left its
    /// registry.
    fn teardown(&self) -> MixcastResult<()>;
}

/// Compositions of one type, keyed by id.
pub struct CompositionRegistry<C: Composition> {
    items: RwLock<BTreeMap<String, Arc<C>>>,
}

impl<C: Composition> CompositionRegistry<C> {
    /// A registry holding only the native composition.
    pub fn new(native: Arc<C>) -> Self {
        let mut items = BTreeMap::new();
        items.insert(native.id().to_string(), native);
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn insert(&self, item: Arc<C>) {
        let id = item.id().to_string();
        tracing::debug!(kind = C::KIND, id = %id, "Registered composition");
        self.items.write().insert(id, item);
    }

    /// Serialize a freshly built composition and register it. If the
    /// snapshot cannot be taken the composition is torn down instead and
    /// never becomes visible.
    pub fn insert_new(&self, item: Arc<C>) -> MixcastResult<C::Snapshot> {
        match item.serialize() {
            Ok(snapshot) => {
                self.insert(item);
                Ok(snapshot)
            }
            Err(e) => {
                if let Err(teardown) = item.teardown() {
                    tracing::error!(kind = C::KIND, id = %item.id(), error = %teardown, "Teardown failed");
                }
                Err(e)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<C>> {
        self.items.read().get(id).cloned()
    }

    pub fn try_get(&self, id: &str) -> MixcastResult<Arc<C>> {
        self.get(id)
            .ok_or_else(|| MixcastError::not_found(C::KIND, id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<C>> {
        self.items.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Lease the composition `id` for `holder_tag`.
    pub fn acquire(
        &self,
        id: &str,
        listener: Option<Weak<dyn CompositionListener>>,
        holder_tag: &str,
    ) -> MixcastResult<Lease<C>> {
        let items = self.items.read();
        let item = items
            .get(id)
            .ok_or_else(|| MixcastError::not_found(C::KIND, id))?;
        Ok(C::lease(item, listener, holder_tag))
    }

    /// Remove every listed composition, or none of them.
    ///
    /// Fails without removing anything if any id is unknown, native, or
    /// still leased. Removed compositions are torn down after the lock is
    /// released.
    pub fn remove_by_ids(&self, ids: &[String]) -> MixcastResult<Vec<Arc<C>>> {
        let removed = {
            let mut items = self.items.write();
            for id in ids {
                let item = items
                    .get(id)
                    .ok_or_else(|| MixcastError::not_found(C::KIND, id.as_str()))?;
                if item.is_native() {
                    return Err(MixcastError::invariant(format!(
                        "the native {} cannot be removed",
                        C::KIND
                    )));
                }
                let holders = item.ref_counter().count();
                if holders > 0 {
                    return Err(MixcastError::InUse {
                        kind: C::KIND,
                        id: id.clone(),
                        holders,
                    });
                }
            }
            ids.iter()
                .filter_map(|id| items.remove(id))
                .collect::<Vec<_>>()
        };

        for item in &removed {
            if let Err(e) = item.teardown() {
                tracing::error!(kind = C::KIND, id = %item.id(), error = %e, "Teardown failed");
            }
        }
        Ok(removed)
    }

    /// Remove and tear down every custom composition regardless of leases.
    pub fn drain_custom(&self) -> Vec<Arc<C>> {
        let drained: Vec<Arc<C>> = {
            let mut items = self.items.write();
            let ids: Vec<String> = items
                .iter()
                .filter(|(_, item)| !item.is_native())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| items.remove(id)).collect()
        };
        for item in &drained {
            if let Err(e) = item.teardown() {
                tracing::error!(kind = C::KIND, id = %item.id(), error = %e, "Teardown failed");
            }
        }
        drained
    }

    /// Snapshot of every composition. Compositions that fail to serialize
    /// are skipped.
    pub fn serialize_all(&self) -> BTreeMap<String, C::Snapshot> {
        self.all()
            .into_iter()
            .filter_map(|item| match item.serialize() {
                Ok(snapshot) => Some((item.id().to_string(), snapshot)),
                Err(e) => {
                    tracing::warn!(kind = C::KIND, id = %item.id(), error = %e, "Failed to serialize");
                    None
                }
            })
            .collect()
    }
}

impl<C: Composition> std::fmt::Debug for CompositionRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionRegistry")
            .field("kind", &C::KIND)
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::RefCounter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Fake {
        id: String,
        native: bool,
        broken: bool,
        refs: RefCounter,
        teardowns: AtomicUsize,
    }

    impl Fake {
        fn new(id: &str, native: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                native,
                broken: false,
                refs: RefCounter::new(),
                teardowns: AtomicUsize::new(0),
            })
        }
    }

    impl Leasable for Fake {
        fn ref_counter(&self) -> &RefCounter {
            &self.refs
        }
    }

    impl Composition for Fake {
        type Snapshot = String;
        const KIND: &'static str = "fake";

        fn id(&self) -> &str {
            &self.id
        }

        fn is_native(&self) -> bool {
            self.native
        }

        fn lease(
            this: &Arc<Self>,
            listener: Option<Weak<dyn CompositionListener>>,
            holder_tag: &str,
        ) -> Lease<Self> {
            Lease::acquire(Arc::clone(this), listener, holder_tag)
        }

        fn serialize(&self) -> MixcastResult<String> {
            if self.broken {
                return Err(MixcastError::engine("engine thread is gone"));
            }
            Ok(self.id.clone())
        }

        fn teardown(&self) -> MixcastResult<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry() -> CompositionRegistry<Fake> {
        let registry = CompositionRegistry::new(Fake::new("native", true));
        registry.insert(Fake::new("a", false));
        registry.insert(Fake::new("b", false));
        registry
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_remove_is_all_or_nothing() {
        let registry = registry();
        let err = registry.remove_by_ids(&ids(&["a", "missing"])).unwrap_err();
        assert!(matches!(err, MixcastError::NotFound { .. }));
        assert_eq!(registry.len(), 3);

        let removed = registry.remove_by_ids(&ids(&["a", "b"])).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|r| r.teardowns.load(Ordering::SeqCst) == 1));
        assert_eq!(registry.ids(), ["native"]);
    }

    #[test]
    fn test_leased_composition_is_kept() {
        let registry = registry();
        let lease = registry.acquire("a", None, "output:1").unwrap();

        let err = registry.remove_by_ids(&ids(&["b", "a"])).unwrap_err();
        assert!(matches!(err, MixcastError::InUse { holders: 1, .. }));
        assert!(registry.contains("b"));

        drop(lease);
        assert!(registry.remove_by_ids(&ids(&["a"])).is_ok());
    }

    #[test]
    fn test_native_is_never_removable() {
        let registry = registry();
        let err = registry.remove_by_ids(&ids(&["native"])).unwrap_err();
        assert!(matches!(err, MixcastError::Invariant { .. }));
        assert!(!registry.get("native").unwrap().can_remove());
    }

    #[test]
    fn test_drain_custom_keeps_native() {
        let registry = registry();
        assert_eq!(registry.drain_custom().len(), 2);
        assert_eq!(registry.serialize_all().keys().collect::<Vec<_>>(), ["native"]);
    }

    #[test]
    fn test_lease_and_removal_never_both_win() {
        for _ in 0..200 {
            let registry = registry();
            let barrier = std::sync::Barrier::new(2);
            let (lease, removed) = std::thread::scope(|scope| {
                let leaser = scope.spawn(|| {
                    barrier.wait();
                    registry.acquire("a", None, "output:race").ok()
                });
                let remover = scope.spawn(|| {
                    barrier.wait();
                    registry.remove_by_ids(&ids(&["a"])).ok()
                });
                (leaser.join().unwrap(), remover.join().unwrap())
            });

            match (&lease, &removed) {
                (Some(lease), None) => {
                    assert_eq!(lease.ref_counter().count(), 1);
                    assert!(registry.contains("a"));
                }
                (None, Some(removed)) => {
                    assert_eq!(removed.len(), 1);
                    assert_eq!(removed[0].ref_counter().count(), 0);
                    assert_eq!(removed[0].teardowns.load(Ordering::SeqCst), 1);
                }
                (Some(_), Some(_)) => panic!("a removed composition was leased"),
                (None, None) => panic!("both the lease and the removal failed"),
            }
        }
    }

    #[test]
    fn test_insert_new_tears_down_unserializable() {
        let registry = registry();
        assert_eq!(registry.insert_new(Fake::new("c", false)).unwrap(), "c");
        assert!(registry.contains("c"));

        let broken = Arc::new(Fake {
            id: "d".to_string(),
            native: false,
            broken: true,
            refs: RefCounter::new(),
            teardowns: AtomicUsize::new(0),
        });
        assert!(registry.insert_new(Arc::clone(&broken)).is_err());
        assert!(!registry.contains("d"));
        assert_eq!(broken.teardowns.load(Ordering::SeqCst), 1);
    }
}
