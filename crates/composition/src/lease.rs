//! Composition leases.
//!
//! A [`Lease`] keeps a composition alive for one consumer. Acquiring it bumps
//! the composition's [`RefCounter`] under a holder tag; dropping it gives the
//! reference back. A composition with outstanding leases cannot be removed.
//!
//! The per-tag breakdown exists for leak diagnosis and is only kept in debug
//! builds. The total is always kept.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Receives change notifications for a composition it holds a lease on.
pub trait CompositionListener: Send + Sync {
    fn current_scene_changed(&self, _composition_id: &str, _scene: &str) {}
    fn scene_list_changed(&self, _composition_id: &str) {}
    /// The items shown on the program changed because `scene` became current.
    fn scene_items_changed(&self, _composition_id: &str, _scene: &str) {}
    fn transition_ended(&self, _composition_id: &str, _scene: &str) {}
    fn collection_reset(&self, _composition_id: &str) {}
}

#[derive(Default)]
struct RefState {
    total: usize,
    #[cfg(debug_assertions)]
    by_tag: BTreeMap<String, usize>,
}

/// Reference count of a composition, guarded by its own lock.
#[derive(Default)]
pub struct RefCounter {
    state: Mutex<RefState>,
}

impl RefCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn acquire(&self, tag: &str) {
        let mut state = self.state.lock();
        state.total += 1;
        #[cfg(debug_assertions)]
        {
            *state.by_tag.entry(tag.to_string()).or_insert(0) += 1;
        }
        #[cfg(not(debug_assertions))]
        let _ = tag;
    }

    pub(crate) fn release(&self, tag: &str) {
        let mut state = self.state.lock();
        if state.total == 0 {
            tracing::error!(tag, "Composition reference released more often than acquired");
            return;
        }
        state.total -= 1;
        #[cfg(debug_assertions)]
        {
            if let Some(count) = state.by_tag.get_mut(tag) {
                *count -= 1;
                if *count == 0 {
                    state.by_tag.remove(tag);
                }
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = tag;
    }

    /// Outstanding references.
    pub fn count(&self) -> usize {
        self.state.lock().total
    }

    /// Outstanding references by holder tag. Empty in release builds.
    pub fn holders(&self) -> BTreeMap<String, usize> {
        #[cfg(debug_assertions)]
        {
            self.state.lock().by_tag.clone()
        }
        #[cfg(not(debug_assertions))]
        {
            BTreeMap::new()
        }
    }
}

impl std::fmt::Debug for RefCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefCounter")
            .field("count", &self.count())
            .field("holders", &self.holders())
            .finish()
    }
}

/// Weakly held listeners of one composition.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Weak<dyn CompositionListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, listener: Weak<dyn CompositionListener>) {
        self.listeners.lock().push(listener);
    }

    pub(crate) fn remove(&self, listener: &Weak<dyn CompositionListener>) {
        let mut listeners = self.listeners.lock();
        if let Some(index) = listeners.iter().position(|l| Weak::ptr_eq(l, listener)) {
            listeners.swap_remove(index);
        }
    }

    /// Call `f` on every listener that is still alive.
    pub fn notify(&self, f: impl Fn(&dyn CompositionListener)) {
        let alive: Vec<Arc<dyn CompositionListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in alive {
            f(listener.as_ref());
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something a [`Lease`] can hold.
pub trait Leasable: Send + Sync {
    fn ref_counter(&self) -> &RefCounter;

    /// Where lease listeners are registered, if the target notifies any.
    fn listener_set(&self) -> Option<&ListenerSet> {
        None
    }
}

/// A consumer's hold on a composition.
pub struct Lease<C: Leasable> {
    target: Arc<C>,
    tag: String,
    listener: Option<Weak<dyn CompositionListener>>,
}

impl<C: Leasable> Lease<C> {
    pub(crate) fn acquire(
        target: Arc<C>,
        listener: Option<Weak<dyn CompositionListener>>,
        tag: &str,
    ) -> Self {
        target.ref_counter().acquire(tag);
        if let (Some(listener), Some(set)) = (listener.as_ref(), target.listener_set()) {
            set.add(listener.clone());
        }
        Self {
            target,
            tag: tag.to_string(),
            listener,
        }
    }

    pub fn holder_tag(&self) -> &str {
        &self.tag
    }

    pub fn target(&self) -> &Arc<C> {
        &self.target
    }

    pub fn listener(&self) -> Option<Arc<dyn CompositionListener>> {
        self.listener.as_ref().and_then(Weak::upgrade)
    }
}

impl<C: Leasable> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.target
    }
}

impl<C: Leasable> Drop for Lease<C> {
    fn drop(&mut self) {
        if let (Some(listener), Some(set)) = (self.listener.as_ref(), self.target.listener_set()) {
            set.remove(listener);
        }
        self.target.ref_counter().release(&self.tag);
    }
}

impl<C: Leasable> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("tag", &self.tag)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
