//! Global audio-output slot table.
//!
//! Custom compositions route their audio into the host's global mix by
//! occupying one slot. A slot holds a route that, when pulled, reports which
//! node currently feeds it. Assignment is first-free with no reservation:
//! when every slot is taken the caller simply gets no routing.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::handle::TransitionHandle;

/// Pulls the node currently feeding a slot.
pub type AudioRoute = Arc<dyn Fn() -> Option<TransitionHandle> + Send + Sync>;

/// Fixed-size table of audio-output slots shared by all compositions.
pub struct AudioSlotTable {
    slots: Mutex<Vec<Option<AudioRoute>>>,
}

impl AudioSlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    /// Put `route` into the first free slot.
    pub fn assign(&self, route: AudioRoute) -> Option<usize> {
        let mut slots = self.slots.lock();
        let index = slots.iter().position(Option::is_none)?;
        slots[index] = Some(route);
        Some(index)
    }

    /// Free a slot. Returns false if it was already empty.
    pub fn release(&self, slot: usize) -> bool {
        let mut slots = self.slots.lock();
        slots
            .get_mut(slot)
            .and_then(Option::take)
            .is_some()
    }

    /// Ask the route in `slot` which node feeds it right now.
    pub fn current_source(&self, slot: usize) -> Option<TransitionHandle> {
        let route = self.slots.lock().get(slot).cloned().flatten()?;
        route()
    }

    pub fn is_assigned(&self, slot: usize) -> bool {
        self.slots
            .lock()
            .get(slot)
            .is_some_and(Option::is_some)
    }

    pub fn occupied(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }
}

impl std::fmt::Debug for AudioSlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSlotTable")
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied())
            .finish()
    }
}
