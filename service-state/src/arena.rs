//! The two live snapshots: `current` and `pending`.
//!
//! Both slots are allocated once. A commit flips which slot is current and
//! resets the old current slot so the next poll can fill it.

use crate::state::{ServiceState, cell::CellLocation};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    pub state: ServiceState,
    pub location: CellLocation,
}

impl Slot {
    fn reset(&mut self) {
        self.state.set_out_of_service();
        self.location.set_invalid();
    }
}

#[derive(Debug, Default)]
pub struct SnapshotArena {
    slots: [Slot; 2],
    current: usize,
}

impl SnapshotArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Slot {
        &self.slots[self.current]
    }

    pub fn pending(&self) -> &Slot {
        &self.slots[self.current ^ 1]
    }

    pub fn pending_mut(&mut self) -> &mut Slot {
        &mut self.slots[self.current ^ 1]
    }

    /// `(current, pending)`
    pub fn split_mut(&mut self) -> (&Slot, &mut Slot) {
        let [a, b] = &mut self.slots;
        if self.current == 0 { (&*a, b) } else { (&*b, a) }
    }

    pub fn reset_pending(&mut self) {
        self.pending_mut().reset();
    }

    /// Makes `pending` the new `current`. The previous current becomes the next
    /// pending, reset to out of service.
    pub fn commit(&mut self) {
        self.current ^= 1;
        self.reset_pending();
    }
}
