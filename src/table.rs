/// Fixed-capacity slot tables
///
/// One table holds the values this endpoint publishes (with dirty flags and
/// last-send stamps driving the transmit scheduler), another holds the
/// values learned from the peer.
use crate::errors::{LinkError, Result};

/// One addressable value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Slot {
    value: i16,

    /// Changed since it was last put in a packet
    dirty: bool,

    /// Clock reading (ms) when the slot was last put in a packet
    last_send_ms: u64,
}

/// Arena of slots indexed by slot number
#[derive(Debug, Clone)]
pub struct DataTable {
    slots: Box<[Slot]>,
}

impl DataTable {
    /// Create a table of `capacity` zeroed, clean slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Slot::default(); capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn check(&self, index: u8) -> Result<usize> {
        let idx = index as usize;
        if idx < self.slots.len() {
            Ok(idx)
        } else {
            Err(LinkError::IndexOutOfRange {
                index,
                capacity: self.slots.len(),
            })
        }
    }

    /// Write a locally published value
    ///
    /// The slot is flagged dirty only when the value actually changes, so
    /// republishing the same value does not cause extra traffic.
    pub fn publish(&mut self, index: u8, value: i16) -> Result<bool> {
        let idx = self.check(index)?;
        let slot = &mut self.slots[idx];
        if slot.value == value {
            return Ok(false);
        }
        slot.value = value;
        slot.dirty = true;
        Ok(true)
    }

    /// Overwrite a value learned from the peer
    pub fn store(&mut self, index: u8, value: i16) -> Result<()> {
        let idx = self.check(index)?;
        self.slots[idx].value = value;
        Ok(())
    }

    pub fn get(&self, index: u8) -> Option<i16> {
        self.slots.get(index as usize).map(|slot| slot.value)
    }

    pub fn is_dirty(&self, index: u8) -> bool {
        self.slots.get(index as usize).map_or(false, |slot| slot.dirty)
    }

    /// Force every slot dirty (resend-all)
    pub fn mark_all_dirty(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.dirty = true;
        }
    }

    /// Clear the dirty flag and stamp the send time
    pub fn mark_sent(&mut self, index: u8, now_ms: u64) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.dirty = false;
            slot.last_send_ms = now_ms;
        }
    }

    /// Indices that must go out: dirty, or unsent for at least `heartbeat_ms`
    ///
    /// Yields in ascending index order.
    pub fn due_slots(&self, now_ms: u64, heartbeat_ms: u64) -> impl Iterator<Item = u8> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, slot)| {
                slot.dirty || now_ms.saturating_sub(slot.last_send_ms) >= heartbeat_ms
            })
            .map(|(idx, _)| idx as u8)
    }
}
