// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tracks which driver slots each logical client buffer was fanned out into while batching.
//!
//! A logical buffer is registered once per fanned-out slot and then sealed. Its completion is
//! reported to the client only after every one of those slots has been retrieved.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use remain::sorted;
use smallvec::SmallVec;
use thiserror::Error;

/// Largest number of driver slots one logical buffer may be fanned out into.
pub const MAX_FAN_OUT: usize = 16;
/// Default number of registration slots.
pub const BATCH_TABLE_CAPACITY: usize = 64;

#[sorted]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BatchError {
    #[error("logical buffer {0} is already fanned out into {MAX_FAN_OUT} slots")]
    FanOutExceeded(u64),
    #[error("logical buffer {0} is still pending")]
    StillPending(u64),
    #[error("all {0} batch slots are registered")]
    TableFull(usize),
    #[error("slot {0} has no registered logical buffer")]
    UnknownSlot(u32),
}

pub type Result<T> = std::result::Result<T, BatchError>;

#[derive(Debug)]
struct BatchEntry {
    slots: SmallVec<[u32; MAX_FAN_OUT]>,
    pending: usize,
    sealed: bool,
}

/// Result of retrieving a completed slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Retrieved {
    pub logical_id: u64,
    /// True when this was the last outstanding slot of the logical buffer.
    pub complete: bool,
}

#[derive(Debug)]
pub struct BatchRegistry {
    slots: Vec<Option<u64>>,
    free: BTreeSet<u32>,
    entries: BTreeMap<u64, BatchEntry>,
}

impl BatchRegistry {
    pub fn new() -> BatchRegistry {
        BatchRegistry::with_capacity(BATCH_TABLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> BatchRegistry {
        BatchRegistry {
            slots: vec![None; capacity],
            free: (0..capacity as u32).collect(),
            entries: BTreeMap::new(),
        }
    }

    /// Binds one more slot to `logical_id` and returns it.
    ///
    /// Fails with `StillPending` if the logical buffer was sealed and has not fully completed.
    pub fn register(&mut self, logical_id: u64) -> Result<u32> {
        if let Some(entry) = self.entries.get(&logical_id) {
            if entry.sealed {
                return Err(BatchError::StillPending(logical_id));
            }
            if entry.slots.len() >= MAX_FAN_OUT {
                return Err(BatchError::FanOutExceeded(logical_id));
            }
        }
        let slot = self
            .free
            .pop_first()
            .ok_or(BatchError::TableFull(self.slots.len()))?;
        self.slots[slot as usize] = Some(logical_id);
        let entry = self.entries.entry(logical_id).or_insert_with(|| BatchEntry {
            slots: SmallVec::new(),
            pending: 0,
            sealed: false,
        });
        entry.slots.push(slot);
        entry.pending += 1;
        Ok(slot)
    }

    /// Marks the fan-out of `logical_id` as complete. Further registrations are rejected until
    /// every slot has been retrieved.
    pub fn seal(&mut self, logical_id: u64) {
        if let Some(entry) = self.entries.get_mut(&logical_id) {
            entry.sealed = true;
        }
    }

    /// Registers `count` slots for `logical_id` and seals it. Nothing is registered on failure.
    pub fn register_group(
        &mut self,
        logical_id: u64,
        count: usize,
    ) -> Result<SmallVec<[u32; MAX_FAN_OUT]>> {
        if self.entries.contains_key(&logical_id) {
            return Err(BatchError::StillPending(logical_id));
        }
        if count > MAX_FAN_OUT {
            return Err(BatchError::FanOutExceeded(logical_id));
        }
        if count > self.free.len() {
            return Err(BatchError::TableFull(self.slots.len()));
        }
        let mut slots = SmallVec::new();
        for _ in 0..count {
            slots.push(self.register(logical_id)?);
        }
        self.seal(logical_id);
        Ok(slots)
    }

    /// Unbinds `slot` and decrements the pending count of its logical buffer. The logical buffer
    /// is forgotten once its last slot is retrieved.
    pub fn retrieve(&mut self, slot: u32) -> Result<Retrieved> {
        let logical_id = self
            .slots
            .get_mut(slot as usize)
            .and_then(Option::take)
            .ok_or(BatchError::UnknownSlot(slot))?;
        self.free.insert(slot);

        let entry = self
            .entries
            .get_mut(&logical_id)
            .ok_or(BatchError::UnknownSlot(slot))?;
        entry.slots.retain(|s| *s != slot);
        entry.pending -= 1;
        let complete = entry.pending == 0;
        if complete {
            self.entries.remove(&logical_id);
        }
        Ok(Retrieved {
            logical_id,
            complete,
        })
    }

    pub fn is_pending(&self, logical_id: u64) -> bool {
        self.entries
            .get(&logical_id)
            .map_or(false, |entry| entry.pending > 0)
    }

    /// Outstanding slot count of `logical_id`.
    pub fn pending_count(&self, logical_id: u64) -> usize {
        self.entries.get(&logical_id).map_or(0, |entry| entry.pending)
    }

    /// Slots still bound to `logical_id`, in registration order.
    pub fn slots_of(&self, logical_id: u64) -> &[u32] {
        self.entries
            .get(&logical_id)
            .map_or(&[], |entry| entry.slots.as_slice())
    }

    pub fn logical_id(&self, slot: u32) -> Option<u64> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drops every registration. Used once the driver has returned all buffers.
    pub fn clear(&mut self) {
        let capacity = self.slots.len();
        *self = BatchRegistry::with_capacity(capacity);
    }
}

impl Default for BatchRegistry {
    fn default() -> Self {
        BatchRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_after_last_slot() {
        let mut registry = BatchRegistry::new();
        let slots = registry.register_group(7, 3).unwrap();
        assert_eq!(slots.as_slice(), &[0, 1, 2]);
        assert!(registry.is_pending(7));

        let first = registry.retrieve(2).unwrap();
        assert_eq!(
            first,
            Retrieved {
                logical_id: 7,
                complete: false
            }
        );
        assert!(!registry.retrieve(0).unwrap().complete);
        assert_eq!(registry.pending_count(7), 1);
        assert!(registry.retrieve(1).unwrap().complete);
        assert!(!registry.is_pending(7));
        assert!(registry.is_empty());
    }

    #[test]
    fn sealed_pending_buffer_cannot_be_registered() {
        let mut registry = BatchRegistry::new();
        registry.register(1).unwrap();
        registry.seal(1);
        assert_eq!(registry.register(1), Err(BatchError::StillPending(1)));
        assert_eq!(registry.register_group(1, 2), Err(BatchError::StillPending(1)));

        registry.retrieve(0).unwrap();
        assert_eq!(registry.register(1).unwrap(), 0);
    }

    #[test]
    fn fan_out_is_bounded() {
        let mut registry = BatchRegistry::new();
        for _ in 0..MAX_FAN_OUT {
            registry.register(4).unwrap();
        }
        assert_eq!(registry.register(4), Err(BatchError::FanOutExceeded(4)));
        assert_eq!(
            registry.register_group(5, MAX_FAN_OUT + 1),
            Err(BatchError::FanOutExceeded(5))
        );
    }

    #[test]
    fn full_table_is_an_error_and_group_is_atomic() {
        let mut registry = BatchRegistry::with_capacity(4);
        registry.register_group(1, 3).unwrap();
        assert_eq!(registry.register_group(2, 2), Err(BatchError::TableFull(4)));
        assert!(!registry.is_pending(2));
        registry.register(3).unwrap();
        assert_eq!(registry.register(3), Err(BatchError::TableFull(4)));
    }

    #[test]
    fn unknown_slot() {
        let mut registry = BatchRegistry::new();
        assert_eq!(registry.retrieve(3), Err(BatchError::UnknownSlot(3)));
        assert_eq!(registry.retrieve(100), Err(BatchError::UnknownSlot(100)));
    }
}
