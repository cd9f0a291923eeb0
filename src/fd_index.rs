// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stable mapping from buffer memory descriptors to the small slot numbers that address
//! per-buffer extradata.

use std::collections::BTreeSet;

use base::RawDescriptor;
use remain::sorted;
use thiserror::Error;

/// Number of slots in a table.
pub const FD_INDEX_CAPACITY: usize = 64;

#[sorted]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FdIndexError {
    #[error("all {0} descriptor slots are bound")]
    NoSlot(usize),
}

pub type Result<T> = std::result::Result<T, FdIndexError>;

/// Binds descriptors to slots. A slot stays bound to its descriptor until it is released
/// explicitly; the table never looks at whether the descriptor is still open.
#[derive(Debug)]
pub struct FdIndexTable {
    slots: Vec<Option<RawDescriptor>>,
    free: BTreeSet<u32>,
}

impl FdIndexTable {
    pub fn new() -> FdIndexTable {
        FdIndexTable::with_capacity(FD_INDEX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> FdIndexTable {
        FdIndexTable {
            slots: vec![None; capacity],
            free: (0..capacity as u32).collect(),
        }
    }

    /// Returns the slot bound to `fd`, binding the lowest free slot if `fd` has none yet.
    pub fn index_of(&mut self, fd: RawDescriptor) -> Result<u32> {
        if let Some(slot) = self.lookup(fd) {
            return Ok(slot);
        }
        let slot = self
            .free
            .pop_first()
            .ok_or(FdIndexError::NoSlot(self.slots.len()))?;
        self.slots[slot as usize] = Some(fd);
        Ok(slot)
    }

    /// Like [`FdIndexTable::index_of`], but a new binding must land below `limit`. Fails without
    /// binding anything when every slot below `limit` is taken.
    pub fn index_of_below(&mut self, fd: RawDescriptor, limit: u32) -> Result<u32> {
        if let Some(slot) = self.lookup(fd) {
            return Ok(slot);
        }
        let limit = limit.min(self.slots.len() as u32);
        match self.free.first() {
            Some(&slot) if slot < limit => {
                self.free.remove(&slot);
                self.slots[slot as usize] = Some(fd);
                Ok(slot)
            }
            _ => Err(FdIndexError::NoSlot(limit as usize)),
        }
    }

    /// Returns the slot bound to `fd` without binding a new one.
    pub fn lookup(&self, fd: RawDescriptor) -> Option<u32> {
        self.slots
            .iter()
            .position(|bound| *bound == Some(fd))
            .map(|slot| slot as u32)
    }

    /// Returns the descriptor bound to `slot`.
    pub fn descriptor(&self, slot: u32) -> Option<RawDescriptor> {
        self.slots.get(slot as usize).copied().flatten()
    }

    /// Unbinds `fd`. Returns the slot it held, if any.
    pub fn release(&mut self, fd: RawDescriptor) -> Option<u32> {
        let slot = self.lookup(fd)?;
        self.slots[slot as usize] = None;
        self.free.insert(slot);
        Some(slot)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.free = (0..self.slots.len() as u32).collect();
    }

    /// Number of bound slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.len() == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for FdIndexTable {
    fn default() -> Self {
        FdIndexTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_fd_same_slot() {
        let mut table = FdIndexTable::new();
        let a = table.index_of(10).unwrap();
        let b = table.index_of(11).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.index_of(10).unwrap(), a);
        assert_eq!(table.lookup(11), Some(b));
        assert_eq!(table.descriptor(a), Some(10));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn released_slot_is_reused_first_fit() {
        let mut table = FdIndexTable::new();
        for fd in 0..4 {
            assert_eq!(table.index_of(100 + fd).unwrap(), fd as u32);
        }
        assert_eq!(table.release(101), Some(1));
        assert_eq!(table.release(101), None);
        assert_eq!(table.index_of(200).unwrap(), 1);
        assert_eq!(table.index_of(201).unwrap(), 4);
    }

    #[test]
    fn exhaustion_only_when_full() {
        let mut table = FdIndexTable::new();
        for fd in 0..FD_INDEX_CAPACITY as i32 {
            table.index_of(fd).unwrap();
        }
        assert_eq!(
            table.index_of(1000),
            Err(FdIndexError::NoSlot(FD_INDEX_CAPACITY))
        );
        // Already bound descriptors still resolve.
        assert_eq!(table.index_of(5).unwrap(), 5);

        table.release(63);
        assert_eq!(table.index_of(1000).unwrap(), 63);
    }

    #[test]
    fn bounded_binding_never_passes_limit() {
        let mut table = FdIndexTable::new();
        assert_eq!(table.index_of_below(10, 2).unwrap(), 0);
        assert_eq!(table.index_of_below(11, 2).unwrap(), 1);
        assert_eq!(table.index_of_below(12, 2), Err(FdIndexError::NoSlot(2)));
        assert_eq!(table.len(), 2);
        // Bound descriptors resolve regardless of the limit.
        assert_eq!(table.index_of_below(11, 1).unwrap(), 1);

        table.release(10);
        assert_eq!(table.index_of_below(12, 2).unwrap(), 0);
    }

    #[test]
    fn clear_unbinds_everything() {
        let mut table = FdIndexTable::with_capacity(2);
        table.index_of(3).unwrap();
        table.index_of(4).unwrap();
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.index_of(4).unwrap(), 0);
    }
}
