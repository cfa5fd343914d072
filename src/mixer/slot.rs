//! Slot table
//!
//! Dense, reusable address space for registered sources. A freed slot keeps
//! its index and is handed out again before the table grows. Every
//! occupancy gets a fresh generation so a stale holder of an old slot
//! number can be told apart from the slot's current occupant.

use std::collections::HashMap;

use crate::error::{Error, Result};

use super::source::SourceId;

/// One occupancy of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle {
    /// Slot index
    pub slot: usize,
    /// Generation of this occupancy
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Occupant {
    source: SourceId,
    generation: u64,
}

/// Source-to-slot assignment
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Vec<Option<Occupant>>,
    index: HashMap<SourceId, usize>,
    next_generation: u64,
}

impl SlotTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `source` in the lowest free slot, growing the table if none is free
    pub fn assign(&mut self, source: SourceId) -> Result<SlotHandle> {
        if self.index.contains_key(&source) {
            return Err(Error::SourceAlreadyRegistered(source));
        }

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        self.slots[slot] = Some(Occupant { source, generation });
        self.index.insert(source, slot);

        Ok(SlotHandle { slot, generation })
    }

    /// Free the slot held by `source`. The table length is unchanged.
    pub fn release(&mut self, source: SourceId) -> Result<SlotHandle> {
        let slot = self
            .index
            .remove(&source)
            .ok_or(Error::UnknownSource(source))?;

        let generation = self.slots[slot].take().map(|o| o.generation).unwrap_or_default();
        Ok(SlotHandle { slot, generation })
    }

    /// Slot held by `source`
    pub fn slot_of(&self, source: SourceId) -> Option<usize> {
        self.index.get(&source).copied()
    }

    /// Source occupying `slot`
    pub fn source_at(&self, slot: usize) -> Option<SourceId> {
        self.slots.get(slot)?.map(|o| o.source)
    }

    /// Occupied slot indices, ascending
    pub fn occupied(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, o)| o.map(|_| slot))
            .collect()
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no source is registered
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Table length including free slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
