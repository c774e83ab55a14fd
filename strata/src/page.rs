//! The layout of a heap page on disk.
//!
//! A page is `page_size` bytes: a slot bitmap of `ceil(num_slots / 8)` bytes
//! (bit set = slot occupied, least significant bit first) followed by
//! `num_slots` fixed-width tuple records in slot order.
use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::tuple::{RecordId, Tuple, TupleDesc};
use crate::TableId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

/// Number of tuples of `tuple_size` bytes that fit on a page, counting one
/// bitmap bit per tuple.
pub fn slots_per_page(page_size: usize, tuple_size: usize) -> usize {
    (page_size * 8) / (tuple_size * 8 + 1)
}

/// Largest slot count a `RecordId` can address.
pub const MAX_SLOTS: usize = u32::MAX as usize;

/// Bytes used by the slot bitmap.
pub fn header_len(num_slots: usize) -> usize {
    num_slots.div_ceil(8)
}

/// A page of a heap file. The contents of the page live in `data`, exactly as
/// they are stored on disk.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pub id: PageId,
    desc: Arc<TupleDesc>,
    num_slots: usize,
    data: Vec<u8>,
}

impl HeapPage {
    /// An empty page: every slot free.
    pub fn new(id: PageId, desc: Arc<TupleDesc>, page_size: usize) -> Self {
        let num_slots = slots_per_page(page_size, desc.byte_size());
        Self {
            id,
            desc,
            num_slots,
            data: vec![0; page_size],
        }
    }

    /// Wraps a page image read from disk. `data.len()` is the page size.
    pub fn from_bytes(id: PageId, desc: Arc<TupleDesc>, data: Vec<u8>) -> Self {
        let num_slots = slots_per_page(data.len(), desc.byte_size());
        Self {
            id,
            desc,
            num_slots,
            data,
        }
    }

    /// Image of a page with no tuples.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots && self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots)
            .filter(|slot| !self.is_slot_used(*slot))
            .count()
    }

    fn set_slot(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.data[slot / 8] |= mask;
        } else {
            self.data[slot / 8] &= !mask;
        }
    }

    fn record_id(&self, slot: usize) -> RecordId {
        debug_assert!(slot <= MAX_SLOTS);
        RecordId::new(self.id, slot as u32)
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let tuple_size = self.desc.byte_size();
        let start = header_len(self.num_slots) + slot * tuple_size;
        start..start + tuple_size
    }

    /// Places `tuple` in the first free slot and returns its new location.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Result<RecordId> {
        if !self.desc.conforms(tuple) {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) vs page schema ({})",
                tuple, self.desc
            )));
        }
        let slot = (0..self.num_slots)
            .find(|slot| !self.is_slot_used(*slot))
            .ok_or(DbError::PageFull(self.id))?;

        let range = self.slot_range(slot);
        let mut record = Vec::with_capacity(range.len());
        self.desc.encode(tuple, &mut record);
        self.data[range].copy_from_slice(&record);
        self.set_slot(slot, true);
        Ok(self.record_id(slot))
    }

    /// Frees the slot at `rid`.
    pub fn delete_tuple(&mut self, rid: RecordId) -> Result<()> {
        let slot = rid.slot as usize;
        if rid.page_id != self.id || slot >= self.num_slots {
            return Err(DbError::TupleNotFound(format!(
                "{rid:?} is not on {:?}",
                self.id
            )));
        }
        if !self.is_slot_used(slot) {
            return Err(DbError::SlotEmpty(rid));
        }
        self.set_slot(slot, false);
        let range = self.slot_range(slot);
        self.data[range].fill(0);
        Ok(())
    }

    /// The tuple in `slot`, if occupied.
    pub fn tuple(&self, slot: usize) -> Option<Tuple> {
        if !self.is_slot_used(slot) {
            return None;
        }
        let tuple = self.desc.decode(&self.data[self.slot_range(slot)]);
        Some(tuple.with_record_id(self.record_id(slot)))
    }

    /// Occupied tuples in ascending slot order.
    pub fn tuples(&self) -> impl Iterator<Item = Tuple> + '_ {
        (0..self.num_slots).filter_map(move |slot| self.tuple(slot))
    }
}
