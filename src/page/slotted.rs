//! Slotted record layout within a page.
//!
//! Slots are 8 bytes each, `(record_offset: i32, record_length: i32)`,
//! starting right after the header and kept in logical key order. Record
//! bytes are copied to the heap at the high end of the page; the heap is
//! unordered and is never compacted in place, so deleting or shrinking a
//! record leaves dead bytes behind until the page is repopulated.

use crate::error::{Result, StorageError};
use crate::page::{Page, PageType};
use crate::types::{INVALID_PAGE_INDEX, HEADER_SIZE, PAGE_SIZE, SLOT_SIZE};

impl Page {
    /// Reset the page to an empty node of the given type.
    ///
    /// Zeroes everything, then writes the header: `dataStartOffset` at the
    /// page end, no items, the chosen type, and the parent link. Sibling
    /// links (leaf) and the rightmost child (internal) start out absent, not
    /// zero, since page index 0 is a real page.
    pub fn initialize(&mut self, page_type: PageType, parent: Option<i32>) {
        let id = self.id();
        self.reset(id);
        self.set_page_lsn(0);
        self.set_page_type(page_type);
        self.set_item_count(0);
        self.set_data_start_offset(PAGE_SIZE);
        self.set_parent_page_index(parent.unwrap_or(INVALID_PAGE_INDEX));
        match page_type {
            PageType::LeafNode => {
                self.set_prev_page_index(INVALID_PAGE_INDEX);
                self.set_next_page_index(INVALID_PAGE_INDEX);
            }
            PageType::InternalNode => {
                self.set_rightmost_child_page_index(INVALID_PAGE_INDEX);
            }
            PageType::TableHeader => {
                self.set_root_page_index(INVALID_PAGE_INDEX);
            }
            PageType::Invalid => {}
        }
    }

    /// Bytes available between the slot array and the record heap
    pub fn free_space(&self) -> usize {
        let used_low = HEADER_SIZE + self.item_count() * SLOT_SIZE;
        self.data_start_offset().saturating_sub(used_low)
    }

    /// Read the slot at `index` as `(record_offset, record_length)`
    pub fn slot(&self, index: usize) -> Result<(i32, i32)> {
        if index >= self.item_count() {
            return Err(StorageError::invalid_operation(format!(
                "slot index {index} out of bounds (count: {}) on page {}",
                self.item_count(),
                self.id()
            )));
        }
        let base = HEADER_SIZE + index * SLOT_SIZE;
        Ok((self.read_i32(base)?, self.read_i32(base + 4)?))
    }

    fn set_slot(&mut self, index: usize, offset: i32, length: i32) -> Result<()> {
        let base = HEADER_SIZE + index * SLOT_SIZE;
        self.write_i32(base, offset)?;
        self.write_i32(base + 4, length)
    }

    /// Insert `bytes` into the heap and a slot for it at `index`, shifting
    /// later slots right. Returns `false` without touching the page when
    /// free space cannot hold the record plus its slot.
    pub fn try_add_record(&mut self, bytes: &[u8], index: usize) -> Result<bool> {
        let count = self.item_count();
        if index > count {
            return Err(StorageError::invalid_operation(format!(
                "insert index {index} out of bounds (count: {count}) on page {}",
                self.id()
            )));
        }
        if bytes.is_empty() {
            return Err(StorageError::invalid_operation(
                "cannot add an empty record",
            ));
        }
        if self.free_space() < bytes.len() + SLOT_SIZE {
            return Ok(false);
        }

        let new_start = self.data_start_offset() - bytes.len();
        self.write_at(new_start, bytes)?;
        self.set_data_start_offset(new_start);

        // Shift slots at [index, count) right by one.
        for i in (index..count).rev() {
            let (offset, length) = self.slot(i)?;
            self.set_slot(i + 1, offset, length)?;
        }
        self.set_item_count(count + 1);
        self.set_slot(index, new_start as i32, bytes.len() as i32)?;
        Ok(true)
    }

    /// Borrow the record bytes addressed by a slot. A zero-length slot is a
    /// logically deleted record and reads as an empty slice.
    pub fn raw_record(&self, index: usize) -> Result<&[u8]> {
        let (offset, length) = self.slot(index)?;
        if length == 0 {
            return Ok(&[]);
        }
        if offset < 0 || length < 0 {
            return Err(StorageError::invalid_data(format!(
                "corrupt slot {index} on page {}: offset {offset}, length {length}",
                self.id()
            )));
        }
        self.read_bytes(offset as usize, length as usize)
    }

    /// Replace the record at `index` with `bytes`.
    ///
    /// A record that shrinks (or stays the same size) is overwritten in
    /// place. A growing record is appended to the heap and the slot is
    /// repointed, leaving the old bytes dead. Returns `false` and leaves the
    /// page bit-identical when the heap cannot take the new copy.
    pub fn try_update_record(&mut self, index: usize, bytes: &[u8]) -> Result<bool> {
        if bytes.is_empty() {
            return Err(StorageError::invalid_operation(
                "cannot update a record to empty bytes",
            ));
        }
        let (offset, length) = self.slot(index)?;
        if offset < 0 || length < 0 {
            return Err(StorageError::invalid_data(format!(
                "corrupt slot {index} on page {}: offset {offset}, length {length}",
                self.id()
            )));
        }
        if bytes.len() <= length as usize {
            self.write_at(offset as usize, bytes)?;
            self.set_slot(index, offset, bytes.len() as i32)?;
            return Ok(true);
        }
        if self.free_space() < bytes.len() {
            return Ok(false);
        }
        let new_start = self.data_start_offset() - bytes.len();
        self.write_at(new_start, bytes)?;
        self.set_data_start_offset(new_start);
        self.set_slot(index, new_start as i32, bytes.len() as i32)?;
        Ok(true)
    }

    /// Remove the slot at `index`, compacting the slot array left. The
    /// record's heap bytes become dead space.
    pub fn delete_record(&mut self, index: usize) -> Result<()> {
        let count = self.item_count();
        // Bounds-check through slot() before shifting anything.
        self.slot(index)?;
        for i in index..count - 1 {
            let (offset, length) = self.slot(i + 1)?;
            self.set_slot(i, offset, length)?;
        }
        self.set_item_count(count - 1);
        Ok(())
    }

    /// Copies of all record bytes in slot order, skipping logically deleted
    /// slots
    pub fn all_raw_records(&self) -> Result<Vec<Vec<u8>>> {
        let mut records = Vec::with_capacity(self.item_count());
        for i in 0..self.item_count() {
            let raw = self.raw_record(i)?;
            if !raw.is_empty() {
                records.push(raw.to_vec());
            }
        }
        Ok(records)
    }
}
