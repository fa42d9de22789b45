//! B+Tree leaf node: a sorted, slotted collection of serialized rows.
//!
//! A `LeafNode` is a typed view over a pinned page; it borrows the page
//! through the pin guard's reference, so it can never outlive the pin.

use crate::btree::SlotPos;
use crate::error::{Result, StorageError};
use crate::page::{Page, PageType};
use crate::record;
use crate::schema::TableDefinition;
use crate::types::{DataValue, Key, INVALID_PAGE_INDEX, HEADER_SIZE, MAX_RECORD_SIZE, PAGE_SIZE, SLOT_SIZE};
use log::debug;
use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

/// Typed view of a leaf page
pub struct LeafNode<'t, P> {
    page: P,
    table: &'t TableDefinition,
}

impl<'t, P: Deref<Target = Page>> LeafNode<'t, P> {
    /// Wrap an existing leaf page. Any other page type is `InvalidData`.
    pub fn attach(page: P, table: &'t TableDefinition) -> Result<Self> {
        match page.page_type()? {
            PageType::LeafNode => Ok(Self { page, table }),
            other => Err(StorageError::invalid_data(format!(
                "page {} is a {other:?}, not a leaf",
                page.id()
            ))),
        }
    }

    /// The underlying page
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Number of rows in the leaf
    pub fn row_count(&self) -> usize {
        self.page.item_count()
    }

    /// Key of the row in a given slot
    pub fn key_at(&self, slot: usize) -> Result<Key> {
        let raw = self.page.raw_record(slot)?;
        record::deserialize_primary_key(self.table, raw)
    }

    /// First key in the leaf; an empty leaf here means a broken tree
    pub fn first_key(&self) -> Result<Key> {
        if self.row_count() == 0 {
            return Err(StorageError::invariant(format!(
                "leaf {} is empty",
                self.page.id()
            )));
        }
        self.key_at(0)
    }

    /// Binary-search the slot array for a key
    pub(crate) fn locate(&self, key: &Key) -> Result<SlotPos> {
        let mut low = 0;
        let mut high = self.row_count();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.key_at(mid)?.compare(key)? {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(SlotPos::Found(mid)),
            }
        }
        Ok(SlotPos::Missing(low))
    }

    /// Point lookup: the full row for `key`, or `None`
    pub fn search(&self, key: &Key) -> Result<Option<Vec<DataValue>>> {
        match self.locate(key)? {
            SlotPos::Found(slot) => {
                let raw = self.page.raw_record(slot)?;
                Ok(Some(record::deserialize(&self.table.columns, raw)?))
            }
            SlotPos::Missing(_) => Ok(None),
        }
    }

    /// Copies of all row bytes in key order
    pub fn all_raw_records(&self) -> Result<Vec<Vec<u8>>> {
        self.page.all_raw_records()
    }
}

impl<'t, P: DerefMut<Target = Page>> LeafNode<'t, P> {
    /// Initialize a fresh page as an empty leaf and attach to it
    pub fn initialize(mut page: P, table: &'t TableDefinition, parent: Option<i32>) -> Self {
        page.initialize(PageType::LeafNode, parent);
        Self { page, table }
    }

    /// Insert a row at its sorted position. Returns `false` without mutating
    /// when the page has no room; an existing equal key is `DuplicateKey`,
    /// and a row that could not fit even in an empty page is
    /// `InvalidOperation`.
    pub fn try_insert(&mut self, row: &[DataValue]) -> Result<bool> {
        let key = self.table.key_of_row(row)?;
        let bytes = record::serialize(&self.table.columns, row)?;
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "record of {} bytes cannot fit in any page",
                bytes.len()
            )));
        }
        match self.locate(&key)? {
            SlotPos::Found(_) => Err(StorageError::duplicate_key(&key)),
            SlotPos::Missing(slot) => self.page.try_add_record(&bytes, slot),
        }
    }

    /// Replace the row with the same key. A missing key is `RecordNotFound`;
    /// `false` means the page had no room for the grown row.
    pub fn try_update(&mut self, row: &[DataValue]) -> Result<bool> {
        let key = self.table.key_of_row(row)?;
        let bytes = record::serialize(&self.table.columns, row)?;
        match self.locate(&key)? {
            SlotPos::Found(slot) => self.page.try_update_record(slot, &bytes),
            SlotPos::Missing(_) => Err(StorageError::record_not_found(&key)),
        }
    }

    /// Remove the row with this key, if present
    pub fn delete(&mut self, key: &Key) -> Result<bool> {
        match self.locate(key)? {
            SlotPos::Found(slot) => {
                self.page.delete_record(slot)?;
                Ok(true)
            }
            SlotPos::Missing(_) => Ok(false),
        }
    }

    /// Atomically replace the leaf's contents with `records`, already in key
    /// order. Parent and sibling links survive. Fails without touching the
    /// page if the records cannot fit.
    pub fn repopulate(&mut self, records: &[Vec<u8>]) -> Result<()> {
        let needed: usize = records.iter().map(|r| r.len() + SLOT_SIZE).sum();
        if needed > PAGE_SIZE - HEADER_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "{needed} bytes of records cannot fit in one page"
            )));
        }
        let parent = self.page.parent_page_index();
        let prev = self.page.prev_page_index();
        let next = self.page.next_page_index();

        self.page.initialize(PageType::LeafNode, Some(parent));
        self.page.set_prev_page_index(prev);
        self.page.set_next_page_index(next);

        for (slot, bytes) in records.iter().enumerate() {
            if !self.page.try_add_record(bytes, slot)? {
                return Err(StorageError::invariant(format!(
                    "repopulate overflow on leaf {} despite space check",
                    self.page.id()
                )));
            }
        }
        Ok(())
    }

    /// Split this full leaf while inserting `row`, moving the upper half of
    /// the merged rows into `sibling`.
    ///
    /// `sibling` must be a freshly initialized leaf; `far_right` is the leaf
    /// currently following this one, required whenever the leaf has a next
    /// sibling so the back link can be fixed. Returns the separator to
    /// promote: the first key of the new right sibling.
    pub fn split_and_insert(
        &mut self,
        row: &[DataValue],
        sibling: &mut Page,
        far_right: Option<&mut Page>,
    ) -> Result<Key> {
        let key = self.table.key_of_row(row)?;
        let bytes = record::serialize(&self.table.columns, row)?;
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "record of {} bytes cannot fit in any page",
                bytes.len()
            )));
        }

        let slot = match self.locate(&key)? {
            SlotPos::Found(_) => return Err(StorageError::duplicate_key(&key)),
            SlotPos::Missing(slot) => slot,
        };

        let mut merged = self.all_raw_records()?;
        merged.insert(slot, bytes);

        // Left keeps the lower half; on odd totals the right side gets the
        // extra row.
        let mid = merged.len() / 2;
        let separator = record::deserialize_primary_key(self.table, &merged[mid])?;

        let old_next = self.page.next_page_index();
        if old_next != INVALID_PAGE_INDEX && far_right.is_none() {
            return Err(StorageError::invalid_operation(format!(
                "leaf {} has a next sibling but none was supplied",
                self.page.id()
            )));
        }

        let mut right = LeafNode::attach(&mut *sibling, self.table)?;
        right.repopulate(&merged[mid..])?;
        self.repopulate(&merged[..mid])?;

        // Stitch the sibling chain: self <-> sibling <-> old next.
        let self_index = self.page.id().page_index;
        let sibling_index = right.page.id().page_index;
        self.page.set_next_page_index(sibling_index);
        right.page.set_prev_page_index(self_index);
        right.page.set_next_page_index(old_next);
        if let Some(far_right) = far_right {
            if far_right.id().page_index != old_next {
                return Err(StorageError::invariant(format!(
                    "far right sibling is page {} but leaf {} links to {}",
                    far_right.id(),
                    self.page.id(),
                    old_next
                )));
            }
            far_right.set_prev_page_index(sibling_index);
        }

        debug!(
            "split leaf {}: {} rows kept, {} rows to sibling {}, separator {}",
            self.page.id(),
            mid,
            merged.len() - mid,
            sibling_index,
            separator
        );
        Ok(separator)
    }

    /// Merge every row of this leaf into `left`, its immediate left sibling,
    /// and wipe this leaf. The caller owns fixing the next sibling's back
    /// link. Fails with `InvalidOperation` when `left` lacks the space.
    pub fn merge_left(&mut self, left: &mut Page) -> Result<()> {
        let mut left_node = LeafNode::attach(&mut *left, self.table)?;
        let records = self.all_raw_records()?;
        let needed: usize = records.iter().map(|r| r.len() + SLOT_SIZE).sum();
        if needed > left_node.page.free_space() {
            return Err(StorageError::invalid_operation(format!(
                "left sibling {} lacks space to absorb leaf {}",
                left_node.page.id(),
                self.page.id()
            )));
        }

        let base = left_node.row_count();
        for (i, bytes) in records.iter().enumerate() {
            if !left_node.page.try_add_record(bytes, base + i)? {
                return Err(StorageError::invariant(
                    "merge overflow despite space check",
                ));
            }
        }
        left_node.page.set_next_page_index(self.page.next_page_index());

        let parent = self.page.parent_page_index();
        self.page.initialize(PageType::LeafNode, Some(parent));
        Ok(())
    }
}
