//! B+Tree internal node: separator keys routing to child pages.
//!
//! Each entry is a serialized key followed by a 4-byte child page index. An
//! entry `(k, c)` means "subtree `c` holds keys < `k`"; the header's
//! rightmost child pointer covers keys at or above the largest separator.

use crate::btree::SlotPos;
use crate::error::{Result, StorageError};
use crate::page::{Page, PageType};
use crate::record;
use crate::schema::{Column, TableDefinition};
use crate::types::{Key, INVALID_PAGE_INDEX, HEADER_SIZE, MAX_RECORD_SIZE, PAGE_SIZE, SLOT_SIZE};
use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

/// Typed view of an internal page
pub struct InternalNode<'t, P> {
    page: P,
    table: &'t TableDefinition,
    pk_columns: Vec<Column>,
}

/// Encode one entry: the key bytes followed by the child page index
pub(crate) fn encode_entry(pk_columns: &[Column], key: &Key, child: i32) -> Result<Vec<u8>> {
    let mut bytes = record::serialize_key(pk_columns, key)?;
    bytes.extend_from_slice(&child.to_le_bytes());
    Ok(bytes)
}

/// Decode one entry into its key and child page index
pub(crate) fn decode_entry(pk_columns: &[Column], bytes: &[u8]) -> Result<(Key, i32)> {
    let (key, consumed) = record::read_key(pk_columns, bytes)?;
    if bytes.len() != consumed + 4 {
        return Err(StorageError::invalid_data(format!(
            "internal entry of {} bytes has {} bytes after its key",
            bytes.len(),
            bytes.len().saturating_sub(consumed)
        )));
    }
    let raw = &bytes[consumed..];
    Ok((key, i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
}

impl<'t, P: Deref<Target = Page>> InternalNode<'t, P> {
    /// Wrap an existing internal page. Any other page type is `InvalidData`.
    pub fn attach(page: P, table: &'t TableDefinition) -> Result<Self> {
        match page.page_type()? {
            PageType::InternalNode => {
                let pk_columns = table.primary_key_columns()?;
                Ok(Self {
                    page,
                    table,
                    pk_columns,
                })
            }
            other => Err(StorageError::invalid_data(format!(
                "page {} is a {other:?}, not an internal node",
                page.id()
            ))),
        }
    }

    /// The underlying page
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Number of `(key, child)` entries; the node routes to one more child
    /// than this through its rightmost pointer
    pub fn entry_count(&self) -> usize {
        self.page.item_count()
    }

    /// Child pointer for keys at or above the largest separator
    pub fn rightmost_child(&self) -> i32 {
        self.page.rightmost_child_page_index()
    }

    /// Decode the entry in a slot
    pub fn entry_at(&self, slot: usize) -> Result<(Key, i32)> {
        decode_entry(&self.pk_columns, self.page.raw_record(slot)?)
    }

    /// Key of the entry in a slot
    pub fn key_at(&self, slot: usize) -> Result<Key> {
        Ok(self.entry_at(slot)?.0)
    }

    /// Child page index of the entry in a slot
    pub fn child_at(&self, slot: usize) -> Result<i32> {
        Ok(self.entry_at(slot)?.1)
    }

    pub(crate) fn locate(&self, key: &Key) -> Result<SlotPos> {
        let mut low = 0;
        let mut high = self.entry_count();
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

    /// Route a search key to the child whose subtree covers it: the child of
    /// the first entry whose key exceeds the search key, or the rightmost
    /// child when no entry's key does.
    pub fn lookup_child(&self, key: &Key) -> Result<i32> {
        let count = self.entry_count();
        let mut low = 0;
        let mut high = count;
        while low < high {
            let mid = low + (high - low) / 2;
            // Entries at or below the key route right of themselves.
            if self.key_at(mid)?.compare(key)? == Ordering::Greater {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        if low == count {
            let rightmost = self.rightmost_child();
            if rightmost == INVALID_PAGE_INDEX {
                return Err(StorageError::invariant(format!(
                    "internal node {} has no rightmost child",
                    self.page.id()
                )));
            }
            return Ok(rightmost);
        }
        self.child_at(low)
    }

    /// Copies of all entry bytes in key order
    pub fn all_raw_entries(&self) -> Result<Vec<Vec<u8>>> {
        self.page.all_raw_records()
    }
}

impl<'t, P: DerefMut<Target = Page>> InternalNode<'t, P> {
    /// Initialize a fresh page as an empty internal node and attach to it
    pub fn initialize(
        mut page: P,
        table: &'t TableDefinition,
        parent: Option<i32>,
    ) -> Result<Self> {
        page.initialize(PageType::InternalNode, parent);
        let pk_columns = table.primary_key_columns()?;
        Ok(Self {
            page,
            table,
            pk_columns,
        })
    }

    /// Set the child pointer for keys at or above the largest separator
    pub fn set_rightmost_child(&mut self, child: i32) {
        self.page.set_rightmost_child_page_index(child);
    }

    /// Insert an entry at its sorted position. `false` means no room; an
    /// equal key already present is `DuplicateKey`.
    pub fn try_insert(&mut self, key: &Key, child: i32) -> Result<bool> {
        let bytes = encode_entry(&self.pk_columns, key, child)?;
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "internal entry of {} bytes cannot fit in any page",
                bytes.len()
            )));
        }
        match self.locate(key)? {
            SlotPos::Found(_) => Err(StorageError::duplicate_key(key)),
            SlotPos::Missing(slot) => self.page.try_add_record(&bytes, slot),
        }
    }

    /// Remove the entry with this key, if present
    pub fn delete(&mut self, key: &Key) -> Result<bool> {
        match self.locate(key)? {
            SlotPos::Found(slot) => {
                self.page.delete_record(slot)?;
                Ok(true)
            }
            SlotPos::Missing(_) => Ok(false),
        }
    }

    /// Repoint the child pointer currently equal to `old_child` (an entry's
    /// child or the rightmost pointer) at `new_child`. Used when a split
    /// hands the upper half of a child's keys to a new page.
    pub fn replace_child(&mut self, old_child: i32, new_child: i32) -> Result<()> {
        for slot in 0..self.entry_count() {
            let (key, child) = self.entry_at(slot)?;
            if child == old_child {
                let bytes = encode_entry(&self.pk_columns, &key, new_child)?;
                // Same key, same length; this always rewrites in place.
                if !self.page.try_update_record(slot, &bytes)? {
                    return Err(StorageError::invariant(
                        "in-place child replacement did not fit",
                    ));
                }
                return Ok(());
            }
        }
        if self.rightmost_child() == old_child {
            self.set_rightmost_child(new_child);
            return Ok(());
        }
        Err(StorageError::invariant(format!(
            "internal node {} has no child pointer to page index {old_child}",
            self.page.id()
        )))
    }

    /// Atomically replace the entries with `entries`, already in key order.
    /// Parent link and rightmost child survive. Fails without touching the
    /// page if the entries cannot fit.
    pub fn repopulate(&mut self, entries: &[Vec<u8>]) -> Result<()> {
        let needed: usize = entries.iter().map(|e| e.len() + SLOT_SIZE).sum();
        if needed > PAGE_SIZE - HEADER_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "{needed} bytes of entries cannot fit in one page"
            )));
        }
        let parent = self.page.parent_page_index();
        let rightmost = self.rightmost_child();

        self.page.initialize(PageType::InternalNode, Some(parent));
        self.page.set_rightmost_child_page_index(rightmost);

        for (slot, bytes) in entries.iter().enumerate() {
            if !self.page.try_add_record(bytes, slot)? {
                return Err(StorageError::invariant(format!(
                    "repopulate overflow on internal node {} despite space check",
                    self.page.id()
                )));
            }
        }
        Ok(())
    }

    /// Merge every entry of this node into `left`, its immediate left
    /// sibling, demoting `demoted_key` (the separator between the two nodes
    /// in their parent) to bridge them. `left`'s old rightmost child becomes
    /// the demoted entry's child; this node's rightmost moves to `left`.
    /// Fails with `InvalidOperation` when `left` lacks the space.
    pub fn merge_left(&mut self, left: &mut Page, demoted_key: &Key) -> Result<()> {
        let mut left_node = InternalNode::attach(&mut *left, self.table)?;

        let bridge = encode_entry(&self.pk_columns, demoted_key, left_node.rightmost_child())?;
        let entries = self.all_raw_entries()?;
        let needed: usize =
            bridge.len() + SLOT_SIZE + entries.iter().map(|e| e.len() + SLOT_SIZE).sum::<usize>();
        if needed > left_node.page.free_space() {
            return Err(StorageError::invalid_operation(format!(
                "left sibling {} lacks space to absorb internal node {}",
                left_node.page.id(),
                self.page.id()
            )));
        }

        let mut slot = left_node.entry_count();
        if !left_node.page.try_add_record(&bridge, slot)? {
            return Err(StorageError::invariant(
                "merge overflow despite space check",
            ));
        }
        slot += 1;
        for bytes in &entries {
            if !left_node.page.try_add_record(bytes, slot)? {
                return Err(StorageError::invariant(
                    "merge overflow despite space check",
                ));
            }
            slot += 1;
        }
        left_node.set_rightmost_child(self.rightmost_child());

        let parent = self.page.parent_page_index();
        self.page.initialize(PageType::InternalNode, Some(parent));
        Ok(())
    }
}
