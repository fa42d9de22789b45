//! Page header field accessors.
//!
//! The header occupies the first [`HEADER_SIZE`](crate::types::HEADER_SIZE)
//! bytes of every page, little-endian, at fixed offsets:
//!
//! ```text
//! Offset  Size  Field
//! 0       8     pageLsn (reserved for a future WAL; always written as 0)
//! 8       4     pageType
//! 12      4     itemCount
//! 16      4     dataStartOffset
//! 20      4     parentPageIndex
//! 24      4     prevPageIndex (leaf only)
//! 28      4     nextPageIndex (leaf only)
//! 32      4     rightmostChildPageIndex (internal only)
//! 36      4     rootPageIndex (table header only)
//! ```

use crate::error::{Result, StorageError};
use crate::page::Page;

const LSN_OFFSET: usize = 0;
const PAGE_TYPE_OFFSET: usize = 8;
const ITEM_COUNT_OFFSET: usize = 12;
const DATA_START_OFFSET: usize = 16;
const PARENT_OFFSET: usize = 20;
const PREV_OFFSET: usize = 24;
const NEXT_OFFSET: usize = 28;
const RIGHTMOST_CHILD_OFFSET: usize = 32;
const ROOT_OFFSET: usize = 36;

/// What a page holds
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Freshly allocated, never initialized
    Invalid = 0,
    /// B+Tree leaf: full rows, sibling-linked
    LeafNode = 1,
    /// B+Tree internal node: separator keys and child pointers
    InternalNode = 2,
    /// First page of a table file: holds the tree's root page index
    TableHeader = 3,
}

impl PageType {
    /// Decode the on-disk value; unknown values mean a corrupt header
    pub fn from_i32(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::LeafNode),
            2 => Ok(Self::InternalNode),
            3 => Ok(Self::TableHeader),
            other => Err(StorageError::invalid_data(format!(
                "unknown page type {other}"
            ))),
        }
    }
}

impl Page {
    /// The reserved WAL sequence number; always 0 in this engine
    pub fn page_lsn(&self) -> i64 {
        self.i64_at(LSN_OFFSET)
    }

    pub(crate) fn set_page_lsn(&mut self, lsn: i64) {
        self.put_i64(LSN_OFFSET, lsn);
    }

    /// Decode the page type; `Invalid` for a zeroed page
    pub fn page_type(&self) -> Result<PageType> {
        PageType::from_i32(self.i32_at(PAGE_TYPE_OFFSET))
    }

    pub(crate) fn set_page_type(&mut self, page_type: PageType) {
        self.put_i32(PAGE_TYPE_OFFSET, page_type as i32);
    }

    /// Number of slots currently in use
    pub fn item_count(&self) -> usize {
        self.i32_at(ITEM_COUNT_OFFSET).max(0) as usize
    }

    pub(crate) fn set_item_count(&mut self, count: usize) {
        self.put_i32(ITEM_COUNT_OFFSET, count as i32);
    }

    /// Low-water mark of the record heap; `PAGE_SIZE` when the heap is empty
    pub fn data_start_offset(&self) -> usize {
        self.i32_at(DATA_START_OFFSET).max(0) as usize
    }

    pub(crate) fn set_data_start_offset(&mut self, offset: usize) {
        self.put_i32(DATA_START_OFFSET, offset as i32);
    }

    /// Parent node's page index, or `INVALID_PAGE_INDEX` at the root
    pub fn parent_page_index(&self) -> i32 {
        self.i32_at(PARENT_OFFSET)
    }

    pub fn set_parent_page_index(&mut self, index: i32) {
        self.put_i32(PARENT_OFFSET, index);
    }

    /// Previous leaf sibling, or `INVALID_PAGE_INDEX`
    pub fn prev_page_index(&self) -> i32 {
        self.i32_at(PREV_OFFSET)
    }

    pub fn set_prev_page_index(&mut self, index: i32) {
        self.put_i32(PREV_OFFSET, index);
    }

    /// Next leaf sibling, or `INVALID_PAGE_INDEX`
    pub fn next_page_index(&self) -> i32 {
        self.i32_at(NEXT_OFFSET)
    }

    pub fn set_next_page_index(&mut self, index: i32) {
        self.put_i32(NEXT_OFFSET, index);
    }

    /// Internal node's trailing child pointer, handling keys greater than or
    /// equal to the largest separator
    pub fn rightmost_child_page_index(&self) -> i32 {
        self.i32_at(RIGHTMOST_CHILD_OFFSET)
    }

    pub fn set_rightmost_child_page_index(&mut self, index: i32) {
        self.put_i32(RIGHTMOST_CHILD_OFFSET, index);
    }

    /// Root of the B+Tree, on a table-header page
    pub fn root_page_index(&self) -> i32 {
        self.i32_at(ROOT_OFFSET)
    }

    pub fn set_root_page_index(&mut self, index: i32) {
        self.put_i32(ROOT_OFFSET, index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PageId, INVALID_PAGE_INDEX, PAGE_SIZE};

    #[test]
    fn test_header_field_roundtrip() {
        let mut page = Page::new(PageId::new(1, 4));
        page.set_page_lsn(0);
        page.set_page_type(PageType::LeafNode);
        page.set_item_count(5);
        page.set_data_start_offset(PAGE_SIZE - 100);
        page.set_parent_page_index(2);
        page.set_prev_page_index(INVALID_PAGE_INDEX);
        page.set_next_page_index(6);

        assert_eq!(page.page_lsn(), 0);
        assert_eq!(page.page_type().unwrap(), PageType::LeafNode);
        assert_eq!(page.item_count(), 5);
        assert_eq!(page.data_start_offset(), PAGE_SIZE - 100);
        assert_eq!(page.parent_page_index(), 2);
        assert_eq!(page.prev_page_index(), INVALID_PAGE_INDEX);
        assert_eq!(page.next_page_index(), 6);
    }

    #[test]
    fn test_zeroed_page_is_invalid() {
        let page = Page::new(PageId::new(1, 0));
        assert_eq!(page.page_type().unwrap(), PageType::Invalid);
    }

    #[test]
    fn test_unknown_page_type_is_corruption() {
        let mut page = Page::new(PageId::new(1, 0));
        page.write_i32(8, 99).unwrap();
        assert!(page.page_type().is_err());
    }
}
