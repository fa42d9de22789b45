//! Page layer: fixed-size page buffers and the slotted record layout.
//!
//! A [`Page`] is an 8 KiB buffer plus the [`PageId`] it holds. Pages live
//! inside buffer-pool frames; callers only ever reach one through a pin
//! guard, so a `Page` reference is valid exactly as long as its frame stays
//! pinned. The layout within a page is:
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                    Page Header                     │
//! ├────────────────────────────────────────────────────┤
//! │                     Slot Array                     │
//! │  [slot0][slot1][slot2]...      →                   │
//! ├────────────────────────────────────────────────────┤
//! │                                                    │
//! │                     Free Space                     │
//! │                                                    │
//! ├────────────────────────────────────────────────────┤
//! │                    Record Heap                     │
//! │      ←  [record2][record1][record0]                │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! The slot array is kept in logical key order; the record heap grows from
//! the end of the page toward the header and carries no ordering.

mod header;
mod slotted;

pub use header::PageType;

use crate::error::{Result, StorageError};
use crate::types::{PageId, PAGE_SIZE};

/// A raw page buffer
#[derive(Clone)]
pub struct PageBuf {
    data: [u8; PAGE_SIZE],
}

impl PageBuf {
    /// Create a new zeroed page buffer
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn zero(&mut self) {
        self.data.fill(0);
    }
}

impl Default for PageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::ops::DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

/// An owned fixed-size page: the buffer of one buffer-pool frame together
/// with the id of the page currently held in it.
pub struct Page {
    id: PageId,
    data: PageBuf,
}

impl Page {
    /// Create a zeroed page for the given id
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            data: PageBuf::new(),
        }
    }

    /// The id of the page held in this buffer
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Zero the buffer and rebind it to a new page id. Used by the buffer
    /// pool when a frame is reused.
    pub(crate) fn reset(&mut self, id: PageId) {
        self.id = id;
        self.data.zero();
    }

    /// Rebind the buffer to a new id without touching the bytes. Used by the
    /// buffer pool right before a disk read fills the buffer.
    pub(crate) fn rebind(&mut self, id: PageId) {
        self.id = id;
    }

    /// The full page bytes, for disk I/O
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// The full page bytes, mutable, for disk I/O
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_bytes_mut()
    }

    /// Read a little-endian `i32` at an arbitrary offset
    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        let bytes = self.read_bytes(offset, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a little-endian `i32` at an arbitrary offset
    pub fn write_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Read a little-endian `i64` at an arbitrary offset
    pub fn read_i64(&self, offset: usize) -> Result<i64> {
        let bytes = self.read_bytes(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    /// Write a little-endian `i64` at an arbitrary offset
    pub fn write_i64(&mut self, offset: usize, value: i64) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Borrow `len` bytes starting at `offset`, bounds-checked
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| StorageError::invalid_data("page offset overflow"))?;
        if end > PAGE_SIZE {
            return Err(StorageError::invalid_data(format!(
                "page read [{offset}, {end}) out of bounds on page {}",
                self.id
            )));
        }
        Ok(&self.data[offset..end])
    }

    /// Copy `bytes` into the page starting at `offset`, bounds-checked
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| StorageError::invalid_data("page offset overflow"))?;
        if end > PAGE_SIZE {
            return Err(StorageError::invalid_data(format!(
                "page write [{offset}, {end}) out of bounds on page {}",
                self.id
            )));
        }
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    // Infallible little-endian accessors for header fields at fixed,
    // compile-time-bounded offsets.
    pub(crate) fn i32_at(&self, offset: usize) -> i32 {
        i32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    pub(crate) fn put_i32(&mut self, offset: usize, value: i32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn i64_at(&self, offset: usize) -> i64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[offset..offset + 8]);
        i64::from_le_bytes(raw)
    }

    pub(crate) fn put_i64(&mut self, offset: usize, value: i64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut page = Page::new(PageId::new(1, 0));
        page.write_i32(100, -42).unwrap();
        page.write_i64(104, i64::MAX).unwrap();
        assert_eq!(page.read_i32(100).unwrap(), -42);
        assert_eq!(page.read_i64(104).unwrap(), i64::MAX);
    }

    #[test]
    fn test_bounds_enforced() {
        let mut page = Page::new(PageId::new(1, 0));
        assert!(page.read_i32(PAGE_SIZE - 3).is_err());
        assert!(page.write_at(PAGE_SIZE - 1, &[1, 2]).is_err());
        assert!(page.read_bytes(usize::MAX, 8).is_err());
        // The last valid positions still work.
        page.write_i32(PAGE_SIZE - 4, 7).unwrap();
        assert_eq!(page.read_i32(PAGE_SIZE - 4).unwrap(), 7);
    }

    #[test]
    fn test_reset_rebinds_and_zeroes() {
        let mut page = Page::new(PageId::new(1, 0));
        page.write_i32(0, 123).unwrap();
        page.reset(PageId::new(2, 9));
        assert_eq!(page.id(), PageId::new(2, 9));
        assert_eq!(page.read_i32(0).unwrap(), 0);
    }
}
