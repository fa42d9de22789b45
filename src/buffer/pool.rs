//! Buffer pool implementation.
//!
//! The pool owns a fixed array of frames, each holding one page's bytes. A
//! page table maps resident page ids to frame indices; never-used frames sit
//! in a free list and unpinned resident frames in an LRU list whose head is
//! the next eviction victim.
//!
//! Two locks coordinate everything. The pool-level mutex guards the page
//! table, free list, LRU links, and per-frame bookkeeping (pin count, dirty
//! flag, busy flag); it is only ever held for short metadata transitions,
//! never across disk I/O. Each frame additionally carries an I/O latch that
//! serializes disk transfers for that frame: a task that finds a frame
//! `busy` (being loaded or evicted) releases the pool lock, blocks on the
//! latch, and retries, which is what coalesces concurrent loads of the same
//! absent page into a single disk read.

use crate::buffer::lru::LruList;
use crate::error::{Result, StorageError};
use crate::page::Page;
use crate::storage::DiskManager;
use crate::types::PageId;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

/// One frame: the page bytes plus the latch serializing its disk I/O
struct FrameCell {
    page: RwLock<Page>,
    io_latch: Mutex<()>,
}

/// Per-frame bookkeeping, guarded by the pool lock
struct FrameMeta {
    /// Page currently resident in the frame, if any
    page_id: Option<PageId>,
    /// Outstanding pins; only a frame with zero pins is in the LRU list
    pin_count: u32,
    /// Whether the bytes differ from disk
    dirty: bool,
    /// Set while a load or eviction owns the frame's I/O latch
    busy: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: None,
            pin_count: 0,
            dirty: false,
            busy: false,
        }
    }
}

struct PoolState {
    page_table: HashMap<PageId, usize>,
    free_list: Vec<usize>,
    lru: LruList,
    meta: Vec<FrameMeta>,
}

/// Buffer pool: a bounded page cache with pin-based latching and LRU
/// eviction
pub struct BufferPool {
    disk: Arc<dyn DiskManager>,
    frames: Vec<FrameCell>,
    state: Mutex<PoolState>,
}

/// Point-in-time counters for diagnosing the pool. A persistently high
/// `pinned_frames` means a caller is leaking pins.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub capacity: usize,
    pub resident_pages: usize,
    pub pinned_frames: usize,
    pub free_frames: usize,
}

impl BufferPool {
    /// Create a pool of `pool_size` frames over the given disk manager
    pub fn new(disk: Arc<dyn DiskManager>, pool_size: usize) -> Self {
        let frames = (0..pool_size)
            .map(|i| FrameCell {
                page: RwLock::new(Page::new(PageId::invalid(i as i32))),
                io_latch: Mutex::new(()),
            })
            .collect();
        let meta = (0..pool_size).map(|_| FrameMeta::empty()).collect();
        Self {
            disk,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list: (0..pool_size).rev().collect(),
                lru: LruList::new(pool_size),
                meta,
            }),
        }
    }

    /// Number of frames
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn disk(&self) -> &Arc<dyn DiskManager> {
        &self.disk
    }

    /// Fetch a page, reading it from disk on a miss. The returned guard pins
    /// the frame; dropping it unpins.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        if !page_id.is_valid() {
            return Err(StorageError::invalid_operation(format!(
                "fetch of invalid page id {page_id}"
            )));
        }
        loop {
            let busy_frame = {
                let mut state = self.state.lock();
                match state.page_table.get(&page_id).copied() {
                    Some(index) if state.meta[index].busy => index,
                    Some(index) => {
                        if state.meta[index].pin_count == 0 {
                            state.lru.remove(index);
                        }
                        state.meta[index].pin_count += 1;
                        return Ok(PageGuard::new(self, page_id, index));
                    }
                    None => {
                        drop(state);
                        match self.load_page(page_id)? {
                            Some(guard) => return Ok(guard),
                            // Lost an install race against another loader.
                            None => continue,
                        }
                    }
                }
            };
            // The frame is mid-load or mid-eviction; wait for its I/O to
            // finish, then re-evaluate from scratch.
            drop(self.frames[busy_frame].io_latch.lock());
        }
    }

    /// Allocate a fresh page on disk and pin it in a zeroed frame, marked
    /// dirty
    pub fn create_page(&self, table_id: i32) -> Result<PageGuard<'_>> {
        let page_id = self.disk.allocate_page(table_id)?;
        let index = self.acquire_frame()?;
        {
            let mut page = self.frames[index].page.write();
            page.reset(page_id);
        }
        let mut state = self.state.lock();
        state.page_table.insert(page_id, index);
        let meta = &mut state.meta[index];
        meta.page_id = Some(page_id);
        meta.pin_count = 1;
        meta.dirty = true;
        meta.busy = false;
        drop(state);
        debug!("created page {page_id} in frame {index}");
        Ok(PageGuard::new(self, page_id, index))
    }

    /// Bring an absent page into a frame. Returns `None` when another loader
    /// installed the page first; the caller retries and takes the hit path.
    fn load_page(&self, page_id: PageId) -> Result<Option<PageGuard<'_>>> {
        let index = self.acquire_frame()?;
        let cell = &self.frames[index];
        let io_latch = cell.io_latch.lock();

        {
            let mut state = self.state.lock();
            if state.page_table.contains_key(&page_id) {
                state.free_list.push(index);
                return Ok(None);
            }
            state.page_table.insert(page_id, index);
            let meta = &mut state.meta[index];
            meta.page_id = Some(page_id);
            meta.pin_count = 0;
            meta.dirty = false;
            meta.busy = true;
        }

        debug!("loading page {page_id} into frame {index}");
        let read_result = {
            let mut page = cell.page.write();
            page.rebind(page_id);
            self.disk.read_page(page_id, page.as_bytes_mut())
        };

        let mut state = self.state.lock();
        match read_result {
            Ok(()) => {
                let meta = &mut state.meta[index];
                meta.busy = false;
                meta.pin_count = 1;
                drop(state);
                drop(io_latch);
                Ok(Some(PageGuard::new(self, page_id, index)))
            }
            Err(source) => {
                state.page_table.remove(&page_id);
                state.meta[index] = FrameMeta::empty();
                state.free_list.push(index);
                drop(state);
                drop(io_latch);
                Err(StorageError::CouldNotLoadPageFromDisk {
                    page_id,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Take a frame out of circulation: pop the free list, or evict the LRU
    /// victim (writing it back if dirty). On return the frame is unmapped
    /// and invisible to every other task.
    fn acquire_frame(&self) -> Result<usize> {
        let (index, page_id, dirty) = {
            let mut state = self.state.lock();
            if let Some(index) = state.free_list.pop() {
                return Ok(index);
            }
            let Some(index) = state.lru.pop_front() else {
                return Err(StorageError::BufferPoolFull);
            };
            let meta = &mut state.meta[index];
            debug_assert_eq!(meta.pin_count, 0);
            let Some(page_id) = meta.page_id else {
                return Err(StorageError::invariant(format!(
                    "frame {index} in LRU list holds no page"
                )));
            };
            meta.busy = true;
            (index, page_id, meta.dirty)
        };

        let io_latch = self.frames[index].io_latch.lock();
        if dirty {
            debug!("evicting dirty page {page_id} from frame {index}");
            let write_result = {
                let page = self.frames[index].page.read();
                self.disk.write_page(page_id, page.as_bytes())
            };
            if let Err(source) = write_result {
                // The victim stays resident and dirty; put it back where it
                // was, at the cold end.
                let mut state = self.state.lock();
                state.meta[index].busy = false;
                state.lru.push_front(index);
                drop(state);
                drop(io_latch);
                return Err(StorageError::CouldNotFlushToDisk {
                    page_id,
                    source: Box::new(source),
                });
            }
        } else {
            debug!("evicting clean page {page_id} from frame {index}");
        }

        let mut state = self.state.lock();
        state.page_table.remove(&page_id);
        state.meta[index] = FrameMeta::empty();
        Ok(index)
    }

    /// Release one pin. Unpinning a page that is not resident, or a frame
    /// whose pin count is already zero, is a caller bug and fails with
    /// `InvalidOperation`.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let mut state = self.state.lock();
        let Some(&index) = state.page_table.get(&page_id) else {
            return Err(StorageError::invalid_operation(format!(
                "unpin of page {page_id} which is not resident"
            )));
        };
        let meta = &mut state.meta[index];
        if meta.pin_count == 0 {
            return Err(StorageError::invalid_operation(format!(
                "unpin of page {page_id} whose pin count is zero"
            )));
        }
        meta.pin_count -= 1;
        meta.dirty |= is_dirty;
        if meta.pin_count == 0 {
            state.lru.push_back(index);
        }
        Ok(())
    }

    /// Write one page back to disk if it is resident and dirty
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let index = {
            let state = self.state.lock();
            match state.page_table.get(&page_id).copied() {
                Some(index) if state.meta[index].dirty && !state.meta[index].busy => index,
                _ => return Ok(()),
            }
        };
        self.flush_frame(index)
    }

    /// Write every dirty resident page back to disk. Used at shutdown.
    pub fn flush_all(&self) -> Result<()> {
        for index in 0..self.frames.len() {
            self.flush_frame(index)?;
        }
        Ok(())
    }

    fn flush_frame(&self, index: usize) -> Result<()> {
        let _io_latch = self.frames[index].io_latch.lock();
        let page_id = {
            let state = self.state.lock();
            let meta = &state.meta[index];
            match meta.page_id {
                Some(page_id) if meta.dirty && !meta.busy => page_id,
                _ => return Ok(()),
            }
        };
        debug!("flushing page {page_id} from frame {index}");
        let write_result = {
            let page = self.frames[index].page.read();
            self.disk.write_page(page_id, page.as_bytes())
        };
        write_result.map_err(|source| StorageError::CouldNotFlushToDisk {
            page_id,
            source: Box::new(source),
        })?;
        let mut state = self.state.lock();
        let meta = &mut state.meta[index];
        if meta.page_id == Some(page_id) {
            meta.dirty = false;
        }
        Ok(())
    }

    /// Counters for diagnostics; `pinned_frames` staying high across calls
    /// points at a pin leak
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.frames.len(),
            resident_pages: state.page_table.len(),
            pinned_frames: state.meta.iter().filter(|m| m.pin_count > 0).count(),
            free_frames: state.free_list.len(),
        }
    }
}

#[cfg(feature = "testing-api")]
impl BufferPool {
    /// Pin count of a resident page (testing only)
    pub fn pin_count_of(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let &index = state.page_table.get(&page_id)?;
        Some(state.meta[index].pin_count)
    }

    /// Dirty flag of a resident page (testing only)
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.state.lock();
        let &index = state.page_table.get(&page_id)?;
        Some(state.meta[index].dirty)
    }

    /// Total pins across all frames (testing only)
    pub fn total_pinned(&self) -> usize {
        let state = self.state.lock();
        state
            .meta
            .iter()
            .map(|m| m.pin_count as usize)
            .sum()
    }
}

/// RAII pin on a resident page.
///
/// The guard is the only way to reach a page's bytes, which ties the
/// lifetime of every [`Page`] reference to its pin: the frame cannot be
/// evicted or reused while the guard lives, and dropping the guard releases
/// the pin on every exit path.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame_index: usize,
    dirty: Cell<bool>,
}

impl<'a> std::fmt::Debug for PageGuard<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_index", &self.frame_index)
            .field("dirty", &self.dirty.get())
            .finish()
    }
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPool, page_id: PageId, frame_index: usize) -> Self {
        Self {
            pool,
            page_id,
            frame_index,
            dirty: Cell::new(false),
        }
    }

    /// Id of the pinned page
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Shared access to the page bytes
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.pool.frames[self.frame_index].page.read(),
        }
    }

    /// Exclusive access to the page bytes; marks the page dirty
    pub fn write(&self) -> PageRefMut<'_> {
        self.dirty.set(true);
        PageRefMut {
            guard: self.pool.frames[self.frame_index].page.write(),
        }
    }

    /// Mark the page dirty without touching it
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.unpin_page(self.page_id, self.dirty.get()) {
            // A failed unpin means pool bookkeeping is already wrong; there
            // is nothing a destructor can do beyond reporting it.
            warn!("unpin of page {} failed: {e}", self.page_id);
        }
    }
}

/// Shared reference to a pinned page
pub struct PageRef<'a> {
    guard: RwLockReadGuard<'a, Page>,
}

impl std::ops::Deref for PageRef<'_> {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// Exclusive reference to a pinned page
pub struct PageRefMut<'a> {
    guard: RwLockWriteGuard<'a, Page>,
}

impl std::ops::Deref for PageRefMut<'_> {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl std::ops::DerefMut for PageRefMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
