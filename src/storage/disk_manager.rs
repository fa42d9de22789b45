//! Disk manager implementation.
//!
//! The disk manager maps `(table_id, page_index)` to a byte range inside a
//! per-table file and provides page-granular reads and writes. It is
//! abstracted behind a trait so the rest of the system can be tested with
//! mock implementations.

use crate::error::{Result, StorageError};
use crate::types::{PageId, PAGE_SIZE};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trait for page-granular disk I/O
///
/// Callers coordinate concurrent access to the same page through the buffer
/// pool's per-frame latches; the disk manager only guarantees that one
/// seek+transfer pair on a given table file is atomic with respect to
/// another.
pub trait DiskManager: Send + Sync {
    /// Read exactly one page into `buf`. Fails with an I/O error if the
    /// table file is absent or the page index lies past the end of the file.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()>;

    /// Write exactly one page, creating the file if absent and zero-filling
    /// any gap below the write offset.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Extend the table file by one page of zeros and return the new page's
    /// id. The new index is `file_length / PAGE_SIZE`; a non-aligned tail
    /// (possible only from a partial prior write) is treated as unreferenced
    /// padding.
    fn allocate_page(&self, table_id: i32) -> Result<PageId>;

    /// Idempotently ensure the table file exists
    fn create_table_file(&self, table_id: i32) -> Result<()>;
}

/// File-based disk manager: one file per table under a base directory
pub struct FileDiskManager {
    base_dir: PathBuf,
    extension: String,
    sync_on_write: bool,
    /// Open file handles, keyed by table id
    files: RwLock<HashMap<i32, Arc<Mutex<File>>>>,
}

impl FileDiskManager {
    /// Create a disk manager rooted at `base_dir`, creating the directory if
    /// needed. `extension` is the table-file suffix, e.g. `".tbl"`.
    pub fn open(
        base_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        sync_on_write: bool,
    ) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            extension: extension.into(),
            sync_on_write,
            files: RwLock::new(HashMap::new()),
        })
    }

    /// Path of a table's file
    pub fn table_path(&self, table_id: i32) -> PathBuf {
        self.base_dir
            .join(format!("{}{}", table_id, self.extension))
    }

    /// Whether a table file exists on disk
    pub fn table_file_exists(&self, table_id: i32) -> bool {
        self.table_path(table_id).exists()
    }

    fn check_page_args(page_id: PageId, len: usize) -> Result<()> {
        if !page_id.is_valid() {
            return Err(StorageError::invalid_operation(format!(
                "I/O on invalid page id {page_id}"
            )));
        }
        if len != PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page buffer must be {PAGE_SIZE} bytes, got {len}"
            )));
        }
        Ok(())
    }

    /// Get the cached handle for a table file, opening it if needed.
    /// `create` controls whether a missing file is created or surfaces the
    /// underlying NotFound error.
    fn handle(&self, table_id: i32, create: bool) -> Result<Arc<Mutex<File>>> {
        {
            let files = self.files.read();
            if let Some(file) = files.get(&table_id) {
                return Ok(Arc::clone(file));
            }
        }

        let file = open_table_file(&self.table_path(table_id), create)?;
        let file = Arc::new(Mutex::new(file));
        let mut files = self.files.write();
        // A racing opener may have beaten us here; keep the first handle so
        // every caller shares one seek lock per table.
        Ok(Arc::clone(
            files.entry(table_id).or_insert_with(|| file),
        ))
    }
}

fn open_table_file(path: &Path, create: bool) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        Self::check_page_args(page_id, buf.len())?;
        let handle = self.handle(page_id.table_id, false)?;
        let mut file = handle.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        Self::check_page_args(page_id, data.len())?;
        let handle = self.handle(page_id.table_id, true)?;
        let mut file = handle.lock();

        let offset = page_id.file_offset(PAGE_SIZE);
        let len = file.metadata()?.len();
        if len < offset {
            // Zero-fill the gap so pages below the write stay readable.
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if self.sync_on_write {
            file.sync_data()?;
        }
        Ok(())
    }

    fn allocate_page(&self, table_id: i32) -> Result<PageId> {
        let handle = self.handle(table_id, true)?;
        let file = handle.lock();

        let len = file.metadata()?.len();
        let page_index = (len / PAGE_SIZE as u64) as i32;
        file.set_len((page_index as u64 + 1) * PAGE_SIZE as u64)?;
        if self.sync_on_write {
            file.sync_data()?;
        }
        debug!("allocated page {}:{}", table_id, page_index);
        Ok(PageId::new(table_id, page_index))
    }

    fn create_table_file(&self, table_id: i32) -> Result<()> {
        self.handle(table_id, true)?;
        Ok(())
    }
}
