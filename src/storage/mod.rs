//! Storage layer: disk I/O abstraction over per-table files.

mod disk_manager;

pub use disk_manager::{DiskManager, FileDiskManager};
