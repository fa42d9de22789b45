//! Error types for the storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Insert of a key that already exists in a node
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Update or delete of a key that does not exist
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// Operation against a table the engine does not know
    #[error("table '{0}' is not defined")]
    TableNotFound(String),

    /// No free frame and no evictable (unpinned) frame
    #[error("buffer pool exhausted: no free or evictable frame")]
    BufferPoolFull,

    /// Disk read failed while bringing a page into the pool
    #[error("could not load page {page_id} from disk")]
    CouldNotLoadPageFromDisk {
        page_id: PageId,
        #[source]
        source: Box<StorageError>,
    },

    /// Dirty write-back failed during eviction or shutdown
    #[error("could not flush page {page_id} to disk")]
    CouldNotFlushToDisk {
        page_id: PageId,
        #[source]
        source: Box<StorageError>,
    },

    /// Malformed page header, malformed serialized record, or a primary-key
    /// column marked null on disk
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Precondition violation by the caller
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Detected corruption of the B+Tree structure; fatal
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl StorageError {
    /// Create an invalid data error with a message
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a duplicate key error from a displayable key
    pub fn duplicate_key(key: impl std::fmt::Display) -> Self {
        Self::DuplicateKey(key.to_string())
    }

    /// Create a record not found error from a displayable key
    pub fn record_not_found(key: impl std::fmt::Display) -> Self {
        Self::RecordNotFound(key.to_string())
    }
}
