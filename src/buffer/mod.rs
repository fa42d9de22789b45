//! Buffer pool: a bounded page cache with pin-based latching and LRU
//! eviction.

mod lru;
mod pool;

pub use pool::{BufferPool, PageGuard, PageRef, PageRefMut, PoolStats};
