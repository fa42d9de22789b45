//! B+Tree core implementation.
//!
//! The tree owns nothing but its root page id; every page access goes
//! through the buffer pool and is released before the operation returns, so
//! node relationships exist only as page indices, never as object
//! references. Pin discipline is the load-bearing property here: search
//! holds one pin at a time, insert at most the current node plus the pages
//! of an in-flight split, and every exit path (including errors) drops all
//! pins through the guards.

use crate::btree::{internal, InternalNode, LeafNode};
use crate::buffer::{BufferPool, PageGuard};
use crate::error::{Result, StorageError};
use crate::page::PageType;
use crate::record;
use crate::schema::TableDefinition;
use crate::types::{DataValue, Key, PageId, INVALID_PAGE_INDEX};
use log::debug;
use std::cmp::Ordering;
use std::sync::Arc;

/// A clustered B+Tree index over one table
pub struct BTree {
    pool: Arc<BufferPool>,
    table: Arc<TableDefinition>,
    root_page_id: PageId,
    /// Table-header page persisting the root, absent when the tree was
    /// opened at an explicit root
    header_page_id: Option<PageId>,
}

impl BTree {
    /// Open the tree for `table`.
    ///
    /// With an explicit `root` the tree starts there and persists nothing.
    /// Otherwise page 0 of the table file is the source of truth: it is read
    /// as a table header, and on first open (no file, or a header without a
    /// root) the header and an empty root leaf are created.
    pub fn open(
        pool: Arc<BufferPool>,
        table: Arc<TableDefinition>,
        root: Option<PageId>,
    ) -> Result<Self> {
        // Resolve the primary key once so a bad definition fails here, not
        // mid-operation.
        table.primary_key_ordinals()?;

        if let Some(root) = root {
            return Ok(Self {
                pool,
                table,
                root_page_id: root,
                header_page_id: None,
            });
        }

        let header_id = PageId::new(table.table_id, 0);
        let root_index = match pool.fetch_page(header_id) {
            Ok(guard) => {
                let page_type = guard.read().page_type()?;
                match page_type {
                    PageType::TableHeader => {
                        let root_index = guard.read().root_page_index();
                        if root_index == INVALID_PAGE_INDEX {
                            drop(guard);
                            Self::plant_root(&pool, &table, header_id)?
                        } else {
                            root_index
                        }
                    }
                    // Allocated but never written: claim it as the header.
                    PageType::Invalid => {
                        guard.write().initialize(PageType::TableHeader, None);
                        drop(guard);
                        Self::plant_root(&pool, &table, header_id)?
                    }
                    other => {
                        return Err(StorageError::invalid_data(format!(
                            "page {header_id} is a {other:?}, not a table header"
                        )))
                    }
                }
            }
            Err(StorageError::CouldNotLoadPageFromDisk { .. }) => {
                let guard = pool.create_page(table.table_id)?;
                if guard.page_id() != header_id {
                    return Err(StorageError::invariant(format!(
                        "table {} file is unreadable but not empty",
                        table.table_id
                    )));
                }
                guard.write().initialize(PageType::TableHeader, None);
                drop(guard);
                Self::plant_root(&pool, &table, header_id)?
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            pool,
            root_page_id: PageId::new(table.table_id, root_index),
            table,
            header_page_id: Some(header_id),
        })
    }

    /// Create an empty root leaf and record it in the table header
    fn plant_root(
        pool: &Arc<BufferPool>,
        table: &Arc<TableDefinition>,
        header_id: PageId,
    ) -> Result<i32> {
        let root_index = {
            let guard = pool.create_page(table.table_id)?;
            LeafNode::initialize(guard.write(), table, None);
            guard.page_id().page_index
        };
        let guard = pool.fetch_page(header_id)?;
        guard.write().set_root_page_index(root_index);
        debug!("planted root leaf {}:{root_index}", table.table_id);
        Ok(root_index)
    }

    /// The table this tree indexes
    pub fn table(&self) -> &TableDefinition {
        &self.table
    }

    /// Current root page id. Changes only when the root splits.
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Point lookup: descend from the root and search the leaf.
    ///
    /// Exactly one page is pinned at any moment; all pins are gone on
    /// return.
    pub fn search(&self, key: &Key) -> Result<Option<Vec<DataValue>>> {
        let mut current = self.root_page_id;
        loop {
            let guard = self.pool.fetch_page(current)?;
            let page_type = guard.read().page_type()?;
            match page_type {
                PageType::LeafNode => {
                    let page = guard.read();
                    let leaf = LeafNode::attach(&*page, &self.table)?;
                    return leaf.search(key);
                }
                PageType::InternalNode => {
                    let child = {
                        let page = guard.read();
                        InternalNode::attach(&*page, &self.table)?.lookup_child(key)?
                    };
                    drop(guard);
                    current = current.sibling(child);
                }
                other => {
                    return Err(StorageError::invalid_data(format!(
                        "page {current} is a {other:?}, not a tree node"
                    )))
                }
            }
        }
    }

    /// Insert a row, splitting nodes as needed, up to and including growing
    /// a new root. An existing equal key fails with `DuplicateKey` before
    /// anything is touched.
    pub fn insert(&mut self, row: &[DataValue]) -> Result<()> {
        let key = self.table.key_of_row(row)?;

        // Descend to the leaf, recording the internal path as page ids; the
        // pins themselves are dropped as we go. Guards borrow the pool
        // through a local handle so they can cross into the split calls
        // below.
        let pool = Arc::clone(&self.pool);
        let mut path: Vec<PageId> = Vec::new();
        let mut current = self.root_page_id;
        let leaf_guard = loop {
            let guard = pool.fetch_page(current)?;
            let page_type = guard.read().page_type()?;
            match page_type {
                PageType::LeafNode => break guard,
                PageType::InternalNode => {
                    let child = {
                        let page = guard.read();
                        InternalNode::attach(&*page, &self.table)?.lookup_child(&key)?
                    };
                    drop(guard);
                    path.push(current);
                    current = current.sibling(child);
                }
                other => {
                    return Err(StorageError::invalid_data(format!(
                        "page {current} is a {other:?}, not a tree node"
                    )))
                }
            }
        };

        let inserted = {
            let mut page = leaf_guard.write();
            let mut leaf = LeafNode::attach(&mut *page, &self.table)?;
            leaf.try_insert(row)?
        };
        if inserted {
            return Ok(());
        }

        self.split_leaf_and_insert(leaf_guard, row, path)
    }

    /// Split a full leaf while inserting `row`, then propagate the separator
    /// upward
    fn split_leaf_and_insert(
        &mut self,
        leaf_guard: PageGuard<'_>,
        row: &[DataValue],
        mut path: Vec<PageId>,
    ) -> Result<()> {
        let leaf_id = leaf_guard.page_id();
        let (parent_index, old_next) = {
            let page = leaf_guard.read();
            (page.parent_page_index(), page.next_page_index())
        };

        let sibling_guard = self.pool.create_page(leaf_id.table_id)?;
        let sibling_id = sibling_guard.page_id();
        LeafNode::initialize(sibling_guard.write(), &self.table, Some(parent_index));

        let far_right_guard = if old_next != INVALID_PAGE_INDEX {
            Some(self.pool.fetch_page(leaf_id.sibling(old_next))?)
        } else {
            None
        };

        let separator = {
            let mut page = leaf_guard.write();
            let mut sibling = sibling_guard.write();
            let mut leaf = LeafNode::attach(&mut *page, &self.table)?;
            match &far_right_guard {
                Some(far_right) => {
                    let mut far_page = far_right.write();
                    leaf.split_and_insert(row, &mut *sibling, Some(&mut *far_page))?
                }
                None => leaf.split_and_insert(row, &mut *sibling, None)?,
            }
        };

        drop(far_right_guard);
        drop(sibling_guard);
        drop(leaf_guard);

        self.insert_into_parent(leaf_id, separator, sibling_id, &mut path)
    }

    /// Hook a freshly split child into its parent.
    ///
    /// The parent's pointer at `old_child` now covers only keys below the
    /// separator's upper bound, so it is repointed at `new_child` (which
    /// took the keys at or above the separator) and a new entry
    /// `(separator, old_child)` is inserted. A full parent splits in turn,
    /// recursing toward the root.
    fn insert_into_parent(
        &mut self,
        old_child: PageId,
        separator: Key,
        new_child: PageId,
        path: &mut Vec<PageId>,
    ) -> Result<()> {
        let Some(parent_id) = path.pop() else {
            return self.grow_root(old_child, separator, new_child);
        };

        let pool = Arc::clone(&self.pool);
        let parent_guard = pool.fetch_page(parent_id)?;
        let inserted = {
            let mut page = parent_guard.write();
            let mut node = InternalNode::attach(&mut *page, &self.table)?;
            node.replace_child(old_child.page_index, new_child.page_index)?;
            node.try_insert(&separator, old_child.page_index)?
        };
        if inserted {
            return Ok(());
        }

        self.split_internal_and_insert(parent_guard, separator, old_child, path)
    }

    /// Split a full internal node whose pending entry `(separator,
    /// old_child)` did not fit. The median entry's key is promoted and lives
    /// in neither half; its child covers exactly the keys between the two
    /// halves and becomes the left node's rightmost pointer, while the old
    /// rightmost moves to the new right sibling.
    fn split_internal_and_insert(
        &mut self,
        parent_guard: PageGuard<'_>,
        separator: Key,
        old_child: PageId,
        path: &mut Vec<PageId>,
    ) -> Result<()> {
        let parent_id = parent_guard.page_id();
        let pk_columns = self.table.primary_key_columns()?;

        let (mut entries, old_rightmost, parent_parent) = {
            let page = parent_guard.read();
            let node = InternalNode::attach(&*page, &self.table)?;
            (
                node.all_raw_entries()?,
                node.rightmost_child(),
                page.parent_page_index(),
            )
        };

        let pending = internal::encode_entry(&pk_columns, &separator, old_child.page_index)?;
        let position = {
            let mut low = 0;
            let mut high = entries.len();
            while low < high {
                let mid = low + (high - low) / 2;
                let (entry_key, _) = internal::decode_entry(&pk_columns, &entries[mid])?;
                match entry_key.compare(&separator)? {
                    Ordering::Less => low = mid + 1,
                    Ordering::Greater => high = mid,
                    Ordering::Equal => return Err(StorageError::duplicate_key(&separator)),
                }
            }
            low
        };
        entries.insert(position, pending);

        let mid = entries.len() / 2;
        let (promoted_key, median_child) = internal::decode_entry(&pk_columns, &entries[mid])?;

        let sibling_guard = self.pool.create_page(parent_id.table_id)?;
        let sibling_id = sibling_guard.page_id();
        {
            let mut page = sibling_guard.write();
            let mut sibling =
                InternalNode::initialize(&mut *page, &self.table, Some(parent_parent))?;
            sibling.repopulate(&entries[mid + 1..])?;
            sibling.set_rightmost_child(old_rightmost);
        }
        {
            let mut page = parent_guard.write();
            let mut node = InternalNode::attach(&mut *page, &self.table)?;
            node.repopulate(&entries[..mid])?;
            node.set_rightmost_child(median_child);
        }
        drop(parent_guard);

        debug!(
            "split internal {}: {} entries kept, {} to sibling {}, promoting {}",
            parent_id,
            mid,
            entries.len() - mid - 1,
            sibling_id,
            promoted_key
        );

        self.reparent_children(&sibling_guard, sibling_id)?;
        drop(sibling_guard);

        self.insert_into_parent(parent_id, promoted_key, sibling_id, path)
    }

    /// Point every child of a freshly filled internal node at it
    fn reparent_children(&self, guard: &PageGuard<'_>, parent: PageId) -> Result<()> {
        let children = {
            let page = guard.read();
            let node = InternalNode::attach(&*page, &self.table)?;
            let mut children = Vec::with_capacity(node.entry_count() + 1);
            for slot in 0..node.entry_count() {
                children.push(node.child_at(slot)?);
            }
            if node.rightmost_child() != INVALID_PAGE_INDEX {
                children.push(node.rightmost_child());
            }
            children
        };
        for child in children {
            let child_guard = self.pool.fetch_page(parent.sibling(child))?;
            child_guard.write().set_parent_page_index(parent.page_index);
        }
        Ok(())
    }

    /// The old root split: allocate a new internal root over both halves and
    /// persist it
    fn grow_root(&mut self, old_child: PageId, separator: Key, new_child: PageId) -> Result<()> {
        let root_guard = self.pool.create_page(self.table.table_id)?;
        let root_id = root_guard.page_id();
        {
            let mut page = root_guard.write();
            let mut root = InternalNode::initialize(&mut *page, &self.table, None)?;
            root.set_rightmost_child(new_child.page_index);
            if !root.try_insert(&separator, old_child.page_index)? {
                return Err(StorageError::invariant(
                    "fresh root cannot hold a single entry",
                ));
            }
        }
        drop(root_guard);

        for child in [old_child, new_child] {
            let guard = self.pool.fetch_page(child)?;
            guard.write().set_parent_page_index(root_id.page_index);
        }

        self.root_page_id = root_id;
        if let Some(header_id) = self.header_page_id {
            let guard = self.pool.fetch_page(header_id)?;
            guard.write().set_root_page_index(root_id.page_index);
        }
        debug!("root split: tree now rooted at {root_id}");
        Ok(())
    }

    /// Every row in key order, walking the leaf chain. Catalog bootstrap
    /// only; ordered scans are not part of the public surface.
    pub(crate) fn scan_all(&self) -> Result<Vec<Vec<DataValue>>> {
        let mut rows = Vec::new();
        let mut current = self.leftmost_leaf()?;
        loop {
            let guard = self.pool.fetch_page(current)?;
            let next = {
                let page = guard.read();
                let leaf = LeafNode::attach(&*page, &self.table)?;
                for raw in leaf.all_raw_records()? {
                    rows.push(record::deserialize(&self.table.columns, &raw)?);
                }
                page.next_page_index()
            };
            drop(guard);
            if next == INVALID_PAGE_INDEX {
                break;
            }
            current = current.sibling(next);
        }
        Ok(rows)
    }

    fn leftmost_leaf(&self) -> Result<PageId> {
        let mut current = self.root_page_id;
        loop {
            let guard = self.pool.fetch_page(current)?;
            let page_type = guard.read().page_type()?;
            match page_type {
                PageType::LeafNode => return Ok(current),
                PageType::InternalNode => {
                    let child = {
                        let page = guard.read();
                        let node = InternalNode::attach(&*page, &self.table)?;
                        if node.entry_count() > 0 {
                            node.child_at(0)?
                        } else {
                            node.rightmost_child()
                        }
                    };
                    drop(guard);
                    if child == INVALID_PAGE_INDEX {
                        return Err(StorageError::invariant(format!(
                            "internal node {current} has no children"
                        )));
                    }
                    current = current.sibling(child);
                }
                other => {
                    return Err(StorageError::invalid_data(format!(
                        "page {current} is a {other:?}, not a tree node"
                    )))
                }
            }
        }
    }
}

#[cfg(feature = "testing-api")]
impl BTree {
    /// Keys grouped by leaf, in chain order (testing only)
    pub fn leaf_chain_keys(&self) -> Result<Vec<Vec<Key>>> {
        let mut chains = Vec::new();
        let mut current = self.leftmost_leaf()?;
        loop {
            let guard = self.pool.fetch_page(current)?;
            let next = {
                let page = guard.read();
                let leaf = LeafNode::attach(&*page, &self.table)?;
                let mut keys = Vec::with_capacity(leaf.row_count());
                for slot in 0..leaf.row_count() {
                    keys.push(leaf.key_at(slot)?);
                }
                chains.push(keys);
                page.next_page_index()
            };
            drop(guard);
            if next == INVALID_PAGE_INDEX {
                break;
            }
            current = current.sibling(next);
        }
        Ok(chains)
    }

    /// All rows in key order (testing only)
    pub fn all_rows(&self) -> Result<Vec<Vec<DataValue>>> {
        self.scan_all()
    }
}
