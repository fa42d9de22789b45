//! End-to-end B+Tree scenarios: root splits, promotion into a parent with
//! room, recursive splits that stop at the root, and recursive splits that
//! grow the tree.
//!
//! The multi-level trees are constructed page by page so each scenario
//! starts from an exact shape.

use relstore::btree::{BTree, InternalNode, LeafNode};
use relstore::buffer::BufferPool;
use relstore::page::Page;
use relstore::schema::{Column, PrimitiveType, TableDefinition};
use relstore::storage::FileDiskManager;
use relstore::types::{DataValue, Key, PageId, INVALID_PAGE_INDEX};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn fixture(table: TableDefinition, pool_size: usize) -> (TempDir, Arc<BufferPool>, Arc<TableDefinition>) {
    let dir = tempdir().unwrap();
    let dm = Arc::new(FileDiskManager::open(dir.path(), ".tbl", false).unwrap());
    let pool = Arc::new(BufferPool::new(dm, pool_size));
    (dir, pool, Arc::new(table))
}

fn int_key(id: i32) -> Key {
    Key::new(vec![DataValue::Int(id)])
}

/// Scenario 1: empty tree, then a single insert/search roundtrip.
#[test]
fn empty_tree_insert_then_search() {
    let table = TableDefinition::new(
        1,
        "items",
        vec![
            Column::new("Id", PrimitiveType::Int),
            Column::new("Data", PrimitiveType::Varchar)
                .max_length(100)
                .nullable(true),
        ],
        vec!["Id".into()],
    );
    let (_dir, pool, table) = fixture(table, 16);
    let mut tree = BTree::open(pool, table, None).unwrap();

    assert_eq!(tree.search(&int_key(100)).unwrap(), None);

    let row = vec![DataValue::Int(100), DataValue::Varchar("Hello World".into())];
    tree.insert(&row).unwrap();
    assert_eq!(tree.search(&int_key(100)).unwrap(), Some(row));
}

/// Scenario 2: three large rows share the root leaf; the fourth splits it
/// and the tree grows its first internal root.
#[test]
fn root_split_on_fourth_large_row() {
    let table = TableDefinition::new(
        1,
        "big",
        vec![
            Column::new("ID", PrimitiveType::Int),
            Column::new("LargeData", PrimitiveType::Varchar)
                .max_length(4000)
                .nullable(true),
        ],
        vec!["ID".into()],
    );
    let (_dir, pool, table) = fixture(table, 16);
    let mut tree = BTree::open(Arc::clone(&pool), Arc::clone(&table), None).unwrap();

    let data = "A".repeat(2500);
    let row = |id: i32| vec![DataValue::Int(id), DataValue::Varchar(data.clone())];

    let leaf_root = tree.root_page_id();
    tree.insert(&row(10)).unwrap();
    tree.insert(&row(20)).unwrap();
    tree.insert(&row(30)).unwrap();
    // Still one leaf.
    assert_eq!(tree.root_page_id(), leaf_root);

    tree.insert(&row(40)).unwrap();
    let new_root = tree.root_page_id();
    assert_ne!(new_root, leaf_root);

    {
        let guard = pool.fetch_page(new_root).unwrap();
        let page = guard.read();
        let root = InternalNode::attach(&*page, &table).unwrap();
        assert_eq!(root.entry_count(), 1);
    }
    for id in [10, 20, 30, 40] {
        assert_eq!(tree.search(&int_key(id)).unwrap(), Some(row(id)));
    }
}

/// Page-by-page construction helpers for scenarios 3-5.
struct TreeBuilder {
    pool: Arc<BufferPool>,
    table: Arc<TableDefinition>,
}

impl TreeBuilder {
    fn new_leaf(&self, rows: &[Vec<DataValue>]) -> PageId {
        let guard = self.pool.create_page(self.table.table_id).unwrap();
        let mut leaf = LeafNode::initialize(guard.write(), &self.table, None);
        for row in rows {
            assert!(leaf.try_insert(row).unwrap());
        }
        guard.page_id()
    }

    fn new_internal(&self, entries: &[(Key, PageId)], rightmost: PageId) -> PageId {
        let guard = self.pool.create_page(self.table.table_id).unwrap();
        let mut node = InternalNode::initialize(guard.write(), &self.table, None).unwrap();
        node.set_rightmost_child(rightmost.page_index);
        for (key, child) in entries {
            assert!(node.try_insert(key, child.page_index).unwrap());
        }
        guard.page_id()
    }

    fn chain_leaves(&self, leaves: &[PageId]) {
        for pair in leaves.windows(2) {
            let left = self.pool.fetch_page(pair[0]).unwrap();
            left.write().set_next_page_index(pair[1].page_index);
            let right = self.pool.fetch_page(pair[1]).unwrap();
            right.write().set_prev_page_index(pair[0].page_index);
        }
    }

    fn set_parent(&self, parent: PageId, children: &[PageId]) {
        for child in children {
            let guard = self.pool.fetch_page(*child).unwrap();
            guard.write().set_parent_page_index(parent.page_index);
        }
    }

    fn with_page<R>(&self, id: PageId, f: impl FnOnce(&Page) -> R) -> R {
        let guard = self.pool.fetch_page(id).unwrap();
        let page = guard.read();
        f(&page)
    }
}

fn varchar_table() -> TableDefinition {
    TableDefinition::new(
        1,
        "wide",
        vec![
            Column::new("KeyData", PrimitiveType::Varchar).max_length(3000),
            Column::new("Val", PrimitiveType::Int).nullable(true),
        ],
        vec!["KeyData".into()],
    )
}

fn wide_key(c: char) -> Key {
    Key::new(vec![DataValue::Varchar(c.to_string().repeat(3000))])
}

fn wide_row(c: char, val: i32) -> Vec<DataValue> {
    vec![
        DataValue::Varchar(c.to_string().repeat(3000)),
        DataValue::Int(val),
    ]
}

/// Scenario 3: a leaf split whose promotion fits in the parent. The parent
/// absorbs the separator and the root never hears about it.
#[test]
fn leaf_split_absorbed_by_parent() {
    let table = TableDefinition::new(
        1,
        "items",
        vec![
            Column::new("Id", PrimitiveType::Int),
            Column::new("Data", PrimitiveType::Varchar)
                .max_length(3000)
                .nullable(true),
        ],
        vec!["Id".into()],
    );
    let (_dir, pool, table) = fixture(table, 16);
    let b = TreeBuilder {
        pool: Arc::clone(&pool),
        table: Arc::clone(&table),
    };

    let data = "A".repeat(2700);
    let row = |id: i32| vec![DataValue::Int(id), DataValue::Varchar(data.clone())];

    let left_leaf = b.new_leaf(&[row(10), row(30)]);
    let right_leaf = b.new_leaf(&[row(80)]);
    let parent = b.new_internal(&[(int_key(50), left_leaf)], right_leaf);
    let grandroot = b.new_internal(&[], parent);

    b.chain_leaves(&[left_leaf, right_leaf]);
    b.set_parent(parent, &[left_leaf, right_leaf]);
    b.set_parent(grandroot, &[parent]);

    let mut tree = BTree::open(Arc::clone(&pool), Arc::clone(&table), Some(grandroot)).unwrap();
    tree.insert(&vec![DataValue::Int(20), DataValue::Varchar("X".repeat(3000))])
        .unwrap();

    // Root unchanged, parent now routes through the promoted median 20.
    assert_eq!(tree.root_page_id(), grandroot);
    let (keys, children, rightmost) = b.with_page(parent, |page| {
        let node = InternalNode::attach(page, &table).unwrap();
        let keys: Vec<Key> = (0..node.entry_count())
            .map(|i| node.key_at(i).unwrap())
            .collect();
        let children: Vec<i32> = (0..node.entry_count())
            .map(|i| node.child_at(i).unwrap())
            .collect();
        (keys, children, node.rightmost_child())
    });
    assert_eq!(keys, vec![int_key(20), int_key(50)]);
    // The old leaf keeps the keys below 20; the split's new right half took
    // over the (20 -> 50) range.
    assert_eq!(children[0], left_leaf.page_index);
    assert_ne!(children[1], left_leaf.page_index);
    assert_eq!(rightmost, right_leaf.page_index);

    for id in [10, 20, 30, 80] {
        assert!(tree.search(&int_key(id)).unwrap().is_some(), "key {id} lost");
    }
}

/// Scenario 4: a split cascades into a full parent, which splits in turn;
/// the root absorbs the promoted key and the tree keeps its height.
#[test]
fn recursive_split_stops_at_root() {
    let (_dir, pool, table) = fixture(varchar_table(), 24);
    let b = TreeBuilder {
        pool: Arc::clone(&pool),
        table: Arc::clone(&table),
    };

    let leaf1 = b.new_leaf(&[wide_row('A', 1), wide_row('C', 2)]);
    let leaf2 = b.new_leaf(&[wide_row('E', 3), wide_row('F', 4)]);
    let leaf3 = b.new_leaf(&[wide_row('G', 5), wide_row('H', 6)]);
    let leaf_mn = b.new_leaf(&[wide_row('M', 7), wide_row('N', 8)]);

    // Two separators of 3 KB keys leave no room for a third: the parent is
    // full at capacity 2.
    let parent = b.new_internal(&[(wide_key('E'), leaf1), (wide_key('G'), leaf2)], leaf3);
    let dummy = b.new_internal(&[], leaf_mn);
    let root = b.new_internal(&[(wide_key('M'), parent)], dummy);

    b.chain_leaves(&[leaf1, leaf2, leaf3, leaf_mn]);
    b.set_parent(parent, &[leaf1, leaf2, leaf3]);
    b.set_parent(dummy, &[leaf_mn]);
    b.set_parent(root, &[parent, dummy]);

    let mut tree = BTree::open(Arc::clone(&pool), Arc::clone(&table), Some(root)).unwrap();
    tree.insert(&wide_row('B', 9)).unwrap();

    // The root absorbed the promoted E without the tree growing.
    assert_eq!(tree.root_page_id(), root);
    let root_keys = b.with_page(root, |page| {
        let node = InternalNode::attach(page, &table).unwrap();
        (0..node.entry_count())
            .map(|i| node.key_at(i).unwrap())
            .collect::<Vec<_>>()
    });
    assert_eq!(root_keys, vec![wide_key('E'), wide_key('M')]);

    for c in ['A', 'B', 'C', 'E', 'F', 'G', 'H', 'M', 'N'] {
        assert!(
            tree.search(&wide_key(c)).unwrap().is_some(),
            "key {c} lost"
        );
    }
}

/// Scenario 5: the promotion chain reaches a full root; a new root is
/// allocated and the tree grows one level.
#[test]
fn recursive_split_grows_tree() {
    let (_dir, pool, table) = fixture(varchar_table(), 24);
    let b = TreeBuilder {
        pool: Arc::clone(&pool),
        table: Arc::clone(&table),
    };

    let leaf1 = b.new_leaf(&[wide_row('A', 1), wide_row('C', 2)]);
    let leaf2 = b.new_leaf(&[wide_row('E', 3), wide_row('F', 4)]);
    let leaf3 = b.new_leaf(&[wide_row('G', 5), wide_row('H', 6)]);
    let leaf_mn = b.new_leaf(&[wide_row('M', 7), wide_row('N', 8)]);
    let leaf_uv = b.new_leaf(&[wide_row('U', 9), wide_row('V', 10)]);

    let parent_a = b.new_internal(&[(wide_key('E'), leaf1), (wide_key('G'), leaf2)], leaf3);
    let parent_b = b.new_internal(&[], leaf_mn);
    let parent_c = b.new_internal(&[], leaf_uv);
    // The root is full too: the promotion out of parent_a cannot fit.
    let root = b.new_internal(
        &[(wide_key('M'), parent_a), (wide_key('T'), parent_b)],
        parent_c,
    );

    b.chain_leaves(&[leaf1, leaf2, leaf3, leaf_mn, leaf_uv]);
    b.set_parent(parent_a, &[leaf1, leaf2, leaf3]);
    b.set_parent(parent_b, &[leaf_mn]);
    b.set_parent(parent_c, &[leaf_uv]);
    b.set_parent(root, &[parent_a, parent_b, parent_c]);

    let mut tree = BTree::open(Arc::clone(&pool), Arc::clone(&table), Some(root)).unwrap();
    tree.insert(&wide_row('B', 11)).unwrap();

    let new_root = tree.root_page_id();
    assert_ne!(new_root, root);
    let (count, first_child) = b.with_page(new_root, |page| {
        let node = InternalNode::attach(page, &table).unwrap();
        (node.entry_count(), node.child_at(0).unwrap())
    });
    assert_eq!(count, 1);
    // The old root's page holds the lower half under the new root.
    assert_eq!(first_child, root.page_index);

    for c in ['A', 'B', 'C', 'E', 'F', 'G', 'H', 'M', 'N', 'U', 'V'] {
        assert!(
            tree.search(&wide_key(c)).unwrap().is_some(),
            "key {c} lost"
        );
    }

    // The leaf chain is intact and strictly ordered after the cascade.
    let chains = tree.leaf_chain_keys().unwrap();
    let flat: Vec<Key> = chains.into_iter().flatten().collect();
    for pair in flat.windows(2) {
        assert_eq!(
            pair[0].compare(&pair[1]).unwrap(),
            std::cmp::Ordering::Less
        );
    }
}

/// Leaf sibling links after a split in the middle of the chain.
#[test]
fn split_repairs_sibling_links() {
    let (_dir, pool, table) = fixture(varchar_table(), 24);
    let b = TreeBuilder {
        pool: Arc::clone(&pool),
        table: Arc::clone(&table),
    };

    let leaf1 = b.new_leaf(&[wide_row('A', 1), wide_row('C', 2)]);
    let leaf2 = b.new_leaf(&[wide_row('G', 3)]);
    let parent = b.new_internal(&[(wide_key('G'), leaf1)], leaf2);
    b.chain_leaves(&[leaf1, leaf2]);
    b.set_parent(parent, &[leaf1, leaf2]);

    let mut tree = BTree::open(Arc::clone(&pool), Arc::clone(&table), Some(parent)).unwrap();
    tree.insert(&wide_row('B', 4)).unwrap();

    let sibling = b.with_page(leaf1, |page| page.next_page_index());
    assert_ne!(sibling, INVALID_PAGE_INDEX);
    assert_ne!(sibling, leaf2.page_index);

    let sibling_id = leaf1.sibling(sibling);
    let (prev, next) = b.with_page(sibling_id, |page| {
        (page.prev_page_index(), page.next_page_index())
    });
    assert_eq!(prev, leaf1.page_index);
    assert_eq!(next, leaf2.page_index);

    let far_prev = b.with_page(leaf2, |page| page.prev_page_index());
    assert_eq!(far_prev, sibling);
}
