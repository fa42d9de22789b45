//! Property tests over the serializer, the slotted page, and the tree.

use proptest::prelude::*;
use relstore::btree::BTree;
use relstore::buffer::BufferPool;
use relstore::page::{Page, PageType};
use relstore::record;
use relstore::schema::{Column, PrimitiveType, TableDefinition};
use relstore::storage::FileDiskManager;
use relstore::types::{DataValue, Key, PageId, SLOT_SIZE};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

fn wide_schema() -> Vec<Column> {
    vec![
        Column::new("id", PrimitiveType::Int),
        Column::new("flag", PrimitiveType::Boolean).nullable(true),
        Column::new("count", PrimitiveType::BigInt).nullable(true),
        Column::new("score", PrimitiveType::Float).nullable(true),
        Column::new("stamp", PrimitiveType::DateTime).nullable(true),
        Column::new("amount", PrimitiveType::Decimal).nullable(true),
        Column::new("name", PrimitiveType::Varchar)
            .max_length(64)
            .nullable(true),
        Column::new("payload", PrimitiveType::Blob).nullable(true),
    ]
}

type WideRowInput = (
    i32,
    Option<bool>,
    Option<i64>,
    Option<f64>,
    Option<i64>,
    Option<i128>,
    Option<String>,
    Option<Vec<u8>>,
);

fn wide_row_strategy() -> impl Strategy<Value = WideRowInput> {
    (
        any::<i32>(),
        proptest::option::of(any::<bool>()),
        proptest::option::of(any::<i64>()),
        proptest::option::of(-1e12f64..1e12f64),
        proptest::option::of(any::<i64>()),
        proptest::option::of(any::<i128>()),
        proptest::option::of("[a-zA-Z0-9 ]{0,48}"),
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
    )
}

fn to_row(input: WideRowInput) -> Vec<DataValue> {
    let (id, flag, count, score, stamp, amount, name, payload) = input;
    vec![
        DataValue::Int(id),
        flag.map_or(DataValue::Null, DataValue::Boolean),
        count.map_or(DataValue::Null, DataValue::BigInt),
        score.map_or(DataValue::Null, DataValue::Float),
        stamp.map_or(DataValue::Null, DataValue::DateTime),
        amount.map_or(DataValue::Null, DataValue::Decimal),
        name.map_or(DataValue::Null, DataValue::Varchar),
        payload.map_or(DataValue::Null, DataValue::Blob),
    ]
}

proptest! {
    /// `deserialize . serialize` is the identity on rows that fit the
    /// schema.
    #[test]
    fn serializer_bijection(input in wide_row_strategy()) {
        let columns = wide_schema();
        let row = to_row(input);
        let bytes = record::serialize(&columns, &row).unwrap();
        let back = record::deserialize(&columns, &bytes).unwrap();
        prop_assert_eq!(back, row);
    }

    /// Key extraction agrees with full deserialization.
    #[test]
    fn primary_key_extraction_matches_row(input in wide_row_strategy()) {
        let table = TableDefinition::new(
            1,
            "wide",
            wide_schema(),
            vec!["id".into()],
        );
        let row = to_row(input);
        let bytes = record::serialize(&table.columns, &row).unwrap();
        let key = record::deserialize_primary_key(&table, &bytes).unwrap();
        prop_assert_eq!(key, Key::new(vec![row[0].clone()]));
    }

    /// `free_space` never lies: an add within the reported space always
    /// succeeds, and one beyond it always fails.
    #[test]
    fn free_space_law(sizes in proptest::collection::vec(1usize..400, 1..120)) {
        let mut page = Page::new(PageId::new(1, 0));
        page.initialize(PageType::LeafNode, None);
        for size in sizes {
            let record = vec![0xAB; size];
            let free = page.free_space();
            let index = page.item_count();
            let added = page.try_add_record(&record, index).unwrap();
            prop_assert_eq!(added, free >= size + SLOT_SIZE);
            if !added {
                break;
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Inserting any duplicate-free key set leaves every row findable, no
    /// other key findable, the leaf chain strictly ordered, and every pin
    /// released.
    #[test]
    fn insert_search_roundtrip(ids in proptest::collection::hash_set(0i32..50_000, 1..120)) {
        let dir = tempfile::tempdir().unwrap();
        let dm = Arc::new(FileDiskManager::open(dir.path(), ".tbl", false).unwrap());
        // Small pool so inserts also exercise eviction.
        let pool = Arc::new(BufferPool::new(dm, 8));
        let table = Arc::new(TableDefinition::new(
            1,
            "items",
            vec![
                Column::new("id", PrimitiveType::Int),
                Column::new("data", PrimitiveType::Varchar).nullable(true),
            ],
            vec!["id".into()],
        ));
        let mut tree = BTree::open(Arc::clone(&pool), table, None).unwrap();

        let data_for = |id: i32| "d".repeat((id % 251) as usize + 1);
        for &id in &ids {
            tree.insert(&[
                DataValue::Int(id),
                DataValue::Varchar(data_for(id)),
            ]).unwrap();
        }
        prop_assert_eq!(pool.total_pinned(), 0);

        // A repeated insert fails cleanly and leaks no pins.
        let &any_id = ids.iter().next().unwrap();
        prop_assert!(tree.insert(&[DataValue::Int(any_id), DataValue::Null]).is_err());
        prop_assert_eq!(pool.total_pinned(), 0);

        for &id in &ids {
            let row = tree.search(&Key::new(vec![DataValue::Int(id)])).unwrap();
            prop_assert_eq!(
                row,
                Some(vec![DataValue::Int(id), DataValue::Varchar(data_for(id))])
            );
        }
        let missing: Vec<i32> = (0..5).map(|i| 50_000 + i).collect();
        for id in missing {
            prop_assert_eq!(tree.search(&Key::new(vec![DataValue::Int(id)])).unwrap(), None);
        }
        prop_assert_eq!(pool.total_pinned(), 0);

        // Order preservation along the sibling chain, each key in exactly
        // one leaf.
        let chains = tree.leaf_chain_keys().unwrap();
        let flat: Vec<Key> = chains.into_iter().flatten().collect();
        prop_assert_eq!(flat.len(), ids.len());
        let mut seen = HashSet::new();
        for key in &flat {
            match &key.values()[0] {
                DataValue::Int(id) => prop_assert!(seen.insert(*id)),
                other => prop_assert!(false, "unexpected key value {:?}", other),
            }
        }
        for pair in flat.windows(2) {
            prop_assert_eq!(pair[0].compare(&pair[1]).unwrap(), Ordering::Less);
        }
    }
}
