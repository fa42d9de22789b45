//! # relstore
//!
//! A persistent relational storage engine built from four layers:
//!
//! - **Storage Layer** (`storage`): page-granular disk I/O over one file per
//!   table
//! - **Page Layer** (`page`): fixed 8 KiB pages with a slotted record layout
//! - **Buffer Pool** (`buffer`): bounded page cache with pin-based latching
//!   and LRU eviction
//! - **B+Tree Layer** (`btree`): clustered indexes keyed by each table's
//!   primary key
//!
//! On top sits a thin engine that keeps a system catalog of table
//! definitions (itself an ordinary B+Tree) and routes row operations to the
//! right tree.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relstore::{Column, Config, DataValue, Key, PrimitiveType, StorageEngine};
//!
//! let engine = StorageEngine::open(Config::new("./data"))?;
//!
//! engine.create_table(
//!     "users",
//!     vec![
//!         Column::new("id", PrimitiveType::Int),
//!         Column::new("name", PrimitiveType::Varchar).max_length(100).nullable(true),
//!     ],
//!     vec!["id".into()],
//! )?;
//!
//! engine.insert("users", vec![DataValue::Int(1), DataValue::Varchar("ada".into())])?;
//! let row = engine.search("users", &Key::new(vec![DataValue::Int(1)]))?;
//!
//! engine.flush()?;
//! ```

pub mod btree;
pub mod buffer;
pub mod error;
pub mod page;
pub mod record;
pub mod schema;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use schema::{Column, PrimitiveType, TableDefinition};
pub use types::{DataValue, Key, PageId, PAGE_SIZE};

// Re-export main public API
pub use btree::BTree;
pub use buffer::{BufferPool, PageGuard, PoolStats};
pub use storage::{DiskManager, FileDiskManager};

use log::info;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Table id reserved for the system catalog
const CATALOG_TABLE_ID: i32 = 0;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one file per table
    pub base_dir: PathBuf,
    /// Buffer pool size in frames (default: 1000)
    pub buffer_pool_size: usize,
    /// Suffix of table files (default: ".tbl")
    pub file_extension: String,
    /// Whether to sync writes immediately (default: false for performance)
    pub sync_on_write: bool,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            buffer_pool_size: 1000,
            file_extension: ".tbl".into(),
            sync_on_write: false,
        }
    }

    /// Set buffer pool size
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    /// Set the table-file extension
    pub fn file_extension(mut self, ext: impl Into<String>) -> Self {
        self.file_extension = ext.into();
        self
    }

    /// Enable sync on write for durability
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }
}

struct TableHandle {
    definition: Arc<TableDefinition>,
    /// Writers to one tree are serialized here; the tree itself only
    /// supports independent page-level concurrency underneath.
    tree: RwLock<BTree>,
}

/// Main engine handle: a system catalog plus one clustered B+Tree per table
pub struct StorageEngine {
    config: Config,
    pool: Arc<BufferPool>,
    catalog: Mutex<BTree>,
    tables: RwLock<HashMap<String, Arc<TableHandle>>>,
    next_table_id: Mutex<i32>,
}

impl StorageEngine {
    /// Open or create an engine instance rooted at `config.base_dir`.
    ///
    /// Bootstraps the catalog tree and reopens a B+Tree for every table
    /// definition found in it.
    pub fn open(config: Config) -> Result<Self> {
        let disk = Arc::new(FileDiskManager::open(
            &config.base_dir,
            config.file_extension.clone(),
            config.sync_on_write,
        )?);
        let pool = Arc::new(BufferPool::new(
            Arc::clone(&disk) as Arc<dyn DiskManager>,
            config.buffer_pool_size,
        ));

        let catalog_def = Arc::new(Self::catalog_definition());
        let catalog = BTree::open(Arc::clone(&pool), catalog_def, None)?;

        let mut tables = HashMap::new();
        let mut max_table_id = CATALOG_TABLE_ID;
        for row in catalog.scan_all()? {
            let definition = Self::definition_from_catalog_row(&row)?;
            max_table_id = max_table_id.max(definition.table_id);
            let definition = Arc::new(definition);
            let tree = BTree::open(Arc::clone(&pool), Arc::clone(&definition), None)?;
            tables.insert(
                definition.name.clone(),
                Arc::new(TableHandle {
                    definition,
                    tree: RwLock::new(tree),
                }),
            );
        }
        info!(
            "opened storage engine at {:?} with {} table(s)",
            config.base_dir,
            tables.len()
        );

        Ok(Self {
            config,
            pool,
            catalog: Mutex::new(catalog),
            tables: RwLock::new(tables),
            next_table_id: Mutex::new(max_table_id + 1),
        })
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Schema of the catalog table itself
    fn catalog_definition() -> TableDefinition {
        TableDefinition::new(
            CATALOG_TABLE_ID,
            "system_tables",
            vec![
                Column::new("table_name", PrimitiveType::Varchar).max_length(128),
                Column::new("table_id", PrimitiveType::Int),
                Column::new("definition", PrimitiveType::Varchar),
            ],
            vec!["table_name".into()],
        )
    }

    fn definition_from_catalog_row(row: &[DataValue]) -> Result<TableDefinition> {
        let json = match row.get(2) {
            Some(DataValue::Varchar(json)) => json,
            _ => {
                return Err(StorageError::invalid_data(
                    "catalog row has no definition column",
                ))
            }
        };
        serde_json::from_str(json).map_err(|e| {
            StorageError::invalid_data(format!("catalog row holds malformed definition: {e}"))
        })
    }

    /// Create a table and its clustered index. The name must be new; the
    /// primary-key names must resolve against the columns.
    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<Column>,
        primary_key: Vec<String>,
    ) -> Result<Arc<TableDefinition>> {
        if name.is_empty() {
            return Err(StorageError::invalid_operation("table name may not be empty"));
        }
        if self.tables.read().contains_key(name) {
            return Err(StorageError::duplicate_key(name));
        }

        let table_id = {
            let mut next = self.next_table_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        let definition = TableDefinition::new(table_id, name, columns, primary_key);
        definition.primary_key_ordinals()?;
        let json = serde_json::to_string(&definition).map_err(|e| {
            StorageError::invalid_operation(format!("definition not serializable: {e}"))
        })?;

        // The catalog insert is the arbiter of name uniqueness; a racing
        // creator fails here with DuplicateKey.
        {
            let mut catalog = self.catalog.lock();
            catalog.insert(&[
                DataValue::Varchar(name.into()),
                DataValue::Int(table_id),
                DataValue::Varchar(json),
            ])?;
        }

        let definition = Arc::new(definition);
        let tree = BTree::open(Arc::clone(&self.pool), Arc::clone(&definition), None)?;
        self.tables.write().insert(
            name.to_string(),
            Arc::new(TableHandle {
                definition: Arc::clone(&definition),
                tree: RwLock::new(tree),
            }),
        );
        info!("created table '{name}' (id {table_id})");
        Ok(definition)
    }

    fn handle(&self, table: &str) -> Result<Arc<TableHandle>> {
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))
    }

    /// Definition of a table, if it exists
    pub fn table_definition(&self, table: &str) -> Result<Arc<TableDefinition>> {
        Ok(Arc::clone(&self.handle(table)?.definition))
    }

    /// Names of all user tables
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Insert a row into a table
    pub fn insert(&self, table: &str, row: Vec<DataValue>) -> Result<()> {
        let handle = self.handle(table)?;
        let mut tree = handle.tree.write();
        tree.insert(&row)
    }

    /// Look up a row by primary key
    pub fn search(&self, table: &str, key: &Key) -> Result<Option<Vec<DataValue>>> {
        let handle = self.handle(table)?;
        let tree = handle.tree.read();
        tree.search(key)
    }

    /// Write every dirty page back to disk; call before dropping the engine
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_all()
    }

    /// Engine-level statistics
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            table_count: self.tables.read().len(),
            pool: self.pool.stats(),
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Number of user tables
    pub table_count: usize,
    /// Buffer pool counters
    pub pool: PoolStats,
}
