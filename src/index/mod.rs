//! # Index manager
//!
//! Owns every secondary [`BTree`](crate::btree::BTree) index across every
//! `(database, table, column)` triple, a registry file recording which
//! indexes exist, and a per-column query-frequency counter that drives
//! auto-indexing.
//!
//! The manager knows nothing about row schemas — it only ever sees a
//! column's already-extracted value as an opaque byte string. Building a
//! new index from a table's full row store, and extracting a column's
//! value from a row, are both the caller's job (the table layer, which
//! this crate does not implement); the manager's [`should_auto_index`]
//! tells the caller *when* that work is worth doing.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::btree::{BTree, BTreeError};

const REGISTRY_FILENAME: &str = "index_metadata.json";
const INDEXES_DIR: &str = "indexes";

#[derive(Debug, Error)]
pub enum IndexManagerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("index error: {0}")]
    BTree(#[from] BTreeError),

    #[error("index already exists for {db}.{table}.{column}")]
    AlreadyExists { db: String, table: String, column: String },

    #[error("no index for {db}.{table}.{column}")]
    NotFound { db: String, table: String, column: String },
}

/// Whether the manager is allowed to synthesize indexes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoIndexing {
    On,
    Off,
}

/// Auto-indexing knobs (C9).
#[derive(Debug, Clone, Copy)]
pub struct IndexManagerConfig {
    /// Number of non-indexed lookups on a column before it becomes a
    /// candidate for auto-indexing.
    pub index_auto_threshold: u64,

    /// Maximum number of indexes a single table may accumulate via
    /// auto-indexing (explicit `create` calls are not capped by this).
    pub index_max_per_table: usize,

    /// Master switch for auto-indexing.
    pub auto_indexing: AutoIndexing,
}

impl Default for IndexManagerConfig {
    fn default() -> Self {
        IndexManagerConfig {
            index_auto_threshold: 100,
            index_max_per_table: 5,
            auto_indexing: AutoIndexing::On,
        }
    }
}

type IndexKey = (String, String, String);

fn index_key(db: &str, table: &str, column: &str) -> IndexKey {
    (db.to_string(), table.to_string(), column.to_string())
}

fn index_path(data_dir: &str, db: &str, table: &str, column: &str) -> PathBuf {
    Path::new(data_dir)
        .join(db)
        .join(table)
        .join(INDEXES_DIR)
        .join(format!("{column}.idx"))
}

// ------------------------------------------------------------------------------------------------
// Registry (index_metadata.json — real JSON via serde_json)
// ------------------------------------------------------------------------------------------------

/// One registered index, as recorded in `index_metadata.json`.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryEntry {
    db: String,
    table: String,
    column: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Registry {
    indexes: Vec<RegistryEntry>,
}

impl Registry {
    fn from_entries(entries: Vec<IndexKey>) -> Self {
        Registry {
            indexes: entries
                .into_iter()
                .map(|(db, table, column)| RegistryEntry { db, table, column })
                .collect(),
        }
    }

    fn into_entries(self) -> Vec<IndexKey> {
        self.indexes
            .into_iter()
            .map(|e| (e.db, e.table, e.column))
            .collect()
    }

    fn load(path: &Path) -> Result<Self, IndexManagerError> {
        if !path.exists() {
            return Ok(Registry { indexes: Vec::new() });
        }
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        if buf.is_empty() {
            return Ok(Registry { indexes: Vec::new() });
        }
        let registry: Registry = serde_json::from_slice(&buf)?;
        Ok(registry)
    }

    fn save(&self, path: &Path) -> Result<(), IndexManagerError> {
        let buf = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
            f.write_all(&buf)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        if let Some(parent) = path.parent() {
            if parent.as_os_str().len() > 0 && parent.exists() {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// IndexManager
// ------------------------------------------------------------------------------------------------

/// Owns every secondary index under a single data root.
pub struct IndexManager {
    data_dir: String,
    config: IndexManagerConfig,
    indexes: RwLock<HashMap<IndexKey, Arc<RwLock<BTree>>>>,
    miss_counters: RwLock<HashMap<IndexKey, u64>>,
}

impl IndexManager {
    /// Opens the manager over `data_dir`, loading the registry and every
    /// index file it names.
    pub fn open(data_dir: &str, config: IndexManagerConfig) -> Result<Self, IndexManagerError> {
        let registry_path = Path::new(data_dir).join(REGISTRY_FILENAME);
        let registry = Registry::load(&registry_path)?;

        let mut indexes = HashMap::new();
        for (db, table, column) in registry.into_entries() {
            let path = index_path(data_dir, &db, &table, &column);
            let tree = BTree::load(&path)?;
            indexes.insert(index_key(&db, &table, &column), Arc::new(RwLock::new(tree)));
        }

        info!(loaded = indexes.len(), "index manager: opened");

        Ok(IndexManager {
            data_dir: data_dir.to_string(),
            config,
            indexes: RwLock::new(indexes),
            miss_counters: RwLock::new(HashMap::new()),
        })
    }

    /// Whether an index already exists for this column.
    pub fn has_index(&self, db: &str, table: &str, column: &str) -> bool {
        self.indexes.read().unwrap().contains_key(&index_key(db, table, column))
    }

    /// Builds a new index from `rows` (already-extracted column values per
    /// row id) and persists it. Fails if one already exists for this
    /// column.
    pub fn create(
        &self,
        db: &str,
        table: &str,
        column: &str,
        rows: impl Iterator<Item = (u64, Option<Vec<u8>>)>,
    ) -> Result<(), IndexManagerError> {
        let key = index_key(db, table, column);

        {
            let indexes = self.indexes.read().unwrap();
            if indexes.contains_key(&key) {
                return Err(IndexManagerError::AlreadyExists {
                    db: db.into(),
                    table: table.into(),
                    column: column.into(),
                });
            }
        }

        let mut tree = BTree::new();
        for (row_id, value) in rows {
            tree.insert(value.as_deref(), row_id);
        }

        let path = index_path(&self.data_dir, db, table, column);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tree.save(&path)?;

        {
            let mut indexes = self.indexes.write().unwrap();
            indexes.insert(key.clone(), Arc::new(RwLock::new(tree)));
        }
        self.persist_registry()?;

        info!(db, table, column, "index manager: created index");
        Ok(())
    }

    /// Removes the in-memory entry, deletes its file, and updates the
    /// registry.
    pub fn drop(&self, db: &str, table: &str, column: &str) -> Result<(), IndexManagerError> {
        let key = index_key(db, table, column);

        {
            let mut indexes = self.indexes.write().unwrap();
            if indexes.remove(&key).is_none() {
                return Err(IndexManagerError::NotFound {
                    db: db.into(),
                    table: table.into(),
                    column: column.into(),
                });
            }
        }

        let path = index_path(&self.data_dir, db, table, column);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.persist_registry()?;

        info!(db, table, column, "index manager: dropped index");
        Ok(())
    }

    /// Applies an insert delta to every index on `table` that the caller
    /// supplies a column value for. `columns` pairs each indexed column's
    /// name with the new row's value for it (only columns that are
    /// actually indexed need to be present — extras are ignored).
    pub fn on_insert(
        &self,
        db: &str,
        table: &str,
        row_id: u64,
        columns: &[(&str, Option<&[u8]>)],
    ) -> Result<(), IndexManagerError> {
        self.apply_delta(db, table, columns, |tree, value, _old| {
            tree.insert(value, row_id);
        })
    }

    /// Applies an update delta: removes `row_id` from the old value's set
    /// and inserts it under the new value.
    pub fn on_update(
        &self,
        db: &str,
        table: &str,
        row_id: u64,
        columns: &[(&str, Option<&[u8]>, Option<&[u8]>)],
    ) -> Result<(), IndexManagerError> {
        let pairs: Vec<(&str, Option<&[u8]>)> =
            columns.iter().map(|(c, _old, new)| (*c, *new)).collect();
        self.apply_delta(db, table, &pairs, |tree, new_value, idx| {
            if let Some(old_value) = columns[idx].1 {
                tree.remove(old_value, row_id);
            }
            tree.insert(new_value, row_id);
        })
    }

    /// Applies a delete delta to every index on `table`.
    pub fn on_delete(
        &self,
        db: &str,
        table: &str,
        row_id: u64,
        columns: &[(&str, Option<&[u8]>)],
    ) -> Result<(), IndexManagerError> {
        self.apply_delta(db, table, columns, |tree, value, _old| {
            if let Some(value) = value {
                tree.remove(value, row_id);
            }
        })
    }

    fn apply_delta(
        &self,
        db: &str,
        table: &str,
        columns: &[(&str, Option<&[u8]>)],
        mut op: impl FnMut(&mut BTree, Option<&[u8]>, usize),
    ) -> Result<(), IndexManagerError> {
        let mut touched: Vec<String> = Vec::new();

        {
            let indexes = self.indexes.read().unwrap();
            for (idx, (column, value)) in columns.iter().enumerate() {
                let key = index_key(db, table, column);
                if let Some(tree_lock) = indexes.get(&key) {
                    let mut tree = tree_lock.write().unwrap();
                    op(&mut tree, *value, idx);
                    touched.push((*column).to_string());
                }
            }
        }

        for column in &touched {
            self.persist_index(db, table, column)?;
        }
        Ok(())
    }

    fn persist_index(&self, db: &str, table: &str, column: &str) -> Result<(), IndexManagerError> {
        let key = index_key(db, table, column);
        let indexes = self.indexes.read().unwrap();
        if let Some(tree_lock) = indexes.get(&key) {
            let tree = tree_lock.read().unwrap();
            let path = index_path(&self.data_dir, db, table, column);
            tree.save(&path)?;
        }
        Ok(())
    }

    fn persist_registry(&self) -> Result<(), IndexManagerError> {
        let indexes = self.indexes.read().unwrap();
        let entries: Vec<IndexKey> = indexes.keys().cloned().collect();
        drop(indexes);

        let registry = Registry::from_entries(entries);
        let registry_path = Path::new(&self.data_dir).join(REGISTRY_FILENAME);
        registry.save(&registry_path)
    }

    /// Returns the row ids equal to `value`, or `None` if no index exists
    /// (the caller should fall back to a full scan). A miss increments the
    /// column's query-frequency counter.
    pub fn find_rows(&self, db: &str, table: &str, column: &str, value: &[u8]) -> Option<std::collections::BTreeSet<u64>> {
        let key = index_key(db, table, column);
        let found = {
            let indexes = self.indexes.read().unwrap();
            indexes.get(&key).map(|tree_lock| tree_lock.read().unwrap().find(value))
        };

        if found.is_none() {
            self.record_miss(&key);
        }
        found
    }

    /// Returns the row ids indexed under any value in `[lo, hi]`, or
    /// `None` if no index exists. Also drives the miss counter.
    pub fn find_rows_in_range(
        &self,
        db: &str,
        table: &str,
        column: &str,
        lo: &[u8],
        hi: &[u8],
    ) -> Option<std::collections::BTreeSet<u64>> {
        let key = index_key(db, table, column);
        let found = {
            let indexes = self.indexes.read().unwrap();
            indexes.get(&key).map(|tree_lock| tree_lock.read().unwrap().find_range(lo, hi))
        };

        if found.is_none() {
            self.record_miss(&key);
        }
        found
    }

    fn record_miss(&self, key: &IndexKey) {
        let mut counters = self.miss_counters.write().unwrap();
        *counters.entry(key.clone()).or_insert(0) += 1;
    }

    /// Whether `(db, table, column)` has crossed the auto-indexing
    /// threshold and the table still has room for another auto-built
    /// index. The caller is responsible for actually calling
    /// [`Self::create`] with a fresh row stream when this returns `true`.
    pub fn should_auto_index(&self, db: &str, table: &str, column: &str) -> bool {
        if self.config.auto_indexing == AutoIndexing::Off {
            return false;
        }

        let key = index_key(db, table, column);
        if self.indexes.read().unwrap().contains_key(&key) {
            return false;
        }

        let misses = *self.miss_counters.read().unwrap().get(&key).unwrap_or(&0);
        if misses < self.config.index_auto_threshold {
            return false;
        }

        let table_index_count = self
            .indexes
            .read()
            .unwrap()
            .keys()
            .filter(|(d, t, _)| d == db && t == table)
            .count();

        if table_index_count >= self.config.index_max_per_table {
            debug!(db, table, column, table_index_count, "index manager: auto-index skipped, per-table limit reached");
            return false;
        }

        true
    }
}
