//! # B-tree secondary index
//!
//! A disk-persisted B-tree mapping an indexed column's byte-encoded value to
//! the set of row identifiers that hold it. Used by [`crate::index`] to back
//! secondary indexes so equality and range predicates on a non-primary
//! column can be answered without a full table scan.
//!
//! ## Shape
//!
//! Classic CLRS B-tree (not a B+tree): every node, leaf or internal, stores
//! `(key, row-id set)` pairs directly, in sorted order. Splitting happens
//! on the way down during insertion so a single top-down pass suffices —
//! no child ever needs to be revisited. Minimum degree is fixed at
//! [`MIN_DEGREE`] (128), giving every non-root node a fan-out between 128
//! and 256 children.
//!
//! Children are owned directly (`Box<Node>`), with no parent back-pointers;
//! all traversals are top-down and carry their own path context.
//!
//! ## Deletion
//!
//! Deletion only ever removes a row id from a key's value set. If that
//! empties the set and the key lives in a leaf, the key is physically
//! shifted out of the leaf's arrays. If the key lives in an internal node,
//! it is left in place with an empty value set — it still routes traversal
//! correctly, it just answers "no rows" for that key. This avoids CLRS's
//! borrow-from-sibling/merge machinery for internal-node deletion entirely;
//! the cost is that internal nodes never shrink, which is fine for a
//! structure that is overwhelmingly insert- and lookup-dominated.
//!
//! ## Persistence
//!
//! The whole tree is serialized as a single blob via the crate's
//! [`crate::encoding`] module — a leading schema version byte, then the
//! entry count and node graph — and written to a `.idx` file using the
//! same write-to-temp/fsync/rename-then-fsync-dir sequence the manifest
//! uses for its snapshots.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};

/// Minimum degree `t`: non-root nodes hold between `t - 1` and `2t - 1`
/// keys, giving a fan-out of `t` to `2t` children.
pub const MIN_DEGREE: usize = 128;
const MAX_KEYS: usize = 2 * MIN_DEGREE - 1;

/// On-disk `.idx` schema version, written as the first byte of every file
/// produced by [`BTree::save`] and validated first by [`BTree::load`].
const BTREE_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum BTreeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("corrupt index file: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Node
// ------------------------------------------------------------------------------------------------

struct Node {
    keys: Vec<Vec<u8>>,
    values: Vec<BTreeSet<u64>>,
    children: Vec<Box<Node>>,
}

impl Node {
    fn leaf() -> Self {
        Node {
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn is_full(&self) -> bool {
        self.keys.len() >= MAX_KEYS
    }
}

/// Splits the full child at `child_idx` into two nodes of `MIN_DEGREE - 1`
/// keys each, promoting the median key into `parent`.
fn split_child_impl(parent: &mut Node, child_idx: usize) {
    let mid = MIN_DEGREE - 1;

    let mut child = std::mem::replace(&mut parent.children[child_idx], Box::new(Node::leaf()));

    let median_key = child.keys[mid].clone();
    let median_value = std::mem::take(&mut child.values[mid]);

    let right_keys = child.keys.split_off(mid + 1);
    let right_values = child.values.split_off(mid + 1);
    child.keys.truncate(mid);
    child.values.truncate(mid);

    let right_children = if child.is_leaf() {
        Vec::new()
    } else {
        child.children.split_off(mid + 1)
    };

    let right = Box::new(Node {
        keys: right_keys,
        values: right_values,
        children: right_children,
    });

    parent.children[child_idx] = child;
    parent.children.insert(child_idx + 1, right);
    parent.keys.insert(child_idx, median_key);
    parent.values.insert(child_idx, median_value);
}

/// Inserts `row_id` under `key` into a node known not to be full.
fn insert_nonfull(node: &mut Node, key: &[u8], row_id: u64) {
    match node.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
        Ok(idx) => {
            node.values[idx].insert(row_id);
        }
        Err(idx) => {
            if node.is_leaf() {
                let mut set = BTreeSet::new();
                set.insert(row_id);
                node.keys.insert(idx, key.to_vec());
                node.values.insert(idx, set);
            } else {
                if node.children[idx].is_full() {
                    split_child_impl(node, idx);
                    // After the split, the key we want may now belong to
                    // the promoted key itself or the new right child.
                    match node.keys[idx].as_slice().cmp(key) {
                        std::cmp::Ordering::Equal => {
                            node.values[idx].insert(row_id);
                            return;
                        }
                        std::cmp::Ordering::Less => {
                            insert_nonfull(&mut node.children[idx + 1], key, row_id);
                            return;
                        }
                        std::cmp::Ordering::Greater => {
                            insert_nonfull(&mut node.children[idx], key, row_id);
                            return;
                        }
                    }
                }
                insert_nonfull(&mut node.children[idx], key, row_id);
            }
        }
    }
}

/// Removes `row_id` from `key`'s value set, shift-deleting the key out of
/// its leaf if the set becomes empty. Internal-node entries are left in
/// place (with an empty set) rather than rebalanced. Returns `true` if
/// `row_id` was present.
fn remove_in(node: &mut Node, key: &[u8], row_id: u64) -> (bool, bool) {
    match node.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
        Ok(idx) => {
            let removed = node.values[idx].remove(&row_id);
            let emptied = removed && node.values[idx].is_empty();
            if emptied && node.is_leaf() {
                node.keys.remove(idx);
                node.values.remove(idx);
            }
            (removed, emptied)
        }
        Err(idx) => {
            if node.is_leaf() {
                (false, false)
            } else {
                remove_in(&mut node.children[idx], key, row_id)
            }
        }
    }
}

fn find_in(node: &Node, key: &[u8]) -> BTreeSet<u64> {
    match node.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
        Ok(idx) => node.values[idx].clone(),
        Err(idx) => {
            if node.is_leaf() {
                BTreeSet::new()
            } else {
                find_in(&node.children[idx], key)
            }
        }
    }
}

/// In-order walk collecting row ids whose key falls within `[lo, hi]`
/// (either bound `None` meaning unbounded). Skips subtrees that the
/// bounds rule out entirely.
fn range_collect(node: &Node, lo: Option<&[u8]>, hi: Option<&[u8]>, out: &mut BTreeSet<u64>) {
    for i in 0..node.keys.len() {
        if !node.is_leaf() {
            // Child i holds keys strictly between keys[i-1] and keys[i];
            // skip it only if that whole interval falls outside [lo, hi].
            let left_bound = if i == 0 { None } else { Some(node.keys[i - 1].as_slice()) };
            let could_overlap = hi.is_none_or(|hi| left_bound.is_none_or(|lb| lb <= hi))
                && lo.is_none_or(|lo| node.keys[i].as_slice() >= lo);
            if could_overlap {
                range_collect(&node.children[i], lo, hi, out);
            }
        }

        let key = node.keys[i].as_slice();
        let above_lo = lo.is_none_or(|lo| key >= lo);
        let below_hi = hi.is_none_or(|hi| key <= hi);
        if above_lo && below_hi {
            out.extend(node.values[i].iter().copied());
        }
    }

    if !node.is_leaf() {
        // The rightmost child holds keys greater than keys.last(); skip it
        // only if that lower bound already exceeds hi.
        let rightmost_lower_bound = node.keys.last().map(|k| k.as_slice());
        if hi.is_none_or(|hi| rightmost_lower_bound.is_none_or(|lb| lb <= hi)) {
            range_collect(node.children.last().expect("internal node has n+1 children"), lo, hi, out);
        }
    }
}

fn collect_all(node: &Node, out: &mut Vec<(Vec<u8>, BTreeSet<u64>)>) {
    for i in 0..node.keys.len() {
        if !node.is_leaf() {
            collect_all(&node.children[i], out);
        }
        if !node.values[i].is_empty() {
            out.push((node.keys[i].clone(), node.values[i].clone()));
        }
    }
    if !node.is_leaf() {
        collect_all(node.children.last().expect("internal node has n+1 children"), out);
    }
}

// ------------------------------------------------------------------------------------------------
// Node (de)serialization
// ------------------------------------------------------------------------------------------------

impl Encode for Node {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        (self.keys.len() as u32).encode_to(buf)?;
        for key in &self.keys {
            key.encode_to(buf)?;
        }
        for value in &self.values {
            let rows: Vec<u64> = value.iter().copied().collect();
            encoding::encode_vec(&rows, buf)?;
        }
        self.is_leaf().encode_to(buf)?;
        if !self.is_leaf() {
            (self.children.len() as u32).encode_to(buf)?;
            for child in &self.children {
                child.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for Node {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0usize;

        let (key_count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;

        let mut keys = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
            offset += n;
            keys.push(key);
        }

        let mut values = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            let (rows, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
            offset += n;
            values.push(rows.into_iter().collect::<BTreeSet<u64>>());
        }

        let (is_leaf, n) = bool::decode_from(&buf[offset..])?;
        offset += n;

        let children = if is_leaf {
            Vec::new()
        } else {
            let (child_count, n) = u32::decode_from(&buf[offset..])?;
            offset += n;
            let mut children = Vec::with_capacity(child_count as usize);
            for _ in 0..child_count {
                let (child, n) = Node::decode_from(&buf[offset..])?;
                offset += n;
                children.push(Box::new(child));
            }
            children
        };

        Ok((Node { keys, values, children }, offset))
    }
}

// ------------------------------------------------------------------------------------------------
// BTree
// ------------------------------------------------------------------------------------------------

/// A persistent B-tree secondary index over opaque byte-encoded values.
pub struct BTree {
    root: Box<Node>,
    len: usize,
}

impl Default for BTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        BTree {
            root: Box::new(Node::leaf()),
            len: 0,
        }
    }

    /// Number of distinct values currently holding at least one row id.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Indexes `row_id` under `value`. A `None` value (a SQL-style NULL) is
    /// never indexed.
    pub fn insert(&mut self, value: Option<&[u8]>, row_id: u64) {
        let Some(value) = value else { return };

        let existed = !find_in(&self.root, value).is_empty();

        if self.root.is_full() {
            let mut new_root = Box::new(Node::leaf());
            new_root.children.push(std::mem::replace(&mut self.root, Box::new(Node::leaf())));
            split_child_impl(&mut new_root, 0);
            self.root = new_root;
        }

        insert_nonfull(&mut self.root, value, row_id);

        if !existed {
            self.len += 1;
        }
    }

    /// Removes `row_id` from `value`'s row set. Returns `true` if it was
    /// present. Leaves an empty-but-present internal-node entry in place
    /// rather than rebalancing the tree (see module docs).
    pub fn remove(&mut self, value: &[u8], row_id: u64) -> bool {
        let (removed, emptied) = remove_in(&mut self.root, value, row_id);
        if emptied {
            self.len = self.len.saturating_sub(1);
        }
        removed
    }

    /// Returns the row ids indexed under `value`.
    pub fn find(&self, value: &[u8]) -> BTreeSet<u64> {
        find_in(&self.root, value)
    }

    /// Returns the row ids indexed under any value in `[lo, hi]`.
    pub fn find_range(&self, lo: &[u8], hi: &[u8]) -> BTreeSet<u64> {
        let mut out = BTreeSet::new();
        range_collect(&self.root, Some(lo), Some(hi), &mut out);
        out
    }

    /// Returns the row ids indexed under any value `<= hi`.
    pub fn find_less_or_equal(&self, hi: &[u8]) -> BTreeSet<u64> {
        let mut out = BTreeSet::new();
        range_collect(&self.root, None, Some(hi), &mut out);
        out
    }

    /// Returns the row ids indexed under any value `>= lo`.
    pub fn find_greater_or_equal(&self, lo: &[u8]) -> BTreeSet<u64> {
        let mut out = BTreeSet::new();
        range_collect(&self.root, Some(lo), None, &mut out);
        out
    }

    /// Returns every `(value, row_ids)` pair currently indexed, in sorted
    /// key order. Used for index rebuilds and diagnostics.
    pub fn find_all(&self) -> Vec<(Vec<u8>, BTreeSet<u64>)> {
        let mut out = Vec::new();
        collect_all(&self.root, &mut out);
        out
    }

    // --------------------------------------------------------------------------------------------
    // Persistence
    // --------------------------------------------------------------------------------------------

    /// Loads a tree from a `.idx` file, or returns an empty tree if the
    /// file doesn't exist yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BTreeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if buf.is_empty() {
            return Err(BTreeError::Corrupt(format!(
                "index file {} too short",
                path.display()
            )));
        }

        let version = buf[0];
        if version != BTREE_SCHEMA_VERSION {
            return Err(BTreeError::Corrupt(format!(
                "index file {} has unsupported schema version {version} (expected {BTREE_SCHEMA_VERSION})",
                path.display()
            )));
        }
        let buf = &buf[1..];

        if buf.len() < 8 {
            return Err(BTreeError::Corrupt(format!(
                "index file {} too short",
                path.display()
            )));
        }

        let (len, n1) = u64::decode_from(buf)?;
        let (root, _n2) = Node::decode_from(&buf[n1..])?;

        Ok(BTree {
            root: Box::new(root),
            len: len as usize,
        })
    }

    /// Persists the tree to `path` via write-to-temp, fsync, atomic rename,
    /// fsync-parent-dir — the same durability sequence the manifest uses
    /// for its snapshots.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BTreeError> {
        let path = path.as_ref();
        let mut buf = vec![BTREE_SCHEMA_VERSION];
        (self.len as u64).encode_to(&mut buf)?;
        self.root.encode_to(&mut buf)?;

        let tmp_path: PathBuf = path.with_extension("idx.tmp");
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&buf)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        if let Some(parent) = path.parent() {
            if parent.as_os_str().len() > 0 {
                let dir_file = File::open(parent)?;
                dir_file.sync_all()?;
            }
        }

        Ok(())
    }
}
