// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Immutable (copy-on-write) B+-tree mutation algorithms.
//!
//! None of the functions here perform I/O directly; all page access goes
//! through the [`PageStore`] trait so the algorithms can be exercised
//! against an in-memory test double as well as the real [`crate::pager`].

use std::cmp::Ordering;

use crate::error::{StoreError, StoreResult};
use crate::page::{
    check_key_size, check_val_size, Node, HEADER_SIZE, KIND_INTERNAL, KIND_LEAF, PAGE_SIZE,
};

/// Storage callbacks the tree needs: dereference a page, allocate a new
/// one for a node, and retire a page that is no longer reachable.
///
/// Mirrors the distilled spec's `get`/`new`/`del` function-pointer triple
/// as an explicit trait, per the design notes on callback indirection.
pub trait PageStore {
    fn get(&self, ptr: u64) -> Node;
    fn new(&mut self, node: Node) -> u64;
    fn del(&mut self, ptr: u64);
}

/// A B+-tree, identified only by its current root page id. All structural
/// state lives in pages reachable from `root`; the tree itself holds no
/// other state.
#[derive(Debug, Clone, Copy, Default)]
pub struct BTree {
    pub root: u64,
}

impl BTree {
    pub fn new() -> Self {
        Self { root: 0 }
    }

    /// Insert or update `key -> val`. `key` must be 1..=`MAX_KEY_SIZE`
    /// bytes; `val` must be 0..=`MAX_VAL_SIZE` bytes.
    pub fn insert<S: PageStore>(&mut self, store: &mut S, key: &[u8], val: &[u8]) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvariantViolation {
                reason: "key must be at least 1 byte (empty key is the internal sentinel)"
                    .to_string(),
            });
        }
        check_key_size(key)?;
        check_val_size(val)?;

        if self.root == 0 {
            let mut node = Node::scratch(PAGE_SIZE);
            node.set_header(KIND_LEAF, 2);
            node.append_kv(0, 0, &[], &[]);
            node.append_kv(1, 0, key, val);
            self.root = store.new(node);
            return Ok(());
        }

        let old_root = store.get(self.root);
        store.del(self.root);
        let grown = tree_insert(store, &old_root, key, val)?;
        let parts = split3(grown)?;

        if parts.len() == 1 {
            self.root = store.new(parts.into_iter().next().unwrap());
        } else {
            let mut new_root = Node::scratch(PAGE_SIZE);
            new_root.set_header(KIND_INTERNAL, parts.len() as u16);
            for (i, part) in parts.iter().enumerate() {
                let key0 = part.get_key(0).to_vec();
                let ptr = store.new(part.clone());
                new_root.append_kv(i as u16, ptr, &key0, &[]);
            }
            self.root = store.new(new_root);
        }
        Ok(())
    }

    /// Delete `key`. Returns `false` if the tree is empty or the key is
    /// absent (nothing on disk changes in that case).
    pub fn delete<S: PageStore>(&mut self, store: &mut S, key: &[u8]) -> StoreResult<bool> {
        if self.root == 0 || key.is_empty() {
            return Ok(false);
        }

        let old_root = store.get(self.root);
        let updated = match tree_delete(store, &old_root, key)? {
            None => return Ok(false),
            Some(updated) => updated,
        };
        store.del(self.root);

        if updated.kind() == KIND_INTERNAL && updated.nkeys() == 1 {
            // One level removed: the sole surviving child (already
            // allocated by the recursion below) becomes the new root.
            self.root = updated.get_ptr(0);
        } else {
            self.root = store.new(updated);
        }
        Ok(true)
    }

    /// Look up `key`, returning its value iff an exact match exists.
    pub fn lookup<S: PageStore>(&self, store: &S, key: &[u8]) -> Option<Vec<u8>> {
        if self.root == 0 || key.is_empty() {
            return None;
        }

        let mut node = store.get(self.root);
        loop {
            let idx = lookup_le(&node, key);
            match node.kind() {
                KIND_LEAF => {
                    return if node.get_key(idx) == key {
                        Some(node.get_val(idx).to_vec())
                    } else {
                        None
                    };
                }
                KIND_INTERNAL => {
                    let ptr = node.get_ptr(idx);
                    node = store.get(ptr);
                }
                other => {
                    debug_assert!(false, "bad node kind {other}");
                    return None;
                }
            }
        }
    }
}

/// Greatest `i` in `1..nkeys` such that `node.key[i] <= key`, or 0 if no
/// such index exists. Index 0 holds the inherited separator (or the
/// global sentinel at the root) and is never compared directly: by
/// invariant it is always <= any key reachable through this node.
fn lookup_le(node: &Node, key: &[u8]) -> u16 {
    let nkeys = node.nkeys();
    let mut found = 0u16;
    for i in 1..nkeys {
        match node.get_key(i).cmp(key) {
            Ordering::Less => found = i,
            Ordering::Equal => {
                found = i;
                break;
            }
            Ordering::Greater => break,
        }
    }
    found
}

/// Recursively insert `key`/`val` into `node`, returning a (possibly
/// oversize, up to `2 * PAGE_SIZE`) replacement. The caller is
/// responsible for splitting the result and deallocating `node`'s page.
fn tree_insert<S: PageStore>(store: &mut S, node: &Node, key: &[u8], val: &[u8]) -> StoreResult<Node> {
    let idx = lookup_le(node, key);
    match node.kind() {
        KIND_LEAF => {
            let mut new_node = Node::scratch(2 * PAGE_SIZE);
            if node.get_key(idx) == key {
                leaf_update(&mut new_node, node, idx, key, val);
            } else {
                leaf_insert(&mut new_node, node, idx + 1, key, val);
            }
            Ok(new_node)
        }
        KIND_INTERNAL => node_insert(store, node, idx, key, val),
        other => Err(StoreError::InvariantViolation {
            reason: format!("bad node kind {other}"),
        }),
    }
}

/// Replace the record at `idx` in place (net key count unchanged).
fn leaf_update(new_node: &mut Node, old: &Node, idx: u16, key: &[u8], val: &[u8]) {
    new_node.set_header(KIND_LEAF, old.nkeys());
    new_node.append_range(old, 0, 0, idx);
    new_node.append_kv(idx, 0, key, val);
    new_node.append_range(old, idx + 1, idx + 1, old.nkeys() - idx - 1);
}

/// Insert a new record at `idx`, shifting subsequent entries right
/// (net key count +1).
fn leaf_insert(new_node: &mut Node, old: &Node, idx: u16, key: &[u8], val: &[u8]) {
    new_node.set_header(KIND_LEAF, old.nkeys() + 1);
    new_node.append_range(old, 0, 0, idx);
    new_node.append_kv(idx, 0, key, val);
    new_node.append_range(old, idx + 1, idx, old.nkeys() - idx);
}

fn node_insert<S: PageStore>(
    store: &mut S,
    node: &Node,
    idx: u16,
    key: &[u8],
    val: &[u8],
) -> StoreResult<Node> {
    let kptr = node.get_ptr(idx);
    let kid = store.get(kptr);
    store.del(kptr);

    let grown_kid = tree_insert(store, &kid, key, val)?;
    let parts = split3(grown_kid)?;

    let mut new_node = Node::scratch(2 * PAGE_SIZE);
    replace_kid_n(store, &mut new_node, node, idx, &parts);
    Ok(new_node)
}

/// Split an oversize scratch node into 1-3 page-sized nodes. A single
/// page-sized input is returned unchanged (after truncation).
fn split3(mut node: Node) -> StoreResult<Vec<Node>> {
    if node.nbytes() <= PAGE_SIZE {
        node.truncate_to_page()?;
        return Ok(vec![node]);
    }

    let mut left = Node::scratch(2 * PAGE_SIZE);
    let mut right = Node::scratch(PAGE_SIZE);
    split2(&mut left, &mut right, &node)?;

    if left.nbytes() <= PAGE_SIZE {
        left.truncate_to_page()?;
        return Ok(vec![left, right]);
    }

    let mut leftleft = Node::scratch(PAGE_SIZE);
    let mut middle = Node::scratch(PAGE_SIZE);
    split2(&mut leftleft, &mut middle, &left)?;

    if leftleft.nbytes() > PAGE_SIZE {
        return Err(StoreError::InvariantViolation {
            reason: "leftleft split half still exceeds a page".to_string(),
        });
    }

    Ok(vec![leftleft, middle, right])
}

/// Split `old` into a `left` remainder and a `right` half that fits a
/// page. `right` is grown from the tail of `old`, accumulating entries
/// until one more would push it over `PAGE_SIZE`.
fn split2(left: &mut Node, right: &mut Node, old: &Node) -> StoreResult<()> {
    let nkeys = old.nkeys();
    debug_assert!(nkeys >= 2, "cannot split a node with < 2 keys");

    let mut split_idx = 0u16;
    while split_idx < nkeys {
        let k = nkeys - split_idx;
        let kv_bytes = old.kv_pos(nkeys) - old.kv_pos(split_idx);
        let size = HEADER_SIZE + 10 * k as usize + kv_bytes;
        if size <= PAGE_SIZE {
            break;
        }
        split_idx += 1;
    }

    if split_idx == 0 || split_idx >= nkeys {
        return Err(StoreError::InvariantViolation {
            reason: "split2 could not find a page-sized right half".to_string(),
        });
    }

    left.set_header(old.kind(), split_idx);
    left.append_range(old, 0, 0, split_idx);

    right.set_header(old.kind(), nkeys - split_idx);
    right.append_range(old, 0, split_idx, nkeys - split_idx);

    Ok(())
}

/// Rebuild `node` with the child at `idx` replaced by 1-3 `kids`, each
/// freshly allocated via `store.new`.
fn replace_kid_n<S: PageStore>(store: &mut S, new_node: &mut Node, old: &Node, idx: u16, kids: &[Node]) {
    let inc = kids.len() as u16;
    new_node.set_header(KIND_INTERNAL, old.nkeys() + inc - 1);
    new_node.append_range(old, 0, 0, idx);
    for (i, kid) in kids.iter().enumerate() {
        let key0 = kid.get_key(0).to_vec();
        let ptr = store.new(kid.clone());
        new_node.append_kv(idx + i as u16, ptr, &key0, &[]);
    }
    new_node.append_range(old, idx + inc, idx + 1, old.nkeys() - (idx + 1));
}

/// Rebuild `node` with the two children at `idx` and `idx+1` replaced by
/// a single merged child.
fn replace2kid(new_node: &mut Node, old: &Node, idx: u16, merged_ptr: u64, merged_key: &[u8]) {
    new_node.set_header(KIND_INTERNAL, old.nkeys() - 1);
    new_node.append_range(old, 0, 0, idx);
    new_node.append_kv(idx, merged_ptr, merged_key, &[]);
    new_node.append_range(old, idx + 1, idx + 2, old.nkeys() - (idx + 2));
}

/// Concatenate `left` and `right` into a single node (used when merging
/// an underflowing child with a sibling).
fn node_merge(new_node: &mut Node, left: &Node, right: &Node) {
    new_node.set_header(left.kind(), left.nkeys() + right.nkeys());
    new_node.append_range(left, 0, 0, left.nkeys());
    new_node.append_range(right, left.nkeys(), 0, right.nkeys());
}

enum MergeDecision {
    Left(Node),
    Right(Node),
    None,
}

/// Decide whether `updated` (the freshly-rewritten child at `idx`)
/// should be coalesced with a sibling: it must be small (<= PAGE/4) and
/// a sibling must exist such that the merged node still fits a page.
/// Left is preferred when both qualify.
fn should_merge<S: PageStore>(store: &S, node: &Node, updated: &Node, idx: u16) -> MergeDecision {
    if updated.nbytes() > PAGE_SIZE / 4 {
        return MergeDecision::None;
    }
    if idx > 0 {
        let sibling = store.get(node.get_ptr(idx - 1));
        if sibling.nbytes() + updated.nbytes() - HEADER_SIZE <= PAGE_SIZE {
            return MergeDecision::Left(sibling);
        }
    }
    if idx + 1 < node.nkeys() {
        let sibling = store.get(node.get_ptr(idx + 1));
        if sibling.nbytes() + updated.nbytes() - HEADER_SIZE <= PAGE_SIZE {
            return MergeDecision::Right(sibling);
        }
    }
    MergeDecision::None
}

/// Remove the record at `idx` (net key count -1).
fn leaf_delete(new_node: &mut Node, old: &Node, idx: u16) {
    new_node.set_header(KIND_LEAF, old.nkeys() - 1);
    new_node.append_range(old, 0, 0, idx);
    new_node.append_range(old, idx, idx + 1, old.nkeys() - (idx + 1));
}

/// Recursively delete `key` from `node`. Returns `Ok(None)` if the key
/// was not present anywhere under `node` (nothing is freed in that case).
fn tree_delete<S: PageStore>(store: &mut S, node: &Node, key: &[u8]) -> StoreResult<Option<Node>> {
    let idx = lookup_le(node, key);
    match node.kind() {
        KIND_LEAF => {
            if node.get_key(idx) != key {
                return Ok(None);
            }
            let mut new_node = Node::scratch(PAGE_SIZE);
            leaf_delete(&mut new_node, node, idx);
            Ok(Some(new_node))
        }
        KIND_INTERNAL => node_delete(store, node, idx, key),
        other => Err(StoreError::InvariantViolation {
            reason: format!("bad node kind {other}"),
        }),
    }
}

fn node_delete<S: PageStore>(store: &mut S, node: &Node, idx: u16, key: &[u8]) -> StoreResult<Option<Node>> {
    let kptr = node.get_ptr(idx);
    let kid = store.get(kptr);
    let updated = match tree_delete(store, &kid, key)? {
        None => return Ok(None),
        Some(updated) => updated,
    };
    store.del(kptr);

    let mut new_node = Node::scratch(PAGE_SIZE);
    match should_merge(store, node, &updated, idx) {
        MergeDecision::Left(sibling) => {
            let mut merged = Node::scratch(PAGE_SIZE);
            node_merge(&mut merged, &sibling, &updated);
            store.del(node.get_ptr(idx - 1));
            let merged_key = merged.get_key(0).to_vec();
            let merged_ptr = store.new(merged);
            replace2kid(&mut new_node, node, idx - 1, merged_ptr, &merged_key);
        }
        MergeDecision::Right(sibling) => {
            let mut merged = Node::scratch(PAGE_SIZE);
            node_merge(&mut merged, &updated, &sibling);
            store.del(node.get_ptr(idx + 1));
            let merged_key = merged.get_key(0).to_vec();
            let merged_ptr = store.new(merged);
            replace2kid(&mut new_node, node, idx, merged_ptr, &merged_key);
        }
        MergeDecision::None => {
            debug_assert!(updated.nkeys() > 0);
            replace_kid_n(store, &mut new_node, node, idx, std::slice::from_ref(&updated));
        }
    }
    Ok(Some(new_node))
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
