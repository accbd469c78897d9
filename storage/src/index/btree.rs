//! B-tree over the nodes of one index file.
//!
//! Nodes hold no parent links. Every operation records the offsets of the
//! ancestors it passed through in a per-call stack and walks that back up
//! when a split has to propagate or an underfull node has to be rebalanced.

use std::collections::HashSet;

use log::debug;

use crate::file::BlockFile;
use crate::index::alloc::NodeStore;
use crate::index::node::{Node, MAX_KEYS, MIN_KEYS};
use crate::{Result, StorageError};

/// Shape of a tree as found by [`BTree::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeStats {
    pub height: usize,
    pub nodes: usize,
    pub keys: usize,
}

/// A delete that replaced the root.
///
/// `retired` nodes are still reachable from the old root, so they may only
/// be freed once `root` has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootChange {
    pub root: u32,
    pub retired: Vec<u32>,
}

pub struct BTree<'a, F: BlockFile> {
    nodes: &'a mut NodeStore<F>,
    root: u32,
    max_depth: usize,
}

impl<'a, F: BlockFile> BTree<'a, F> {
    pub fn new(nodes: &'a mut NodeStore<F>, root: u32, max_depth: usize) -> Self {
        Self {
            nodes,
            root,
            max_depth,
        }
    }

    /// Descend from the root towards `key`.
    ///
    /// Returns the node where the search stopped, the slot index and whether
    /// that slot holds `key`. On a miss the index is where `key` belongs in
    /// that (leaf) node. Every node passed through is pushed on `parents`.
    fn find(&mut self, key: u32, parents: &mut Vec<u32>) -> Result<(Node, usize, bool)> {
        let mut node = self.nodes.load(self.root)?;

        loop {
            let count = node.key_count();
            let index = node.keys[..count]
                .iter()
                .position(|&k| k >= key)
                .unwrap_or(count);

            if index < count && node.key(index) == key {
                return Ok((node, index, true));
            }

            let child = node.child(index);
            if child == 0 {
                return Ok((node, index, false));
            }

            self.check_depth(parents.len())?;
            parents.push(node.offset());
            node = self.nodes.load(child)?;
        }
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth >= self.max_depth {
            return Err(StorageError::corrupt(format!(
                "tree under {} deeper than {} levels",
                self.root, self.max_depth
            )));
        }
        Ok(())
    }

    pub fn get(&mut self, key: u32) -> Result<Option<u32>> {
        let mut parents = Vec::new();
        let (node, index, found) = self.find(key, &mut parents)?;
        Ok(found.then(|| node.value(index)))
    }

    /// Insert `key`, or overwrite its value if present.
    ///
    /// Returns the offset of the new root when the old root was split. The
    /// caller is responsible for persisting it.
    pub fn insert(&mut self, key: u32, value: u32) -> Result<Option<u32>> {
        debug_assert!(key != 0, "zero is the empty-slot marker");

        let mut parents = Vec::new();
        let (mut node, index, found) = self.find(key, &mut parents)?;

        if found {
            node.values[index] = value;
            self.nodes.save(&node)?;
            return Ok(None);
        }

        node.add_key(index, key, value, 0);

        loop {
            if node.key_count() <= MAX_KEYS {
                self.nodes.save(&node)?;
                return Ok(None);
            }

            let sibling_offset = self.nodes.allocate_node()?;
            let (up_key, up_value, sibling) = node.split(sibling_offset);
            self.nodes.save(&sibling)?;
            self.nodes.save(&node)?;
            debug!(
                "split node {} at key {up_key}, new sibling {sibling_offset}",
                node.offset()
            );

            match parents.pop() {
                Some(parent_offset) => {
                    let mut parent = self.nodes.load(parent_offset)?;
                    let at = self.position_in(&parent, node.offset())?;
                    parent.add_key(at, up_key, up_value, sibling_offset);
                    node = parent;
                }
                None => {
                    let root_offset = self.nodes.allocate_node()?;
                    let mut root = Node::new(root_offset);
                    root.children[0] = node.offset();
                    root.push_back(up_key, up_value, sibling_offset);
                    self.nodes.save(&root)?;

                    debug!("root split: {} -> {root_offset}", self.root);
                    self.root = root_offset;
                    return Ok(Some(root_offset));
                }
            }
        }
    }

    /// Remove `key` if present.
    ///
    /// Returns the root change when rebalancing emptied the root.
    pub fn remove(&mut self, key: u32) -> Result<Option<RootChange>> {
        let mut parents = Vec::new();
        let (mut node, index, found) = self.find(key, &mut parents)?;
        if !found {
            return Ok(None);
        }

        let right = node.child(index + 1);
        if right != 0 {
            // Replace with the in-order successor, then delete that instead.
            self.check_depth(parents.len())?;
            parents.push(node.offset());
            let mut successor = self.nodes.load(right)?;
            while !successor.is_leaf() {
                self.check_depth(parents.len())?;
                parents.push(successor.offset());
                successor = self.nodes.load(successor.child(0))?;
            }

            node.keys[index] = successor.key(0);
            node.values[index] = successor.value(0);
            self.nodes.save(&node)?;

            successor.pop_front();
            node = successor;
        } else {
            node.delete_key(index);
        }

        self.nodes.save(&node)?;
        self.rebalance(node, parents)
    }

    fn rebalance(&mut self, mut node: Node, mut parents: Vec<u32>) -> Result<Option<RootChange>> {
        while node.key_count() < MIN_KEYS {
            let Some(parent_offset) = parents.pop() else {
                break;
            };
            let mut parent = self.nodes.load(parent_offset)?;
            let pos = self.position_in(&parent, node.offset())?;
            if parent.key_count() == 0 {
                return Err(StorageError::corrupt(format!(
                    "node {parent_offset} has a child but no keys"
                )));
            }

            // Prefer the left sibling; the leftmost child pairs with its right.
            let sep = pos.saturating_sub(1);
            let node_is_left = pos == 0;
            let (mut left, mut right) = if node_is_left {
                let right = self.nodes.load(parent.child(1))?;
                (node, right)
            } else {
                let left = self.nodes.load(parent.child(sep))?;
                (left, node)
            };
            let (sep_key, sep_value) = (parent.key(sep), parent.value(sep));

            if left.key_count() + right.key_count() < MAX_KEYS {
                left.merge(sep_key, sep_value, &right);
                parent.delete_key(sep);
                self.nodes.save(&left)?;
                debug!(
                    "merged node {} into {} ({} keys)",
                    right.offset(),
                    left.offset(),
                    left.key_count()
                );

                if parent.key_count() > 0 {
                    self.nodes.save(&parent)?;
                    self.nodes.free_node(right.offset())?;
                    node = parent;
                    continue;
                }

                let Some(&grand_offset) = parents.last() else {
                    debug!("root {} emptied, promoting {}", parent.offset(), left.offset());
                    self.root = left.offset();
                    return Ok(Some(RootChange {
                        root: left.offset(),
                        retired: vec![parent.offset(), right.offset()],
                    }));
                };

                let mut grand = self.nodes.load(grand_offset)?;
                let at = self.position_in(&grand, parent.offset())?;
                grand.children[at] = left.offset();
                self.nodes.save(&grand)?;
                self.nodes.free_node(parent.offset())?;
                self.nodes.free_node(right.offset())?;
                node = left;
            } else {
                let donor_is_left = !node_is_left;
                if donor_is_left {
                    let (key, value, child) = left.pop_back();
                    right.push_front(sep_key, sep_value, child);
                    parent.keys[sep] = key;
                    parent.values[sep] = value;
                } else {
                    let (key, value, child) = right.pop_front();
                    left.push_back(sep_key, sep_value, child);
                    parent.keys[sep] = key;
                    parent.values[sep] = value;
                }
                self.nodes.save(&left)?;
                self.nodes.save(&right)?;
                self.nodes.save(&parent)?;

                let donor = if donor_is_left { left } else { right };
                debug!(
                    "rotated one key from {} through {}",
                    donor.offset(),
                    parent.offset()
                );

                if donor.key_count() < MIN_KEYS {
                    parents.push(parent.offset());
                    node = donor;
                } else {
                    node = parent;
                }
            }
        }

        Ok(None)
    }

    fn position_in(&self, parent: &Node, child: u32) -> Result<usize> {
        parent.child_position(child).ok_or_else(|| {
            StorageError::corrupt(format!(
                "node {} does not link to child {child}",
                parent.offset()
            ))
        })
    }

    /// In-order `(key, value)` pairs, stopping after `limit` of them.
    pub fn walk(&mut self, limit: usize) -> Result<Vec<(u32, u32)>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }

        // Each entry is a node and the next slot to emit from it.
        let mut stack: Vec<(Node, usize)> = Vec::new();
        self.push_leftmost(&mut stack, self.root)?;

        while let Some((node, next)) = stack.last_mut() {
            if *next >= node.key_count() {
                stack.pop();
                continue;
            }

            let i = *next;
            *next += 1;
            out.push((node.key(i), node.value(i)));
            if out.len() >= limit {
                break;
            }

            let right = node.child(i + 1);
            if right != 0 {
                self.push_leftmost(&mut stack, right)?;
            }
        }

        Ok(out)
    }

    fn push_leftmost(&mut self, stack: &mut Vec<(Node, usize)>, mut offset: u32) -> Result<()> {
        loop {
            self.check_depth(stack.len())?;
            let node = self.nodes.load(offset)?;
            let child = node.child(0);
            stack.push((node, 0));
            if child == 0 {
                return Ok(());
            }
            offset = child;
        }
    }

    /// Check ordering, fill and balance of the whole tree.
    pub fn verify(&mut self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut leaf_depth = None;
        let mut seen = HashSet::new();

        // (offset, depth, exclusive lower bound, exclusive upper bound)
        let mut pending = vec![(self.root, 1usize, 0u32, None::<u32>)];
        while let Some((offset, depth, low, high)) = pending.pop() {
            if depth > self.max_depth {
                return Err(StorageError::corrupt(format!(
                    "tree deeper than {} levels",
                    self.max_depth
                )));
            }
            if !seen.insert(offset) {
                return Err(StorageError::corrupt(format!(
                    "node {offset} is linked twice"
                )));
            }

            let node = self.nodes.load(offset)?;
            let count = node.key_count();
            let is_root = offset == self.root;
            if !is_root && count < MIN_KEYS {
                return Err(StorageError::corrupt(format!(
                    "node {offset} is underfull: {count} keys"
                )));
            }

            let mut prev = low;
            for i in 0..count {
                let key = node.key(i);
                let above_high = high.is_some_and(|h| key >= h);
                if key <= prev || above_high {
                    return Err(StorageError::corrupt(format!(
                        "key {key} out of order in node {offset}"
                    )));
                }
                prev = key;
            }

            stats.nodes += 1;
            stats.keys += count;

            if node.is_leaf() {
                if node.children[..=count].iter().any(|&c| c != 0) {
                    return Err(StorageError::corrupt(format!(
                        "leaf {offset} has a child link"
                    )));
                }
                match leaf_depth {
                    None => leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Err(StorageError::corrupt(format!(
                            "leaf {offset} at depth {depth}, expected {d}"
                        )));
                    }
                    Some(_) => {}
                }
                continue;
            }

            if count == 0 {
                return Err(StorageError::corrupt(format!(
                    "internal node {offset} has no keys"
                )));
            }
            for i in 0..=count {
                let child = node.child(i);
                if child == 0 {
                    return Err(StorageError::corrupt(format!(
                        "internal node {offset} is missing child {i}"
                    )));
                }
                let child_low = if i == 0 { low } else { node.key(i - 1) };
                let child_high = if i == count { high } else { Some(node.key(i)) };
                pending.push((child, depth + 1, child_low, child_high));
            }
        }

        stats.height = leaf_depth.unwrap_or(0);
        Ok(stats)
    }
}
