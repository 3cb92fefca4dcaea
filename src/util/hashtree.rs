//! Ordered tree keyed by totally-ordered keys, balanced as an AVL tree.
//!
//! No `hashtree.c` implementation was retrieved, only the property test
//! `original_source/source/tests/unit/core_hashtree.c`, so the API surface
//! and the height/balance-factor invariant it asserts (`bf` in `[-1, 1]`,
//! `height == max(left, right) + 1`) come from there; the rotation
//! algorithm itself is standard AVL. `lower_bound` follows the source's
//! test semantics precisely: it returns the greatest key less than or
//! equal to the query key (a floor, not a ceiling, despite the name).
//!
//! Deleted slots are recycled through a free list instead of left as
//! holes, the way `cranelift-entity`'s maps expect dense reuse.

use crate::error::{CoreError, ErrorKind, Result};

type NodeIndex = u32;

struct Node<K, V> {
    key: K,
    value: V,
    left: Option<NodeIndex>,
    right: Option<NodeIndex>,
    height: i32,
}

/// An ordered map balanced as an AVL tree.
pub struct HashTree<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<NodeIndex>,
    root: Option<NodeIndex>,
    len: usize,
}

impl<K: Ord + Clone, V> Default for HashTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V> HashTree<K, V> {
    pub fn new() -> Self {
        HashTree {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, idx: NodeIndex) -> &Node<K, V> {
        self.nodes[idx as usize].as_ref().expect("dangling hashtree index")
    }

    fn node_mut(&mut self, idx: NodeIndex) -> &mut Node<K, V> {
        self.nodes[idx as usize].as_mut().expect("dangling hashtree index")
    }

    fn height(&self, idx: Option<NodeIndex>) -> i32 {
        idx.map_or(0, |i| self.node(i).height)
    }

    fn balance_factor(&self, idx: NodeIndex) -> i32 {
        let node = self.node(idx);
        self.height(node.right) - self.height(node.left)
    }

    fn recompute_height(&mut self, idx: NodeIndex) {
        let left = self.node(idx).left;
        let right = self.node(idx).right;
        let h = 1 + self.height(left).max(self.height(right));
        self.node_mut(idx).height = h;
    }

    fn alloc(&mut self, key: K, value: V) -> NodeIndex {
        let node = Node {
            key,
            value,
            left: None,
            right: None,
            height: 1,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            (self.nodes.len() - 1) as NodeIndex
        }
    }

    fn rotate_left(&mut self, idx: NodeIndex) -> NodeIndex {
        let pivot = self.node(idx).right.expect("rotate_left needs a right child");
        let pivot_left = self.node(pivot).left;
        self.node_mut(idx).right = pivot_left;
        self.node_mut(pivot).left = Some(idx);
        self.recompute_height(idx);
        self.recompute_height(pivot);
        pivot
    }

    fn rotate_right(&mut self, idx: NodeIndex) -> NodeIndex {
        let pivot = self.node(idx).left.expect("rotate_right needs a left child");
        let pivot_right = self.node(pivot).right;
        self.node_mut(idx).left = pivot_right;
        self.node_mut(pivot).right = Some(idx);
        self.recompute_height(idx);
        self.recompute_height(pivot);
        pivot
    }

    fn rebalance(&mut self, idx: NodeIndex) -> NodeIndex {
        self.recompute_height(idx);
        let bf = self.balance_factor(idx);
        if bf > 1 {
            let right = self.node(idx).right.unwrap();
            if self.balance_factor(right) < 0 {
                let new_right = self.rotate_right(right);
                self.node_mut(idx).right = Some(new_right);
            }
            self.rotate_left(idx)
        } else if bf < -1 {
            let left = self.node(idx).left.unwrap();
            if self.balance_factor(left) > 0 {
                let new_left = self.rotate_left(left);
                self.node_mut(idx).left = Some(new_left);
            }
            self.rotate_right(idx)
        } else {
            idx
        }
    }

    fn insert_at(&mut self, idx: Option<NodeIndex>, key: K, value: V) -> Result<NodeIndex> {
        match idx {
            None => Ok(self.alloc(key, value)),
            Some(idx) => {
                match key.cmp(&self.node(idx).key) {
                    core::cmp::Ordering::Equal => {
                        return Err(CoreError::new(ErrorKind::AlreadyExists, "key already exists in the tree"));
                    }
                    core::cmp::Ordering::Less => {
                        let left = self.node(idx).left;
                        let new_left = self.insert_at(left, key, value)?;
                        self.node_mut(idx).left = Some(new_left);
                    }
                    core::cmp::Ordering::Greater => {
                        let right = self.node(idx).right;
                        let new_right = self.insert_at(right, key, value)?;
                        self.node_mut(idx).right = Some(new_right);
                    }
                }
                Ok(self.rebalance(idx))
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let new_root = self.insert_at(self.root, key, value)?;
        self.root = Some(new_root);
        self.len += 1;
        Ok(())
    }

    fn min_key_index(&self, mut idx: NodeIndex) -> NodeIndex {
        while let Some(left) = self.node(idx).left {
            idx = left;
        }
        idx
    }

    /// Removes `key` from the subtree rooted at `idx`, returning the new
    /// subtree root together with the removed value.
    fn delete_at(&mut self, idx: Option<NodeIndex>, key: &K) -> Result<(Option<NodeIndex>, V)> {
        let idx = match idx {
            None => return Err(CoreError::new(ErrorKind::NotFound, "key not found in the tree")),
            Some(idx) => idx,
        };
        let removed = match key.cmp(&self.node(idx).key) {
            core::cmp::Ordering::Less => {
                let left = self.node(idx).left;
                let (new_left, removed) = self.delete_at(left, key)?;
                self.node_mut(idx).left = new_left;
                removed
            }
            core::cmp::Ordering::Greater => {
                let right = self.node(idx).right;
                let (new_right, removed) = self.delete_at(right, key)?;
                self.node_mut(idx).right = new_right;
                removed
            }
            core::cmp::Ordering::Equal => {
                let left = self.node(idx).left;
                let right = self.node(idx).right;
                return Ok(match (left, right) {
                    (None, None) => {
                        let value = self.take_node(idx);
                        (None, value)
                    }
                    (Some(only), None) | (None, Some(only)) => {
                        let value = self.take_node(idx);
                        (Some(only), value)
                    }
                    (Some(_), Some(right)) => {
                        let successor = self.min_key_index(right);
                        let successor_key = self.node(successor).key.clone();
                        let (new_right, successor_value) = self.delete_at(Some(right), &successor_key)?;
                        let removed_value =
                            core::mem::replace(&mut self.node_mut(idx).value, successor_value);
                        self.node_mut(idx).key = successor_key;
                        self.node_mut(idx).right = new_right;
                        (Some(self.rebalance(idx)), removed_value)
                    }
                });
            }
        };
        Ok((Some(self.rebalance(idx)), removed))
    }

    fn take_node(&mut self, idx: NodeIndex) -> V {
        let node = self.nodes[idx as usize].take().expect("dangling hashtree index");
        self.free.push(idx);
        node.value
    }

    pub fn delete(&mut self, key: &K) -> Result<V> {
        let (new_root, value) = self.delete_at(self.root, key)?;
        self.root = new_root;
        self.len -= 1;
        Ok(value)
    }

    fn find(&self, mut idx: Option<NodeIndex>, key: &K) -> Option<NodeIndex> {
        while let Some(i) = idx {
            match key.cmp(&self.node(i).key) {
                core::cmp::Ordering::Equal => return Some(i),
                core::cmp::Ordering::Less => idx = self.node(i).left,
                core::cmp::Ordering::Greater => idx = self.node(i).right,
            }
        }
        None
    }

    pub fn has(&self, key: &K) -> bool {
        self.find(self.root, key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(self.root, key).map(|i| &self.node(i).value)
    }

    /// Greatest entry with key <= `key`.
    pub fn lower_bound(&self, key: &K) -> Result<(&K, &V)> {
        let mut idx = self.root;
        let mut candidate = None;
        while let Some(i) = idx {
            match key.cmp(&self.node(i).key) {
                core::cmp::Ordering::Less => idx = self.node(i).left,
                core::cmp::Ordering::Equal => {
                    candidate = Some(i);
                    break;
                }
                core::cmp::Ordering::Greater => {
                    candidate = Some(i);
                    idx = self.node(i).right;
                }
            }
        }
        candidate
            .map(|i| {
                let n = self.node(i);
                (&n.key, &n.value)
            })
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, "no entry with key <= query"))
    }

    /// Entry with the smallest key strictly greater than `key`'s entry.
    pub fn next_node(&self, key: &K) -> Option<(&K, &V)> {
        let mut idx = self.root;
        let mut candidate = None;
        while let Some(i) = idx {
            match key.cmp(&self.node(i).key) {
                core::cmp::Ordering::Less => {
                    candidate = Some(i);
                    idx = self.node(i).left;
                }
                _ => idx = self.node(i).right,
            }
        }
        candidate.map(|i| {
            let n = self.node(i);
            (&n.key, &n.value)
        })
    }

    /// In-order iteration over all entries, ascending by key.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut stack = Vec::new();
        let mut cur = self.root;
        core::iter::from_fn(move || loop {
            if let Some(i) = cur {
                stack.push(i);
                cur = self.node(i).left;
            } else if let Some(i) = stack.pop() {
                cur = self.node(i).right;
                let n = self.node(i);
                return Some((&n.key, &n.value));
            } else {
                return None;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // spec.md §8.2: "every node's AVL balance factor is in {-1, 0, +1}",
    // checked alongside the `height == 1 + max(left_height, right_height)`
    // invariant `recompute_height` is supposed to maintain. Mirrors
    // `original_source/source/tests/unit/core_hashtree.c`'s `core_hashtree1`,
    // which walks every node during iteration asserting the same pair.
    fn assert_avl_invariant<K: Ord + Clone, V>(tree: &HashTree<K, V>) {
        fn walk<K: Ord + Clone, V>(tree: &HashTree<K, V>, idx: Option<NodeIndex>) {
            let Some(idx) = idx else { return };
            let node = tree.node(idx);
            let (left, right) = (node.left, node.right);
            let bf = tree.balance_factor(idx);
            assert!((-1..=1).contains(&bf), "balance factor {bf} out of range at node {idx}");
            assert_eq!(
                node.height,
                1 + tree.height(left).max(tree.height(right)),
                "stale height at node {idx}"
            );
            walk(tree, left);
            walk(tree, right);
        }
        walk(tree, tree.root);
    }

    // Core - Hashtree #1: balance invariant + bulk insert/delete.
    #[test]
    fn balance_invariant_holds_under_bulk_insert_and_delete() {
        let mut tree: HashTree<u64, u64> = HashTree::new();
        let mask: u64 = 0xbadc0ffe;
        let count: u64 = 1 << 16;
        for i in 0..count {
            let key = (i.wrapping_mul(31)) ^ mask;
            tree.insert(key, i).unwrap();
        }
        assert_eq!(tree.len() as u64, count);
        for i in 0..count {
            let key = (i.wrapping_mul(31)) ^ mask;
            assert!(tree.has(&key));
        }
        assert_avl_invariant(&tree);

        let mut deleted = 0u64;
        for i in 0..0x1f_u64 {
            for j in 0..0xe_u64 {
                let key = (((i << 8) | j).wrapping_mul(31)) ^ mask;
                assert!(tree.has(&key));
                tree.delete(&key).unwrap();
                assert!(!tree.has(&key));
                deleted += 1;
            }
        }
        assert_eq!(tree.len() as u64, count - deleted);
        assert_avl_invariant(&tree);
    }

    // Core - Hashtree #2: lower_bound floor semantics.
    #[test]
    fn lower_bound_returns_floor_entry() {
        let mut tree: HashTree<u64, u64> = HashTree::new();
        const BEGIN: u64 = 100;
        const RANGE: u64 = 1000;
        const FACTOR: u64 = 1000;
        for i in BEGIN..=RANGE {
            tree.insert(i * FACTOR, 0).unwrap();
        }

        for i in 0..=(FACTOR * (RANGE + 10)) {
            if i >= FACTOR * BEGIN {
                let (key, _) = tree.lower_bound(&i).unwrap();
                assert_eq!(*key, (i / FACTOR).min(RANGE) * FACTOR);
            } else {
                assert!(tree.lower_bound(&i).is_err());
            }
        }
    }

    // Core - Hashtree #3: ordered iteration and next_node.
    #[test]
    fn iteration_and_next_node_are_ordered() {
        let mut tree: HashTree<u64, u64> = HashTree::new();
        const BEGIN: u64 = 1;
        const END: u64 = 5000;
        for i in BEGIN..=END {
            tree.insert(i, 0).unwrap();
        }

        let mut last = BEGIN - 1;
        for (key, _) in tree.iter() {
            assert_eq!(last + 1, *key);
            last = *key;
            match tree.next_node(key) {
                Some((next_key, _)) => assert_eq!(*next_key, last + 1),
                None => assert_eq!(last, END),
            }
        }
        assert_eq!(last, END);
    }
}
