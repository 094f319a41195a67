//! Sum tree for prioritized sampling.
//!
//! The layout follows the classic array-backed scheme from
//! https://github.com/jaromiru/AI-blog/blob/master/SumTree.py:
//! `capacity - 1` internal nodes followed by `capacity` leaves.
use segment_tree::{
    ops::{MaxIgnoreNaN, MinIgnoreNaN},
    SegmentPoint,
};

/// Array-backed binary tree over priority mass.
///
/// Internal nodes hold the sum of their descendants, leaves hold one
/// transition's priority. The leaf written next follows a ring pointer, so
/// inserting past capacity overwrites the oldest slot. Running minimum and
/// maximum are maintained in point trees and never recomputed by scanning.
#[derive(Debug)]
pub struct SumTree {
    capacity: usize,
    write: usize,
    size: usize,
    tree: Vec<f32>,
    min_tree: SegmentPoint<f32, MinIgnoreNaN>,
    max_tree: SegmentPoint<f32, MaxIgnoreNaN>,
}

impl SumTree {
    /// Creates a tree with `capacity` leaves.
    ///
    /// `capacity` must be a power of two so that leaves are contiguous in
    /// the backing array.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            capacity,
            write: 0,
            size: 0,
            tree: vec![0f32; 2 * capacity - 1],
            min_tree: SegmentPoint::build(vec![f32::MAX; capacity], MinIgnoreNaN),
            max_tree: SegmentPoint::build(vec![0f32; capacity], MaxIgnoreNaN),
        }
    }

    /// Writes `p` at the ring pointer and returns the data index used.
    pub fn add(&mut self, p: f32) -> usize {
        let data_ix = self.write;
        self.update(self.leaf_of(data_ix), p);

        self.write += 1;
        if self.write >= self.capacity {
            self.write = 0;
        }
        if self.size < self.capacity {
            self.size += 1;
        }
        data_ix
    }

    /// Sets the priority at `leaf_ix` and propagates the change to the root.
    pub fn update(&mut self, leaf_ix: usize, p: f32) {
        debug_assert!(leaf_ix >= self.capacity - 1 && leaf_ix < self.tree.len());
        let data_ix = self.data_of(leaf_ix);
        self.min_tree.modify(data_ix, p);
        self.max_tree.modify(data_ix, p);

        let change = p - self.tree[leaf_ix];
        self.tree[leaf_ix] = p;
        let mut ix = leaf_ix;
        while ix != 0 {
            ix = (ix - 1) / 2;
            self.tree[ix] += change;
        }
    }

    /// Walks down from the root and returns `(leaf_ix, priority, data_ix)`
    /// for the leaf whose cumulative range contains `v`.
    ///
    /// Callers draw `v` uniformly from `[0, total)`; values outside the
    /// range are clamped rather than walking out of bounds.
    pub fn get(&self, v: f32) -> (usize, f32, usize) {
        let mut v = v.max(0f32).min(self.total());
        let mut ix = 0;
        loop {
            let left = 2 * ix + 1;
            let right = left + 1;
            if left >= self.tree.len() {
                break;
            }
            if v <= self.tree[left] || self.tree[right] == 0f32 {
                ix = left;
            } else {
                v -= self.tree[left];
                ix = right;
            }
        }
        (ix, self.tree[ix], self.data_of(ix))
    }

    /// Total priority mass (the root value).
    pub fn total(&self) -> f32 {
        self.tree[0]
    }

    /// Minimum priority over the filled slots.
    pub fn min(&self) -> f32 {
        if self.size == 0 {
            return 0f32;
        }
        self.min_tree.query(0, self.size)
    }

    /// Maximum priority over the filled slots.
    pub fn max(&self) -> f32 {
        if self.size == 0 {
            return 0f32;
        }
        self.max_tree.query(0, self.size)
    }

    /// Number of filled slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// `true` once the ring has wrapped at least once.
    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    /// Leaf index backing `data_ix`.
    pub fn leaf_of(&self, data_ix: usize) -> usize {
        data_ix + self.capacity - 1
    }

    /// Data index backing `leaf_ix`.
    pub fn data_of(&self, leaf_ix: usize) -> usize {
        leaf_ix + 1 - self.capacity
    }

    /// Zeroes all priorities and resets the ring pointer.
    pub fn clear(&mut self) {
        for v in self.tree.iter_mut() {
            *v = 0f32;
        }
        self.min_tree = SegmentPoint::build(vec![f32::MAX; self.capacity], MinIgnoreNaN);
        self.max_tree = SegmentPoint::build(vec![0f32; self.capacity], MaxIgnoreNaN);
        self.write = 0;
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::SumTree;

    fn leaf(tree: &SumTree, data_ix: usize) -> f32 {
        tree.tree[tree.leaf_of(data_ix)]
    }

    fn leaf_sum(tree: &SumTree, capacity: usize) -> f32 {
        (0..capacity).map(|i| leaf(tree, i)).sum()
    }

    #[test]
    fn test_root_equals_leaf_sum() {
        let mut tree = SumTree::new(8);
        let data = vec![0.5f32, 0.2, 0.8, 0.3, 1.1, 2.5, 3.9];
        for (i, p) in data.iter().enumerate() {
            tree.add(*p);
            assert!((tree.total() - leaf_sum(&tree, 8)).abs() < 1e-5, "add {}", i);
        }
        tree.update(tree.leaf_of(3), 4.0);
        assert!((tree.total() - leaf_sum(&tree, 8)).abs() < 1e-5);
    }

    #[test]
    fn test_cumulative_descent() {
        let mut tree = SumTree::new(8);
        for p in [0.5f32, 0.2, 0.8, 0.3, 1.1, 2.5, 3.9] {
            tree.add(p);
        }
        assert_eq!(tree.get(0.0).2, 0);
        assert_eq!(tree.get(0.4).2, 0);
        assert_eq!(tree.get(0.5).2, 0);
        assert_eq!(tree.get(0.6).2, 1);
        assert_eq!(tree.get(1.2).2, 2);
        assert_eq!(tree.get(1.6).2, 3);
        assert_eq!(tree.get(2.0).2, 4);
        assert_eq!(tree.get(2.8).2, 4);
    }

    #[test]
    fn test_boundaries_and_clamp() {
        let mut tree = SumTree::new(4);
        for p in [1.0f32, 2.0, 3.0] {
            tree.add(p);
        }
        // v = 0 resolves to the first leaf, v near total to the last
        // non-zero one, and out-of-range values are clamped.
        assert_eq!(tree.get(0.0).2, 0);
        assert_eq!(tree.get(tree.total() - 1e-4).2, 2);
        assert_eq!(tree.get(tree.total() + 10.0).2, 2);
        assert_eq!(tree.get(-1.0).2, 0);
    }

    #[test]
    fn test_ring_overwrite() {
        let mut tree = SumTree::new(4);
        for i in 0..6 {
            let ix = tree.add(1.0 + i as f32);
            assert_eq!(ix, i % 4);
        }
        assert!(tree.is_full());
        assert_eq!(tree.size(), 4);
        // slots 0 and 1 were overwritten by 5.0 and 6.0
        assert_eq!(leaf(&tree, 0), 5.0);
        assert_eq!(leaf(&tree, 1), 6.0);
        assert!((tree.total() - (5.0 + 6.0 + 3.0 + 4.0)).abs() < 1e-5);
    }

    #[test]
    fn test_min_max_tracking() {
        let mut tree = SumTree::new(8);
        tree.add(0.5);
        tree.add(2.0);
        tree.add(1.0);
        assert_eq!(tree.min(), 0.5);
        assert_eq!(tree.max(), 2.0);
        tree.update(tree.leaf_of(0), 3.0);
        assert_eq!(tree.min(), 1.0);
        assert_eq!(tree.max(), 3.0);
    }

    #[test]
    fn test_clear() {
        let mut tree = SumTree::new(4);
        tree.add(1.0);
        tree.add(2.0);
        tree.clear();
        assert_eq!(tree.total(), 0.0);
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.min(), 0.0);
        assert_eq!(tree.max(), 0.0);
        assert_eq!(tree.add(3.0), 0);
    }
}
