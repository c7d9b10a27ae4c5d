// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Geometry of the complete k-ary heap underlying a Path ORAM tree.
//!
//! Nodes are addressed in level order starting from 0 at the root, so the
//! children of node `n` are `n * k + 1 ..= n * k + k` and its parent is
//! `(n - 1) / k`. All functions here are pure apart from the two sampling
//! helpers, which draw from a caller-supplied RNG.

use crate::{BucketCapacity, NodeAddress, OramError, TreeHeight};
use rand::{CryptoRng, Rng, RngCore};

/// The maximum supported tree height.
///
/// Heights beyond this are rejected at configuration time; the node-count
/// arithmetic below is checked and never silently wraps.
pub const MAX_TREE_HEIGHT: TreeHeight = 32;

const CONFIGURATION_OVERFLOW: OramError = OramError::InvalidConfiguration {
    reason: "heap geometry does not fit in 64-bit node addresses",
};

/// The shape of a complete k-ary tree of buckets: a branching factor `base`
/// and a height (the level of the leaves, with the root at level 0).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapGeometry {
    base: u64,
    height: TreeHeight,
    /// `level_offsets[l]` is the address of the first node at level `l`;
    /// the final entry is the total node count.
    level_offsets: Vec<NodeAddress>,
}

impl HeapGeometry {
    /// Returns the geometry of a complete `base`-ary tree with leaves at
    /// level `height`.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfiguration` error if `base < 2`, if `height`
    /// exceeds [`MAX_TREE_HEIGHT`], or if the node count overflows a `u64`.
    pub fn new(base: u64, height: TreeHeight) -> Result<Self, OramError> {
        if base < 2 {
            return Err(OramError::InvalidConfiguration {
                reason: "heap base must be at least 2",
            });
        }
        if height > MAX_TREE_HEIGHT {
            return Err(OramError::InvalidConfiguration {
                reason: "heap height exceeds MAX_TREE_HEIGHT",
            });
        }

        let mut level_offsets = Vec::with_capacity(height as usize + 2);
        let mut offset: u64 = 0;
        let mut level_width: u64 = 1;
        for _ in 0..=height {
            level_offsets.push(offset);
            offset = offset
                .checked_add(level_width)
                .ok_or(CONFIGURATION_OVERFLOW)?;
            level_width = level_width
                .checked_mul(base)
                .ok_or(CONFIGURATION_OVERFLOW)?;
        }
        level_offsets.push(offset);

        Ok(Self {
            base,
            height,
            level_offsets,
        })
    }

    /// Returns the smallest height at which a `base`-ary heap of buckets
    /// holding `bucket_capacity` blocks each can store `block_count` blocks.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfiguration` error if no height up to
    /// [`MAX_TREE_HEIGHT`] provides sufficient capacity.
    pub fn minimum_height(
        base: u64,
        bucket_capacity: BucketCapacity,
        block_count: u64,
    ) -> Result<TreeHeight, OramError> {
        let slots_per_bucket = u64::try_from(bucket_capacity)?;
        let mut node_count: u64 = 0;
        let mut level_width: u64 = 1;
        for height in 0..=MAX_TREE_HEIGHT {
            node_count = node_count
                .checked_add(level_width)
                .ok_or(CONFIGURATION_OVERFLOW)?;
            if node_count.saturating_mul(slots_per_bucket) >= block_count {
                return Ok(height);
            }
            level_width = level_width
                .checked_mul(base)
                .ok_or(CONFIGURATION_OVERFLOW)?;
        }
        Err(OramError::InvalidConfiguration {
            reason: "block count exceeds heap capacity at MAX_TREE_HEIGHT",
        })
    }

    /// The branching factor of the heap.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The level of the leaves; the root is at level 0.
    pub fn height(&self) -> TreeHeight {
        self.height
    }

    /// The total number of nodes (equivalently, buckets) in the heap.
    pub fn bucket_count(&self) -> u64 {
        self.level_offsets[self.height as usize + 1]
    }

    /// The number of leaves.
    pub fn leaf_count(&self) -> u64 {
        self.bucket_count() - self.level_offsets[self.height as usize]
    }

    /// The number of nodes at `level`.
    fn nodes_at_level(&self, level: TreeHeight) -> u64 {
        self.level_offsets[level as usize + 1] - self.level_offsets[level as usize]
    }

    /// Returns the level of `node`, with the root at level 0.
    ///
    /// # Errors
    ///
    /// Returns a `BucketOutOfRange` error if `node` is not in the heap.
    pub fn level_of(&self, node: NodeAddress) -> Result<TreeHeight, OramError> {
        if node >= self.bucket_count() {
            return Err(OramError::BucketOutOfRange(node));
        }
        // partition_point: first level whose offset exceeds `node`.
        let level = self.level_offsets.partition_point(|&offset| offset <= node) - 1;
        Ok(level as TreeHeight)
    }

    /// Returns whether `node` is a leaf.
    pub fn is_leaf(&self, node: NodeAddress) -> bool {
        node >= self.level_offsets[self.height as usize] && node < self.bucket_count()
    }

    /// Returns the ancestor of `node` at `level`, which must not exceed the
    /// node's own level.
    pub(crate) fn ancestor_at_level(
        &self,
        node: NodeAddress,
        level: TreeHeight,
    ) -> Result<NodeAddress, OramError> {
        let node_level = self.level_of(node)?;
        debug_assert!(level <= node_level);
        let mut current = node;
        for _ in level..node_level {
            current = (current - 1) / self.base;
        }
        Ok(current)
    }

    /// Returns the addresses of the buckets on the path from the root to
    /// `node`, root-first and `node`-last.
    ///
    /// For a leaf this is exactly `height + 1` addresses, one per level.
    ///
    /// # Errors
    ///
    /// Returns a `BucketOutOfRange` error if `node` is not in the heap.
    pub fn path_from_root(&self, node: NodeAddress) -> Result<Vec<NodeAddress>, OramError> {
        let mut path = Vec::with_capacity(self.height as usize + 1);
        self.path_from_root_into(node, &mut path)?;
        Ok(path)
    }

    /// As [`Self::path_from_root`], but reusing `path`'s allocation.
    pub(crate) fn path_from_root_into(
        &self,
        node: NodeAddress,
        path: &mut Vec<NodeAddress>,
    ) -> Result<(), OramError> {
        if node >= self.bucket_count() {
            return Err(OramError::BucketOutOfRange(node));
        }
        path.clear();
        let mut current = node;
        loop {
            path.push(current);
            if current == 0 {
                break;
            }
            current = (current - 1) / self.base;
        }
        path.reverse();
        Ok(())
    }

    /// Samples a uniformly random bucket address at `level`.
    pub fn random_bucket_at_level<R: RngCore + CryptoRng>(
        &self,
        level: TreeHeight,
        rng: &mut R,
    ) -> Result<NodeAddress, OramError> {
        if level > self.height {
            return Err(OramError::InvalidConfiguration {
                reason: "sampling level exceeds heap height",
            });
        }
        let offset = self.level_offsets[level as usize];
        Ok(offset + rng.gen_range(0..self.nodes_at_level(level)))
    }

    /// Samples a uniformly random leaf address.
    pub fn random_leaf<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<NodeAddress, OramError> {
        self.random_bucket_at_level(self.height, rng)
    }
}
