// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM position map.
//!
//! One leaf address per block id. The invariant maintained by the access
//! protocol is that block `id` is always reachable by reading the path ending
//! at `positions[id]`, either from a bucket on that path or from the stash.

use crate::heap::HeapGeometry;
use crate::{BlockId, NodeAddress, OramError};
use rand::{CryptoRng, RngCore};

/// A table mapping each block id to its currently assigned leaf bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionMap {
    positions: Vec<NodeAddress>,
}

impl PositionMap {
    /// Returns a position map of `block_count` independently sampled leaves.
    pub fn sample<R: RngCore + CryptoRng>(
        block_count: u64,
        heap: &HeapGeometry,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let len = usize::try_from(block_count)?;
        let mut positions = Vec::with_capacity(len);
        for _ in 0..len {
            positions.push(heap.random_leaf(rng)?);
        }
        Ok(Self { positions })
    }

    /// Reconstructs a position map from persisted entries.
    pub(crate) fn from_entries(positions: Vec<NodeAddress>) -> Self {
        Self { positions }
    }

    /// The number of blocks mapped.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the leaf currently assigned to `id`.
    ///
    /// Callers bounds-check `id` before reaching the position map.
    pub fn get(&self, id: BlockId) -> NodeAddress {
        self.positions[id as usize]
    }

    /// Reassigns `id` to `leaf`.
    pub fn set(&mut self, id: BlockId, leaf: NodeAddress) {
        self.positions[id as usize] = leaf;
    }

    /// The raw entries, in id order.
    pub fn entries(&self) -> &[NodeAddress] {
        &self.positions
    }
}
