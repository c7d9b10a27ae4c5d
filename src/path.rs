// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The path access engine: load, extract, push down, fill, and evict along
//! one root-to-leaf path.
//!
//! The engine owns reusable buffers for one decoded path (`height + 1`
//! buckets and their node addresses) so that an access does not allocate a
//! fresh path each call. Loading and evicting a path always touches exactly
//! `height + 1` buckets; that constant cost is a security property of the
//! protocol and must not be short-circuited.

use crate::bucket::Bucket;
use crate::heap::HeapGeometry;
use crate::position_map::PositionMap;
use crate::stash::Stash;
use crate::storage::BucketStore;
use crate::{BlockId, BlockSize, BucketCapacity, NodeAddress, OramError, TreeHeight};

#[derive(Debug)]
pub(crate) struct PathAccessEngine {
    block_size: BlockSize,
    bucket_capacity: BucketCapacity,
    /// Node addresses of the loaded path, root-first; `nodes[i]` is at level `i`.
    nodes: Vec<NodeAddress>,
    /// Decoded buckets of the loaded path, parallel to `nodes`.
    buckets: Vec<Bucket>,
    /// Scratch space for encoding buckets during eviction.
    encode_buffer: Vec<u8>,
    /// Scratch space for the stash ids considered during a fill.
    fill_candidates: Vec<BlockId>,
}

impl PathAccessEngine {
    pub(crate) fn new(
        block_size: BlockSize,
        bucket_capacity: BucketCapacity,
        height: TreeHeight,
    ) -> Self {
        let path_len = height as usize + 1;
        Self {
            block_size,
            bucket_capacity,
            nodes: Vec::with_capacity(path_len),
            buckets: Vec::with_capacity(path_len),
            encode_buffer: Vec::with_capacity(Bucket::bucket_bytes(bucket_capacity, block_size)),
            fill_candidates: Vec::new(),
        }
    }

    /// Reads every bucket on the root-to-`leaf` path into the path buffer:
    /// exactly `height + 1` bucket reads, unconditionally.
    pub(crate) fn load_path<S: BucketStore>(
        &mut self,
        heap: &HeapGeometry,
        store: &mut S,
        leaf: NodeAddress,
    ) -> Result<(), OramError> {
        heap.path_from_root_into(leaf, &mut self.nodes)?;
        self.buckets.clear();
        for &node in &self.nodes {
            let bytes = store.get_bucket(node)?;
            self.buckets
                .push(Bucket::decode(&bytes, self.bucket_capacity, self.block_size)?);
        }
        Ok(())
    }

    /// Removes the block tagged `id` from the loaded path, or from the stash
    /// if no path slot holds it.
    ///
    /// # Errors
    ///
    /// Returns a `ConsistencyViolation` error if the block is held by both
    /// the path and the stash, or by neither; exactly one of the two holds it
    /// at this point in the protocol.
    pub(crate) fn extract_block(
        &mut self,
        id: BlockId,
        stash: &mut Stash,
    ) -> Result<Vec<u8>, OramError> {
        let mut from_path: Option<Vec<u8>> = None;
        for bucket in &mut self.buckets {
            for slot in bucket.slots_mut() {
                if slot.id() == Some(id) {
                    if from_path.is_some() {
                        return Err(OramError::ConsistencyViolation(
                            "block tagged in more than one path slot",
                        ));
                    }
                    let (_, payload) = slot.take();
                    from_path = Some(payload);
                }
            }
        }

        match (from_path, stash.contains(id)) {
            (Some(_), true) => Err(OramError::ConsistencyViolation(
                "block held by both the path and the stash",
            )),
            (Some(payload), false) => Ok(payload),
            (None, true) => {
                // remove() cannot miss here; contains() just held.
                stash.remove(id).ok_or(OramError::ConsistencyViolation(
                    "stash entry vanished during extraction",
                ))
            }
            (None, false) => Err(OramError::ConsistencyViolation(
                "block found in neither the path nor the stash",
            )),
        }
    }

    /// Absorbs every remaining tagged slot of the loaded path into the stash,
    /// leaving the path buffer all-empty.
    pub(crate) fn push_down_path(&mut self, stash: &mut Stash) -> Result<(), OramError> {
        for bucket in &mut self.buckets {
            for slot in bucket.slots_mut() {
                if !slot.is_empty() {
                    let (id, payload) = slot.take();
                    stash.insert(id, payload)?;
                }
            }
        }
        Ok(())
    }

    /// Walks the path buckets from leaf to root, greedily moving stash
    /// entries into any bucket lying on the entry's current root-to-leaf
    /// path. Entries that fit nowhere stay in the stash; slots left unfilled
    /// remain explicitly tagged empty.
    pub(crate) fn fill_path_from_stash(
        &mut self,
        heap: &HeapGeometry,
        stash: &mut Stash,
        position_map: &PositionMap,
    ) -> Result<(), OramError> {
        let mut candidates = std::mem::take(&mut self.fill_candidates);
        stash.ids_into(&mut candidates);

        for depth in (0..self.nodes.len()).rev() {
            let node = self.nodes[depth];
            let level = depth as TreeHeight;
            let bucket = &mut self.buckets[depth];

            for slot in bucket.slots_mut() {
                debug_assert!(slot.is_empty());
                // Find the next candidate routed through this bucket.
                let mut chosen = None;
                for (index, &id) in candidates.iter().enumerate() {
                    if heap.ancestor_at_level(position_map.get(id), level)? == node {
                        chosen = Some((index, id));
                        break;
                    }
                }
                let Some((index, id)) = chosen else {
                    continue;
                };
                candidates.swap_remove(index);
                let payload = stash.remove(id).ok_or(OramError::ConsistencyViolation(
                    "fill candidate missing from the stash",
                ))?;
                slot.fill(id, payload);
            }
        }

        candidates.clear();
        self.fill_candidates = candidates;
        Ok(())
    }

    /// Writes the entire path buffer back to the store: exactly `height + 1`
    /// bucket writes, unconditionally.
    pub(crate) fn evict_path<S: BucketStore>(&mut self, store: &mut S) -> Result<(), OramError> {
        for (node, bucket) in self.nodes.iter().zip(&self.buckets) {
            self.encode_buffer.clear();
            bucket.encode_into(self.block_size, &mut self.encode_buffer);
            store.put_bucket(*node, &self.encode_buffer)?;
        }
        Ok(())
    }
}
