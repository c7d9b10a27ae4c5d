// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Slot and bucket structures for Path ORAM.
//!
//! A bucket is the unit of transfer to and from the backing store. On the
//! wire it is `bucket_capacity` slots of `TAG_BYTES + block_size` bytes each:
//! a little-endian identity tag (the block id, or [`EMPTY_TAG`]) followed by
//! the payload. Empty slots carry a zeroed payload so that stale identities
//! and stale data never reach the store.

use crate::{BlockId, BlockSize, BucketCapacity, OramError};

/// The width in bytes of the identity tag at the start of each slot.
pub const TAG_BYTES: usize = 8;

/// The tag marking a slot that holds no block.
pub const EMPTY_TAG: u64 = u64::MAX;

/// A single block slot: an identity tag plus `block_size` payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    tag: u64,
    payload: Vec<u8>,
}

impl Slot {
    /// Returns an empty slot with a zeroed payload.
    pub fn empty(block_size: BlockSize) -> Self {
        Self {
            tag: EMPTY_TAG,
            payload: vec![0u8; block_size],
        }
    }

    /// Returns a slot holding `payload` tagged with `id`.
    pub fn occupied(id: BlockId, payload: Vec<u8>) -> Self {
        debug_assert_ne!(id, EMPTY_TAG);
        Self { tag: id, payload }
    }

    /// Returns whether this slot holds no block.
    pub fn is_empty(&self) -> bool {
        self.tag == EMPTY_TAG
    }

    /// Returns the id of the block held by this slot, or `None` if empty.
    pub fn id(&self) -> Option<BlockId> {
        if self.is_empty() {
            None
        } else {
            Some(self.tag)
        }
    }

    /// Returns a view of the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Moves the payload out, leaving the slot empty with a zeroed payload.
    pub(crate) fn take(&mut self) -> (BlockId, Vec<u8>) {
        debug_assert!(!self.is_empty());
        let id = self.tag;
        self.tag = EMPTY_TAG;
        let payload = std::mem::replace(&mut self.payload, vec![0u8; 0]);
        (id, payload)
    }

    /// Places `payload` into the slot under `id`.
    pub(crate) fn fill(&mut self, id: BlockId, payload: Vec<u8>) {
        debug_assert!(self.is_empty());
        self.tag = id;
        self.payload = payload;
    }
}

/// A decoded Path ORAM bucket: a fixed number of block slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    slots: Vec<Slot>,
}

impl Bucket {
    /// Returns the wire size in bytes of one slot.
    pub const fn slot_bytes(block_size: BlockSize) -> usize {
        TAG_BYTES + block_size
    }

    /// Returns the wire size in bytes of one bucket.
    pub const fn bucket_bytes(bucket_capacity: BucketCapacity, block_size: BlockSize) -> usize {
        bucket_capacity * Self::slot_bytes(block_size)
    }

    /// Returns a bucket of `bucket_capacity` empty slots.
    pub fn empty(bucket_capacity: BucketCapacity, block_size: BlockSize) -> Self {
        Self {
            slots: vec![Slot::empty(block_size); bucket_capacity],
        }
    }

    /// Decodes a bucket from its wire representation.
    ///
    /// # Errors
    ///
    /// Returns a `ConsistencyViolation` error if `bytes` does not match the
    /// expected wire size for the given geometry.
    pub fn decode(
        bytes: &[u8],
        bucket_capacity: BucketCapacity,
        block_size: BlockSize,
    ) -> Result<Self, OramError> {
        if bytes.len() != Self::bucket_bytes(bucket_capacity, block_size) {
            return Err(OramError::ConsistencyViolation(
                "bucket byte length does not match the heap geometry",
            ));
        }
        let mut slots = Vec::with_capacity(bucket_capacity);
        for chunk in bytes.chunks_exact(Self::slot_bytes(block_size)) {
            let mut tag_bytes = [0u8; TAG_BYTES];
            tag_bytes.copy_from_slice(&chunk[..TAG_BYTES]);
            let tag = u64::from_le_bytes(tag_bytes);
            let payload = chunk[TAG_BYTES..].to_vec();
            slots.push(Slot { tag, payload });
        }
        Ok(Self { slots })
    }

    /// Encodes the bucket into its wire representation, appending to `out`.
    ///
    /// Empty slots are written with a zeroed payload regardless of what their
    /// in-memory payload buffer holds.
    pub fn encode_into(&self, block_size: BlockSize, out: &mut Vec<u8>) {
        for slot in &self.slots {
            out.extend_from_slice(&slot.tag.to_le_bytes());
            if slot.is_empty() {
                out.resize(out.len() + block_size, 0u8);
            } else {
                debug_assert_eq!(slot.payload.len(), block_size);
                out.extend_from_slice(&slot.payload);
            }
        }
    }

    /// Returns a view of the slots.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Returns a mutable view of the slots.
    pub(crate) fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }
}
