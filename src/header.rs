// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The persisted store header and its keyed integrity digests.
//!
//! The controller-owned portion of the header records the heap geometry, the
//! block count, HMAC-SHA-256 digests of the stash and position map, and the
//! serialized stash and position map themselves. Caller-supplied header bytes
//! follow as an opaque trailer and are never touched by the controller.
//!
//! Layout, in order (integers little-endian `u64`):
//! `block_count | block_size | bucket_capacity | heap_base | height |
//! stash_digest | position_map_digest | position map entries |
//! stash_len | stash entries (id, block bytes) | caller bytes`.

use crate::position_map::PositionMap;
use crate::stash::Stash;
use crate::{BlockSize, BucketCapacity, NodeAddress, OramError, TreeHeight, DIGEST_LEN};
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// The byte fed into the stash digest in place of entries when the stash is
/// empty, so that "empty stash" has a well-defined digest.
const STASH_EMPTY_SENTINEL: u8 = 0;

/// The fixed-width prefix of the header: five `u64` fields and two digests.
const FIXED_FIELDS_LEN: usize = 5 * 8 + 2 * DIGEST_LEN;

pub(crate) fn new_keyed_digest(key: &[u8]) -> Result<HmacSha256, OramError> {
    // HMAC accepts keys of any length; this fails only on an unusable key
    // object, which we surface as a configuration problem.
    HmacSha256::new_from_slice(key).map_err(|_| OramError::InvalidConfiguration {
        reason: "store key is not usable as digest key material",
    })
}

fn finalize_digest(mac: HmacSha256) -> [u8; DIGEST_LEN] {
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    digest
}

/// Computes the keyed digest of the stash: `(id, block bytes)` pairs in
/// ascending id order, or the empty sentinel byte for an empty stash.
pub fn stash_digest(key: &[u8], stash: &Stash) -> Result<[u8; DIGEST_LEN], OramError> {
    let mut mac = new_keyed_digest(key)?;
    if stash.is_empty() {
        mac.update(&[STASH_EMPTY_SENTINEL]);
    } else {
        for (id, bytes) in stash.iter() {
            mac.update(&id.to_le_bytes());
            mac.update(bytes);
        }
    }
    Ok(finalize_digest(mac))
}

/// Computes the keyed digest of the position map: every entry's node address
/// in id order.
pub fn position_map_digest(
    key: &[u8],
    position_map: &PositionMap,
) -> Result<[u8; DIGEST_LEN], OramError> {
    let mut mac = new_keyed_digest(key)?;
    for &leaf in position_map.entries() {
        mac.update(&leaf.to_le_bytes());
    }
    Ok(finalize_digest(mac))
}

/// Compares two digests in constant time.
pub(crate) fn digests_match(a: &[u8; DIGEST_LEN], b: &[u8; DIGEST_LEN]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// The controller-owned header fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreHeader {
    /// The number of logical blocks stored by the ORAM.
    pub block_count: u64,
    /// The size of each block in bytes.
    pub block_size: BlockSize,
    /// The number of block slots per bucket.
    pub bucket_capacity: BucketCapacity,
    /// The branching factor of the heap.
    pub heap_base: u64,
    /// The height of the heap.
    pub height: TreeHeight,
    /// The keyed digest of the stash at the last header write.
    pub stash_digest: [u8; DIGEST_LEN],
    /// The keyed digest of the position map at the last header write.
    pub position_map_digest: [u8; DIGEST_LEN],
    /// Opaque caller-supplied header bytes.
    pub caller_data: Vec<u8>,
}

impl StoreHeader {
    /// Serializes the header together with the position map and stash it
    /// digests.
    pub fn encode(&self, position_map: &PositionMap, stash: &Stash) -> Result<Vec<u8>, OramError> {
        let position_map_len = position_map.len() * 8;
        let stash_len = stash.len() * (8 + self.block_size);
        let mut out = Vec::with_capacity(
            FIXED_FIELDS_LEN + position_map_len + 8 + stash_len + self.caller_data.len(),
        );

        out.extend_from_slice(&self.block_count.to_le_bytes());
        out.extend_from_slice(&u64::try_from(self.block_size)?.to_le_bytes());
        out.extend_from_slice(&u64::try_from(self.bucket_capacity)?.to_le_bytes());
        out.extend_from_slice(&self.heap_base.to_le_bytes());
        out.extend_from_slice(&u64::from(self.height).to_le_bytes());
        out.extend_from_slice(&self.stash_digest);
        out.extend_from_slice(&self.position_map_digest);

        for &leaf in position_map.entries() {
            out.extend_from_slice(&leaf.to_le_bytes());
        }

        out.extend_from_slice(&u64::try_from(stash.len())?.to_le_bytes());
        for (id, bytes) in stash.iter() {
            debug_assert_eq!(bytes.len(), self.block_size);
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(bytes);
        }

        out.extend_from_slice(&self.caller_data);
        Ok(out)
    }

    /// Parses a header region, reconstructing the position map and stash.
    ///
    /// # Errors
    ///
    /// Returns a `MalformedHeader` error if the region is truncated or its
    /// fields are internally inconsistent. Digest verification is the
    /// caller's responsibility.
    pub fn parse(bytes: &[u8]) -> Result<(Self, PositionMap, Stash), OramError> {
        let mut cursor = HeaderCursor::new(bytes);

        let block_count = cursor.read_u64()?;
        let block_size = usize::try_from(cursor.read_u64()?)?;
        let bucket_capacity = usize::try_from(cursor.read_u64()?)?;
        let heap_base = cursor.read_u64()?;
        let height = TreeHeight::try_from(cursor.read_u64()?)
            .map_err(|_| OramError::MalformedHeader("height field out of range"))?;
        let stash_digest = cursor.read_digest()?;
        let position_map_digest = cursor.read_digest()?;

        // Length fields are untrusted until the digests verify; bound them by
        // the bytes actually present before allocating anything.
        let entry_count = usize::try_from(block_count)?;
        if entry_count > cursor.remaining() / 8 {
            return Err(OramError::MalformedHeader(
                "position map length exceeds header region",
            ));
        }
        let mut positions: Vec<NodeAddress> = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            positions.push(cursor.read_u64()?);
        }
        let position_map = PositionMap::from_entries(positions);

        let stash_len = usize::try_from(cursor.read_u64()?)?;
        let stash_entry_bytes = block_size
            .checked_add(8)
            .ok_or(OramError::MalformedHeader("block size field out of range"))?;
        if stash_len > cursor.remaining() / stash_entry_bytes {
            return Err(OramError::MalformedHeader(
                "stash length exceeds header region",
            ));
        }
        let mut stash = Stash::new();
        for _ in 0..stash_len {
            let id = cursor.read_u64()?;
            let payload = cursor.read_exact(block_size)?.to_vec();
            stash
                .insert(id, payload)
                .map_err(|_| OramError::MalformedHeader("duplicate stash entry"))?;
        }

        let caller_data = cursor.rest().to_vec();

        let header = Self {
            block_count,
            block_size,
            bucket_capacity,
            heap_base,
            height,
            stash_digest,
            position_map_digest,
            caller_data,
        };
        Ok((header, position_map, stash))
    }
}

struct HeaderCursor<'a> {
    bytes: &'a [u8],
}

impl<'a> HeaderCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], OramError> {
        if self.bytes.len() < len {
            return Err(OramError::MalformedHeader("truncated header region"));
        }
        let (taken, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(taken)
    }

    fn read_u64(&mut self) -> Result<u64, OramError> {
        let mut field = [0u8; 8];
        field.copy_from_slice(self.read_exact(8)?);
        Ok(u64::from_le_bytes(field))
    }

    fn read_digest(&mut self) -> Result<[u8; DIGEST_LEN], OramError> {
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(self.read_exact(DIGEST_LEN)?);
        Ok(digest)
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn rest(&self) -> &'a [u8] {
        self.bytes
    }
}
