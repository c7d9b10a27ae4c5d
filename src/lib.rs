// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A Path ORAM block storage engine.
//!
//! This crate implements the client side of the Path ORAM protocol over an
//! untrusted, bucket-addressable backing store. The access pattern observed by
//! the store is independent of which logical block the client touches: every
//! access reads one full root-to-leaf path and writes it back, exactly
//! `height + 1` bucket reads followed by `height + 1` bucket writes.
//!
//! The client-side state (the position map and the stash) is persisted into
//! the store's header region under keyed integrity digests, so a store can be
//! closed and re-opened across process restarts, and tampering with the
//! persisted state is detected at open time.
//!
//! ```
//! use pathoram::{MemoryBucketStore, PathOram, SetupConfig};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> Result<(), pathoram::OramError> {
//! let mut rng = StdRng::seed_from_u64(0);
//! let store = MemoryBucketStore::new(&mut rng);
//! let config = SetupConfig::new(64, 8);
//! let mut oram = PathOram::setup(store, &config, rng)?;
//! oram.write_block(3, &[7u8; 64])?;
//! assert_eq!(oram.read_block(3)?, vec![7u8; 64]);
//! oram.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

use std::num::TryFromIntError;
use thiserror::Error;

pub mod bucket;
pub mod header;
pub mod heap;
pub(crate) mod path;
pub mod path_oram;
pub mod position_map;
pub mod stash;
pub mod storage;
#[cfg(test)]
pub(crate) mod test_utils;

pub use path_oram::{PathOram, SetupConfig};
pub use storage::{BucketStore, CachingBucketStore, MemoryBucketStore};

/// The type used to identify logical blocks.
pub type BlockId = u64;
/// The type used to address nodes (buckets) of the heap.
pub type NodeAddress = u64;
/// The type used to denote the size of an ORAM block in bytes.
pub type BlockSize = usize;
/// The type used to denote the number of block slots per bucket.
pub type BucketCapacity = usize;
/// The type used to denote the height of the heap.
pub type TreeHeight = u32;

/// The width in bytes of the keyed integrity digests stored in the header.
pub const DIGEST_LEN: usize = 32;

/// Errors produced by ORAM operations.
#[derive(Debug, Error)]
pub enum OramError {
    /// A setup parameter or payload was out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// A description of the rejected parameter.
        reason: &'static str,
    },
    /// A block id outside `[0, block_count)` was requested.
    #[error("block id {id} out of bounds for block count {block_count}")]
    AddressOutOfBounds {
        /// The requested block id.
        id: BlockId,
        /// The number of blocks stored by the ORAM.
        block_count: u64,
    },
    /// A bucket address outside the heap was requested.
    #[error("bucket address {0} out of range")]
    BucketOutOfRange(NodeAddress),
    /// A persisted digest or MAC did not match the recomputed one.
    #[error("integrity check failed for {region}")]
    IntegrityCheckFailed {
        /// The protected region that failed verification.
        region: &'static str,
    },
    /// The store header could not be parsed.
    #[error("malformed store header: {0}")]
    MalformedHeader(&'static str),
    /// An internal invariant was violated.
    ///
    /// This indicates either a defect or tampering with the backing store,
    /// not a recoverable condition.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(&'static str),
    /// An I/O error from the backing store.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An integer conversion failed.
    #[error(transparent)]
    IntegerConversion(#[from] TryFromIntError),
}
