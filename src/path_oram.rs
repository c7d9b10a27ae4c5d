// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM controller.
//!
//! The controller owns the position map and the stash for its lifetime, takes
//! ownership of the backing store, and closes the store exactly once: on
//! [`PathOram::close`], on any setup or open failure after the store was
//! touched, or as a last resort when the controller is dropped without being
//! closed.
//!
//! Accesses are fully sequential. A single [`PathOram::access`] is a
//! multi-step sequence of dependent reads and writes against the position map
//! and stash interleaved with store round trips; `&mut self` enforces the
//! single-writer discipline at the type level. A failed access leaves the
//! structure in an indeterminate state and callers must re-open and
//! re-verify.

use crate::bucket::{Bucket, EMPTY_TAG, TAG_BYTES};
use crate::header::{self, StoreHeader};
use crate::heap::HeapGeometry;
use crate::path::PathAccessEngine;
use crate::position_map::PositionMap;
use crate::stash::Stash;
use crate::storage::BucketStore;
use crate::{BlockId, BlockSize, BucketCapacity, OramError, TreeHeight};
use rand::{CryptoRng, RngCore};

/// The parameter "Z" from the Path ORAM literature that sets the number of
/// blocks per bucket; typical values are 3 or 4. Here we adopt the more
/// conservative setting of 4.
pub const DEFAULT_BUCKET_CAPACITY: BucketCapacity = 4;

/// The default branching factor of the heap.
pub const DEFAULT_HEAP_BASE: u64 = 2;

/// How often bulk setup reports progress, in blocks placed.
const PROGRESS_INTERVAL: u64 = 1024;

/// Parameters for [`PathOram::setup`].
#[derive(Clone, Debug)]
pub struct SetupConfig {
    /// The size of each logical block in bytes. Must be positive.
    pub block_size: BlockSize,
    /// The number of logical blocks. Must be positive.
    pub block_count: u64,
    /// The number of block slots per bucket. Must be at least 1.
    pub bucket_capacity: BucketCapacity,
    /// The branching factor of the heap. Must be at least 2.
    pub heap_base: u64,
    /// Caller-supplied header bytes stored alongside the controller's own
    /// header fields.
    pub header_data: Vec<u8>,
    /// Whether bulk setup logs periodic progress reports.
    pub report_progress: bool,
}

impl SetupConfig {
    /// Returns a configuration with default bucket capacity and heap base,
    /// no caller header bytes, and progress reporting disabled.
    pub fn new(block_size: BlockSize, block_count: u64) -> Self {
        Self {
            block_size,
            block_count,
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            heap_base: DEFAULT_HEAP_BASE,
            header_data: Vec::new(),
            report_progress: false,
        }
    }

    fn validate(&self) -> Result<(), OramError> {
        if self.block_size == 0 {
            return Err(OramError::InvalidConfiguration {
                reason: "block size must be positive",
            });
        }
        if self.block_count == 0 {
            return Err(OramError::InvalidConfiguration {
                reason: "block count must be positive",
            });
        }
        if self.block_count >= EMPTY_TAG {
            return Err(OramError::InvalidConfiguration {
                reason: "block count must leave the empty slot tag representable",
            });
        }
        if self.bucket_capacity == 0 {
            return Err(OramError::InvalidConfiguration {
                reason: "bucket capacity must be at least 1",
            });
        }
        if self.heap_base < 2 {
            return Err(OramError::InvalidConfiguration {
                reason: "heap base must be at least 2",
            });
        }
        if bucket_wire_bytes(self.bucket_capacity, self.block_size).is_none() {
            return Err(OramError::InvalidConfiguration {
                reason: "bucket wire size overflows",
            });
        }
        Ok(())
    }
}

/// A Path ORAM over a [`BucketStore`].
///
/// Every access reads one root-to-leaf path and writes it back: exactly
/// `height + 1` bucket reads followed by `height + 1` bucket writes,
/// independent of the block id, of whether the access is a read or a write,
/// and of where the block was found.
#[derive(Debug)]
pub struct PathOram<S: BucketStore, R: RngCore + CryptoRng> {
    store: Option<S>,
    rng: R,
    heap: HeapGeometry,
    block_size: BlockSize,
    block_count: u64,
    bucket_capacity: BucketCapacity,
    position_map: PositionMap,
    stash: Stash,
    engine: PathAccessEngine,
    caller_header: Vec<u8>,
}

impl<S: BucketStore, R: RngCore + CryptoRng> PathOram<S, R> {
    /// Creates a new ORAM over `store` with every block zero-filled.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfiguration` error, before any store I/O, if a
    /// parameter is out of range or the requested block count cannot be
    /// covered by any supported heap height.
    pub fn setup(store: S, config: &SetupConfig, rng: R) -> Result<Self, OramError> {
        let block_size = config.block_size;
        Self::setup_with_initializer(store, config, rng, |_| vec![0u8; block_size])
    }

    /// Creates a new ORAM over `store`, obtaining each block's initial
    /// payload from `initializer`.
    ///
    /// Payloads must be exactly `block_size` bytes.
    pub fn setup_with_initializer<F>(
        store: S,
        config: &SetupConfig,
        mut rng: R,
        initializer: F,
    ) -> Result<Self, OramError>
    where
        F: FnMut(BlockId) -> Vec<u8>,
    {
        // All validation happens before the store is touched, so a rejected
        // configuration leaves no partially initialized store behind.
        config.validate()?;
        let height = HeapGeometry::minimum_height(
            config.heap_base,
            config.bucket_capacity,
            config.block_count,
        )?;
        let heap = HeapGeometry::new(config.heap_base, height)?;

        log::info!(
            "PathOram::setup(block_count = {}, block_size = {}, bucket_capacity = {}, heap_base = {}, height = {})",
            config.block_count,
            config.block_size,
            config.bucket_capacity,
            config.heap_base,
            height,
        );

        let position_map = PositionMap::sample(config.block_count, &heap, &mut rng)?;
        let engine = PathAccessEngine::new(config.block_size, config.bucket_capacity, height);
        let mut oram = Self {
            store: Some(store),
            rng,
            heap,
            block_size: config.block_size,
            block_count: config.block_count,
            bucket_capacity: config.bucket_capacity,
            position_map,
            stash: Stash::new(),
            engine,
            caller_header: config.header_data.clone(),
        };

        if let Err(err) = oram.bootstrap(config.report_progress, initializer) {
            oram.teardown_store_best_effort();
            return Err(err);
        }
        Ok(oram)
    }

    /// Opens an existing ORAM from `store`.
    ///
    /// Recomputes the keyed digests of the persisted stash and position map
    /// and verifies them against the stored ones.
    ///
    /// # Errors
    ///
    /// Returns an `IntegrityCheckFailed` error on digest mismatch and a
    /// `MalformedHeader` error on a header that cannot be reconciled with the
    /// store. On any failure the store is closed before the error propagates.
    pub fn open(mut store: S, rng: R) -> Result<Self, OramError> {
        match Self::verify_and_load(&mut store) {
            Ok((parsed, position_map, stash, heap)) => {
                log::info!(
                    "PathOram::open(block_count = {}, height = {})",
                    parsed.block_count,
                    heap.height(),
                );
                let engine = PathAccessEngine::new(
                    parsed.block_size,
                    parsed.bucket_capacity,
                    heap.height(),
                );
                Ok(Self {
                    store: Some(store),
                    rng,
                    heap,
                    block_size: parsed.block_size,
                    block_count: parsed.block_count,
                    bucket_capacity: parsed.bucket_capacity,
                    position_map,
                    stash,
                    engine,
                    caller_header: parsed.caller_data,
                })
            }
            Err(err) => {
                if let Err(close_err) = store.close() {
                    log::error!("failed to close bucket store after open failure: {close_err}");
                }
                Err(err)
            }
        }
    }

    fn verify_and_load(
        store: &mut S,
    ) -> Result<(StoreHeader, PositionMap, Stash, HeapGeometry), OramError> {
        let header_bytes = store.header_data()?;
        let (parsed, position_map, stash) = StoreHeader::parse(&header_bytes)?;

        let heap = HeapGeometry::new(parsed.heap_base, parsed.height)?;
        let capacity = heap
            .bucket_count()
            .saturating_mul(u64::try_from(parsed.bucket_capacity)?);
        if parsed.block_count > capacity {
            return Err(OramError::MalformedHeader(
                "block count exceeds heap capacity",
            ));
        }
        if store.bucket_count() != heap.bucket_count() {
            return Err(OramError::MalformedHeader(
                "store bucket count does not match heap geometry",
            ));
        }
        let bucket_bytes = bucket_wire_bytes(parsed.bucket_capacity, parsed.block_size)
            .ok_or(OramError::MalformedHeader("bucket size fields overflow"))?;
        if store.bucket_size() != bucket_bytes {
            return Err(OramError::MalformedHeader(
                "store bucket size does not match heap geometry",
            ));
        }

        let stash_digest = header::stash_digest(store.key(), &stash)?;
        if !header::digests_match(&stash_digest, &parsed.stash_digest) {
            return Err(OramError::IntegrityCheckFailed { region: "stash" });
        }
        let position_map_digest = header::position_map_digest(store.key(), &position_map)?;
        if !header::digests_match(&position_map_digest, &parsed.position_map_digest) {
            return Err(OramError::IntegrityCheckFailed {
                region: "position map",
            });
        }

        Ok((parsed, position_map, stash, heap))
    }

    /// Builds the all-empty heap and runs one bootstrap eviction cycle per
    /// block so that the tree converges to holding every block.
    fn bootstrap<F>(&mut self, report_progress: bool, mut initializer: F) -> Result<(), OramError>
    where
        F: FnMut(BlockId) -> Vec<u8>,
    {
        let bucket_bytes = Bucket::bucket_bytes(self.bucket_capacity, self.block_size);
        let store = self.store.as_mut().ok_or_else(store_missing_error)?;
        store.allocate(self.heap.bucket_count(), bucket_bytes)?;

        let empty = Bucket::empty(self.bucket_capacity, self.block_size);
        let mut encoded = Vec::with_capacity(bucket_bytes);
        empty.encode_into(self.block_size, &mut encoded);
        for node in 0..self.heap.bucket_count() {
            store.put_bucket(node, &encoded)?;
        }

        for id in 0..self.block_count {
            let payload = initializer(id);
            if payload.len() != self.block_size {
                return Err(OramError::InvalidConfiguration {
                    reason: "initializer payload length does not equal block size",
                });
            }
            self.stash.insert(id, payload)?;
            let leaf = self.position_map.get(id);
            self.engine.load_path(&self.heap, store, leaf)?;
            self.engine.push_down_path(&mut self.stash)?;
            self.engine
                .fill_path_from_stash(&self.heap, &mut self.stash, &self.position_map)?;
            self.engine.evict_path(store)?;

            if report_progress && (id + 1) % PROGRESS_INTERVAL == 0 {
                log::info!("setup progress: {}/{} blocks placed", id + 1, self.block_count);
            }
        }
        if report_progress {
            log::info!("setup complete: {} blocks placed", self.block_count);
        }

        self.write_header()
    }

    /// Reads or writes one block.
    ///
    /// With `write_block` absent this is a read and returns `Some(payload)`;
    /// with `write_block` present the block's payload is replaced and `None`
    /// is returned. Either way the store observes an identical pattern:
    /// `height + 1` bucket reads followed by `height + 1` bucket writes.
    ///
    /// # Errors
    ///
    /// Returns an `AddressOutOfBounds` error unless `id < block_count`.
    /// Store errors propagate unchanged; after one, the structure must be
    /// treated as indeterminate and re-opened.
    pub fn access(
        &mut self,
        id: BlockId,
        write_block: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, OramError> {
        if id >= self.block_count {
            return Err(OramError::AddressOutOfBounds {
                id,
                block_count: self.block_count,
            });
        }
        if let Some(bytes) = write_block {
            if bytes.len() != self.block_size {
                return Err(OramError::InvalidConfiguration {
                    reason: "write payload length does not equal block size",
                });
            }
        }
        let store = self.store.as_mut().ok_or_else(store_missing_error)?;

        // Re-randomize the position before the path is read, so the new path
        // is independent of which bucket currently holds the block.
        let leaf = self.position_map.get(id);
        let level = self.heap.level_of(leaf)?;
        let new_leaf = self.heap.random_bucket_at_level(level, &mut self.rng)?;
        self.position_map.set(id, new_leaf);

        self.engine.load_path(&self.heap, store, leaf)?;
        let mut payload = self.engine.extract_block(id, &mut self.stash)?;

        let result = match write_block {
            Some(bytes) => {
                payload.clear();
                payload.extend_from_slice(bytes);
                None
            }
            None => Some(payload.clone()),
        };
        self.stash.insert(id, payload)?;

        self.engine.push_down_path(&mut self.stash)?;
        self.engine
            .fill_path_from_stash(&self.heap, &mut self.stash, &self.position_map)?;
        self.engine.evict_path(store)?;

        Ok(result)
    }

    /// Reads the block stored under `id`.
    pub fn read_block(&mut self, id: BlockId) -> Result<Vec<u8>, OramError> {
        self.access(id, None)?
            .ok_or(OramError::ConsistencyViolation(
                "read access produced no payload",
            ))
    }

    /// Replaces the block stored under `id` with `data`.
    pub fn write_block(&mut self, id: BlockId, data: &[u8]) -> Result<(), OramError> {
        self.access(id, Some(data))?;
        Ok(())
    }

    /// Reads several blocks, one access per id, in the given order.
    pub fn read_blocks(&mut self, ids: &[BlockId]) -> Result<Vec<Vec<u8>>, OramError> {
        let mut blocks = Vec::with_capacity(ids.len());
        for &id in ids {
            blocks.push(self.read_block(id)?);
        }
        Ok(blocks)
    }

    /// Writes several blocks, one access per pair, in the given order.
    pub fn write_blocks<'a, I>(&mut self, blocks: I) -> Result<(), OramError>
    where
        I: IntoIterator<Item = (BlockId, &'a [u8])>,
    {
        for (id, data) in blocks {
            self.write_block(id, data)?;
        }
        Ok(())
    }

    /// Recomputes the integrity digests, rewrites the header (preserving
    /// caller header bytes), and closes the store.
    ///
    /// The store is closed even if the header write fails; the returned
    /// (closed) store hands ownership back to the caller.
    pub fn close(mut self) -> Result<S, OramError> {
        log::info!("PathOram::close()");
        let header_result = self.write_header();
        let mut store = self.store.take().ok_or_else(store_missing_error)?;
        let close_result = store.close();
        header_result?;
        close_result?;
        Ok(store)
    }

    /// The caller-visible portion of the store header.
    pub fn header_data(&self) -> &[u8] {
        &self.caller_header
    }

    /// Replaces the caller-visible portion of the store header and writes
    /// the header through to the store.
    pub fn update_header_data(&mut self, data: &[u8]) -> Result<(), OramError> {
        self.caller_header = data.to_vec();
        self.write_header()
    }

    /// The number of logical blocks stored.
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// The size of each logical block in bytes.
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// The height of the heap.
    pub fn height(&self) -> TreeHeight {
        self.heap.height()
    }

    /// The number of blocks currently overflowed into the stash.
    pub fn stash_occupancy(&self) -> usize {
        self.stash.len()
    }

    /// Total bytes written to the backing store so far.
    pub fn bytes_sent(&self) -> u64 {
        self.store.as_ref().map(S::bytes_sent).unwrap_or(0)
    }

    /// Total bytes read from the backing store so far.
    pub fn bytes_received(&self) -> u64 {
        self.store.as_ref().map(S::bytes_received).unwrap_or(0)
    }

    fn write_header(&mut self) -> Result<(), OramError> {
        let store = self.store.as_mut().ok_or_else(store_missing_error)?;
        let stash_digest = header::stash_digest(store.key(), &self.stash)?;
        let position_map_digest = header::position_map_digest(store.key(), &self.position_map)?;
        let header = StoreHeader {
            block_count: self.block_count,
            block_size: self.block_size,
            bucket_capacity: self.bucket_capacity,
            heap_base: self.heap.base(),
            height: self.heap.height(),
            stash_digest,
            position_map_digest,
            caller_data: self.caller_header.clone(),
        };
        let encoded = header.encode(&self.position_map, &self.stash)?;
        store.set_header_data(&encoded)
    }

    fn teardown_store_best_effort(&mut self) {
        if let Some(mut store) = self.store.take() {
            if let Err(err) = store.close() {
                log::error!("failed to close bucket store: {err}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn position_of(&self, id: BlockId) -> crate::NodeAddress {
        self.position_map.get(id)
    }

    #[cfg(test)]
    pub(crate) fn store_ref(&self) -> &S {
        self.store.as_ref().unwrap()
    }
}

fn store_missing_error() -> OramError {
    OramError::ConsistencyViolation("bucket store already relinquished")
}

/// [`Bucket::bucket_bytes`] with checked arithmetic, for sizes that have not
/// been validated yet.
fn bucket_wire_bytes(bucket_capacity: BucketCapacity, block_size: BlockSize) -> Option<usize> {
    block_size
        .checked_add(TAG_BYTES)
        .and_then(|slot_bytes| slot_bytes.checked_mul(bucket_capacity))
}

impl<S: BucketStore, R: RngCore + CryptoRng> Drop for PathOram<S, R> {
    fn drop(&mut self) {
        if self.store.is_some() {
            log::warn!("PathOram dropped without close(); closing the bucket store");
            self.teardown_store_best_effort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CachingBucketStore;
    use crate::test_utils::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    // Correctness grids over bucket capacity, heap base, block size, and
    // block count, in random and linear workloads.
    create_correctness_tests!(4, 2, 64, 8);
    create_correctness_tests!(4, 2, 64, 64);
    create_correctness_tests!(4, 2, 16, 32);
    create_correctness_tests!(3, 2, 32, 16);
    create_correctness_tests!(2, 2, 16, 8);
    create_correctness_tests!(1, 2, 16, 4);
    create_correctness_tests!(4, 3, 64, 27);
    create_correctness_tests!(4, 5, 32, 30);

    #[test]
    fn initial_contents_are_zero_filled() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 32, 8);
        for id in 0..8 {
            assert_eq!(oram.read_block(id).unwrap(), vec![0u8; 32]);
        }
    }

    #[test]
    fn initializer_payloads_are_returned() {
        init_logger();
        let config = test_config(32, 8, 4, 2);
        let mut oram = PathOram::setup_with_initializer(
            seeded_store(0),
            &config,
            StdRng::seed_from_u64(1),
            |id| vec![id as u8 + 1; 32],
        )
        .unwrap();
        for id in 0..8 {
            assert_eq!(oram.read_block(id).unwrap(), vec![id as u8 + 1; 32]);
        }
    }

    #[test]
    fn initializer_with_wrong_payload_length_fails() {
        let config = test_config(32, 8, 4, 2);
        let result = PathOram::setup_with_initializer(
            seeded_store(0),
            &config,
            StdRng::seed_from_u64(1),
            |_| vec![0u8; 31],
        );
        assert!(matches!(
            result,
            Err(OramError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        for config in [
            test_config(0, 8, 4, 2),
            test_config(64, 0, 4, 2),
            test_config(64, 8, 0, 2),
            test_config(64, 8, 4, 1),
            test_config(64, 8, 4, 0),
        ] {
            let result =
                PathOram::setup(seeded_store(0), &config, StdRng::seed_from_u64(1));
            assert!(matches!(
                result,
                Err(OramError::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn rejects_bucket_sizes_that_overflow() {
        let config = test_config(usize::MAX - 4, 8, 4, 2);
        let result = PathOram::setup(seeded_store(0), &config, StdRng::seed_from_u64(1));
        assert!(matches!(
            result,
            Err(OramError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn rejects_block_counts_no_height_can_cover() {
        let config = test_config(8, 1 << 40, 1, 2);
        let result = PathOram::setup(seeded_store(0), &config, StdRng::seed_from_u64(1));
        assert!(matches!(
            result,
            Err(OramError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn bounds_check_is_exclusive() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 16, 8);
        assert!(oram.access(7, None).unwrap().is_some());
        assert!(matches!(
            oram.access(8, None),
            Err(OramError::AddressOutOfBounds {
                id: 8,
                block_count: 8
            })
        ));
    }

    #[test]
    fn write_returns_none_and_read_returns_some() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 16, 8);
        assert!(oram.access(3, Some(&[9u8; 16])).unwrap().is_none());
        assert_eq!(oram.access(3, None).unwrap(), Some(vec![9u8; 16]));
    }

    #[test]
    fn write_rejects_wrong_payload_length() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 16, 8);
        assert!(oram.write_block(0, &[0u8; 15]).is_err());
        assert!(oram.write_block(0, &[0u8; 17]).is_err());
    }

    #[test]
    fn every_access_reads_and_writes_one_full_path() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 16, 32);
        let path_len = u64::from(oram.height()) + 1;

        let mut reads = oram.store_ref().bucket_reads();
        let mut writes = oram.store_ref().bucket_writes();
        for (id, write) in [(0u64, false), (31, true), (0, false), (17, true), (17, false)] {
            if write {
                oram.write_block(id, &[1u8; 16]).unwrap();
            } else {
                oram.read_block(id).unwrap();
            }
            assert_eq!(oram.store_ref().bucket_reads() - reads, path_len);
            assert_eq!(oram.store_ref().bucket_writes() - writes, path_len);
            reads = oram.store_ref().bucket_reads();
            writes = oram.store_ref().bucket_writes();
        }
    }

    #[test]
    fn positions_are_rerandomized_to_valid_leaves() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 16, 32);
        let mut changed = false;
        for _ in 0..32 {
            let before = oram.position_of(5);
            oram.read_block(5).unwrap();
            let after = oram.position_of(5);
            assert_eq!(
                oram.heap.level_of(after).unwrap(),
                oram.heap.height(),
                "position map entries must stay at leaf level"
            );
            changed |= before != after;
        }
        assert!(changed, "32 accesses never re-randomized the position");
    }

    #[test]
    fn stash_stays_small_under_load() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 16, 64);
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..500 {
            let id = rng.gen_range(0..64u64);
            oram.read_block(id).unwrap();
        }
        assert!(oram.stash_occupancy() < 40);
    }

    #[test]
    fn close_open_round_trip_preserves_contents() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 64, 8);
        oram.write_block(3, &[b'X'; 64]).unwrap();
        oram.write_block(7, &[b'Y'; 64]).unwrap();
        let expected_stash_size = oram.stash_occupancy();

        let mut store = oram.close().unwrap();
        store.reopen();
        let mut reopened =
            PathOram::open(store, StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(reopened.block_count(), 8);
        assert_eq!(reopened.stash_occupancy(), expected_stash_size);
        assert_eq!(reopened.read_block(3).unwrap(), vec![b'X'; 64]);
        assert_eq!(reopened.read_block(7).unwrap(), vec![b'Y'; 64]);
        assert_eq!(reopened.read_block(0).unwrap(), vec![0u8; 64]);
    }

    #[test]
    fn tampered_header_digest_fails_open() {
        init_logger();
        let oram = setup_test_oram(4, 2, 16, 8);
        let mut store = oram.close().unwrap();
        store.reopen();
        // Flip a byte inside the stash digest field (the fixed fields are
        // five u64 values followed by the two digests).
        store.flip_header_byte(5 * 8 + 3);
        let result = PathOram::open(store, StdRng::seed_from_u64(11));
        assert!(matches!(
            result,
            Err(OramError::IntegrityCheckFailed { .. })
        ));
    }

    #[test]
    fn tampered_position_map_fails_open() {
        init_logger();
        let oram = setup_test_oram(4, 2, 16, 8);
        let mut store = oram.close().unwrap();
        store.reopen();
        // Flip a byte inside the serialized position map entries.
        store.flip_header_byte(5 * 8 + 2 * crate::DIGEST_LEN + 2);
        let result = PathOram::open(store, StdRng::seed_from_u64(11));
        assert!(matches!(
            result,
            Err(OramError::IntegrityCheckFailed {
                region: "position map"
            })
        ));
    }

    #[test]
    fn tampered_bucket_fails_on_first_touch() {
        init_logger();
        let oram = setup_test_oram(4, 2, 16, 8);
        let mut store = oram.close().unwrap();
        store.reopen();
        // The root bucket is on every path, so the very next access reads it.
        store.flip_bucket_byte(0, 0);
        let mut reopened = PathOram::open(store, StdRng::seed_from_u64(11)).unwrap();
        assert!(matches!(
            reopened.read_block(0),
            Err(OramError::IntegrityCheckFailed { region: "bucket" })
        ));
    }

    #[test]
    fn header_data_round_trips_and_survives_reopen() {
        init_logger();
        let config = SetupConfig {
            header_data: b"application metadata".to_vec(),
            ..test_config(16, 8, 4, 2)
        };
        let mut oram =
            PathOram::setup(seeded_store(0), &config, StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(oram.header_data(), b"application metadata");
        oram.update_header_data(b"replaced").unwrap();

        let mut store = oram.close().unwrap();
        store.reopen();
        let reopened = PathOram::open(store, StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(reopened.header_data(), b"replaced");
    }

    #[test]
    fn batch_wrappers_match_single_block_operations() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 8, 16);
        let first = vec![1u8; 8];
        let second = vec![2u8; 8];
        oram.write_blocks([(2u64, first.as_slice()), (9, second.as_slice())])
            .unwrap();
        assert_eq!(
            oram.read_blocks(&[2, 9, 0]).unwrap(),
            vec![first, second, vec![0u8; 8]]
        );
    }

    #[test]
    fn write_read_reopen_scenario() {
        init_logger();
        let config = test_config(64, 8, 4, 2);
        let mut oram =
            PathOram::setup(seeded_store(42), &config, StdRng::seed_from_u64(43)).unwrap();
        oram.write_block(3, &[b'X'; 64]).unwrap();
        assert_eq!(oram.read_block(3).unwrap(), vec![b'X'; 64]);
        assert_eq!(oram.read_block(5).unwrap(), vec![0u8; 64]);

        let mut store = oram.close().unwrap();
        store.reopen();
        let mut reopened = PathOram::open(store, StdRng::seed_from_u64(44)).unwrap();
        assert_eq!(reopened.read_block(3).unwrap(), vec![b'X'; 64]);
    }

    #[test]
    fn byte_counters_grow_with_traffic() {
        init_logger();
        let mut oram = setup_test_oram(4, 2, 16, 8);
        let sent_before = oram.bytes_sent();
        let received_before = oram.bytes_received();
        oram.read_block(1).unwrap();
        let path_len = u64::from(oram.height()) + 1;
        let bucket_bytes = Bucket::bucket_bytes(4, 16) as u64;
        assert_eq!(oram.bytes_received() - received_before, path_len * bucket_bytes);
        assert_eq!(oram.bytes_sent() - sent_before, path_len * bucket_bytes);
    }

    #[test]
    fn runs_over_a_caching_store() {
        init_logger();
        let inner = seeded_store(3);
        let store = CachingBucketStore::new(inner, 3).unwrap();
        let config = test_config(32, 16, 4, 2);
        let mut oram =
            PathOram::setup(store, &config, StdRng::seed_from_u64(5)).unwrap();
        let mut mirror = vec![vec![0u8; 32]; 16];
        let mut rng = StdRng::seed_from_u64(6);
        for _ in 0..100 {
            let id = rng.gen_range(0..16u64);
            if rng.gen::<bool>() {
                assert_eq!(oram.read_block(id).unwrap(), mirror[id as usize]);
            } else {
                let value = random_payload(&mut rng, 32);
                oram.write_block(id, &value).unwrap();
                mirror[id as usize] = value;
            }
        }

        // Closing flushes the cached top levels; the inner store must then
        // hold a complete, reopenable image.
        let caching = oram.close().unwrap();
        let mut inner = caching.into_inner();
        inner.reopen();
        let store = CachingBucketStore::new(inner, 3).unwrap();
        let mut reopened = PathOram::open(store, StdRng::seed_from_u64(7)).unwrap();
        for (id, expected) in mirror.iter().enumerate() {
            assert_eq!(reopened.read_block(id as u64).unwrap(), *expected);
        }
    }
}
