// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Common utilities for crate tests.

use crate::path_oram::{PathOram, SetupConfig};
use crate::storage::MemoryBucketStore;
use crate::{BlockSize, BucketCapacity};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use simplelog::WriteLogger;
use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

pub(crate) fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = WriteLogger::init(
            log::LevelFilter::Info,
            simplelog::Config::default(),
            std::io::stdout(),
        );
    });
}

pub(crate) fn seeded_store(seed: u64) -> MemoryBucketStore {
    MemoryBucketStore::new(&mut StdRng::seed_from_u64(seed))
}

pub(crate) fn test_config(
    block_size: BlockSize,
    block_count: u64,
    bucket_capacity: BucketCapacity,
    heap_base: u64,
) -> SetupConfig {
    SetupConfig {
        block_size,
        block_count,
        bucket_capacity,
        heap_base,
        header_data: Vec::new(),
        report_progress: false,
    }
}

pub(crate) fn setup_test_oram(
    bucket_capacity: BucketCapacity,
    heap_base: u64,
    block_size: BlockSize,
    block_count: u64,
) -> PathOram<MemoryBucketStore, StdRng> {
    let config = test_config(block_size, block_count, bucket_capacity, heap_base);
    PathOram::setup(seeded_store(0), &config, StdRng::seed_from_u64(1))
        .expect("test ORAM setup failed")
}

pub(crate) fn random_payload<R: RngCore>(rng: &mut R, block_size: BlockSize) -> Vec<u8> {
    let mut value = vec![0u8; block_size];
    rng.fill_bytes(&mut value);
    value
}

fn verify_against_mirror(oram: &mut PathOram<MemoryBucketStore, StdRng>, mirror: &[Vec<u8>]) {
    for (id, expected) in mirror.iter().enumerate() {
        assert_eq!(
            oram.read_block(id as u64).unwrap(),
            *expected,
            "block {id} diverged from the mirror"
        );
    }
}

/// Runs `operations` uniformly random reads and writes against a mirror
/// array, then checks every block.
pub(crate) fn random_workload(
    bucket_capacity: BucketCapacity,
    heap_base: u64,
    block_size: BlockSize,
    block_count: u64,
    operations: u32,
) {
    init_logger();
    let mut oram = setup_test_oram(bucket_capacity, heap_base, block_size, block_count);
    let mut mirror = vec![vec![0u8; block_size]; usize::try_from(block_count).unwrap()];
    let mut rng = StdRng::seed_from_u64(0xfeed);
    for _ in 0..operations {
        let id = rng.gen_range(0..block_count);
        if rng.gen::<bool>() {
            assert_eq!(oram.read_block(id).unwrap(), mirror[id as usize]);
        } else {
            let value = random_payload(&mut rng, block_size);
            oram.write_block(id, &value).unwrap();
            mirror[id as usize] = value;
        }
    }
    verify_against_mirror(&mut oram, &mirror);
    oram.close().unwrap();
}

/// Sweeps the address space in order, alternating writes and read-backs,
/// then checks every block.
pub(crate) fn linear_workload(
    bucket_capacity: BucketCapacity,
    heap_base: u64,
    block_size: BlockSize,
    block_count: u64,
    operations: u32,
) {
    init_logger();
    let mut oram = setup_test_oram(bucket_capacity, heap_base, block_size, block_count);
    let mut mirror = vec![vec![0u8; block_size]; usize::try_from(block_count).unwrap()];
    let mut rng = StdRng::seed_from_u64(0xbeef);
    for round in 0..operations {
        let id = u64::from(round) % block_count;
        if round % 2 == 0 {
            let value = random_payload(&mut rng, block_size);
            oram.write_block(id, &value).unwrap();
            mirror[id as usize] = value;
        } else {
            assert_eq!(oram.read_block(id).unwrap(), mirror[id as usize]);
        }
    }
    verify_against_mirror(&mut oram, &mirror);
    oram.close().unwrap();
}

macro_rules! create_correctness_test {
    ($function:ident, $bucket_capacity:expr, $heap_base:expr, $block_size:expr, $block_count:expr) => {
        paste::paste! {
            #[test]
            fn [<$function _z $bucket_capacity _k $heap_base _b $block_size _n $block_count>]() {
                $crate::test_utils::$function(
                    $bucket_capacity,
                    $heap_base,
                    $block_size,
                    $block_count,
                    100,
                );
            }
        }
    };
}

macro_rules! create_correctness_tests {
    ($bucket_capacity:expr, $heap_base:expr, $block_size:expr, $block_count:expr) => {
        create_correctness_test!(
            random_workload,
            $bucket_capacity,
            $heap_base,
            $block_size,
            $block_count
        );
        create_correctness_test!(
            linear_workload,
            $bucket_capacity,
            $heap_base,
            $block_size,
            $block_count
        );
    };
}

pub(crate) use create_correctness_test;
pub(crate) use create_correctness_tests;
