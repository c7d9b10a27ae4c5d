// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Backing-store abstractions for encrypted bucket storage.
//!
//! The controller consumes storage through the [`BucketStore`] capability
//! trait and never assumes a concrete backend. Two backends are provided: a
//! plain in-memory store that authenticates every bucket with a keyed MAC,
//! and a level-caching decorator that keeps the hottest (topmost) buckets in
//! memory. Because nodes are numbered in level order, the top levels of the
//! heap are exactly a prefix of the address space, so the cache is a prefix
//! cache.

use crate::header::{digests_match, new_keyed_digest};
use crate::{NodeAddress, OramError, DIGEST_LEN};
use hmac::Mac;
use rand::{CryptoRng, RngCore};

/// The length in bytes of the symmetric key generated for new stores.
pub const STORE_KEY_LEN: usize = 32;

/// A capability interface over addressable fixed-size bucket storage with an
/// opaque header region and a symmetric key.
pub trait BucketStore {
    /// Sizes the store to hold `bucket_count` buckets of `bucket_size` bytes
    /// each, discarding any previous bucket contents.
    fn allocate(&mut self, bucket_count: u64, bucket_size: usize) -> Result<(), OramError>;

    /// The number of buckets the store holds.
    fn bucket_count(&self) -> u64;

    /// The size in bytes of each bucket.
    fn bucket_size(&self) -> usize;

    /// The store's symmetric key material, treated as an opaque byte string.
    fn key(&self) -> &[u8];

    /// Reads the opaque header region.
    fn header_data(&self) -> Result<Vec<u8>, OramError>;

    /// Replaces the opaque header region.
    fn set_header_data(&mut self, data: &[u8]) -> Result<(), OramError>;

    /// Reads the bucket at `node`.
    fn get_bucket(&mut self, node: NodeAddress) -> Result<Vec<u8>, OramError>;

    /// Writes the bucket at `node`.
    fn put_bucket(&mut self, node: NodeAddress, bytes: &[u8]) -> Result<(), OramError>;

    /// The total number of bytes written to the store so far.
    fn bytes_sent(&self) -> u64;

    /// The total number of bytes read from the store so far.
    fn bytes_received(&self) -> u64;

    /// Closes the store. Idempotent; all later bucket and header operations
    /// fail.
    fn close(&mut self) -> Result<(), OramError>;
}

fn closed_store_error() -> OramError {
    OramError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "bucket store is closed",
    ))
}

/// An in-memory bucket store.
///
/// Each bucket is authenticated with an HMAC keyed by the store key and bound
/// to its node address, standing in for the authenticated-encryption layer a
/// production backing store would provide: a flipped bucket byte (or a bucket
/// swapped to another address) is detected on the next read of that bucket.
#[derive(Debug)]
pub struct MemoryBucketStore {
    key: Vec<u8>,
    bucket_size: usize,
    buckets: Vec<Option<Vec<u8>>>,
    macs: Vec<[u8; DIGEST_LEN]>,
    header: Vec<u8>,
    bytes_sent: u64,
    bytes_received: u64,
    bucket_reads: u64,
    bucket_writes: u64,
    closed: bool,
}

impl MemoryBucketStore {
    /// Returns an unallocated store with a freshly generated random key.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = vec![0u8; STORE_KEY_LEN];
        rng.fill_bytes(&mut key);
        Self::with_key(key)
    }

    /// Returns an unallocated store using the given key material.
    pub fn with_key(key: Vec<u8>) -> Self {
        Self {
            key,
            bucket_size: 0,
            buckets: Vec::new(),
            macs: Vec::new(),
            header: Vec::new(),
            bytes_sent: 0,
            bytes_received: 0,
            bucket_reads: 0,
            bucket_writes: 0,
            closed: false,
        }
    }

    /// The number of bucket reads served so far.
    pub fn bucket_reads(&self) -> u64 {
        self.bucket_reads
    }

    /// The number of bucket writes accepted so far.
    pub fn bucket_writes(&self) -> u64 {
        self.bucket_writes
    }

    /// Returns whether the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), OramError> {
        if self.closed {
            return Err(closed_store_error());
        }
        Ok(())
    }

    fn bucket_mac(&self, node: NodeAddress, bytes: &[u8]) -> Result<[u8; DIGEST_LEN], OramError> {
        let mut mac = new_keyed_digest(&self.key)?;
        mac.update(&node.to_le_bytes());
        mac.update(bytes);
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn reopen(&mut self) {
        self.closed = false;
    }

    #[cfg(test)]
    pub(crate) fn flip_bucket_byte(&mut self, node: NodeAddress, index: usize) {
        if let Some(bucket) = self.buckets[node as usize].as_mut() {
            bucket[index] ^= 0xff;
        }
    }

    #[cfg(test)]
    pub(crate) fn flip_header_byte(&mut self, index: usize) {
        self.header[index] ^= 0xff;
    }
}

impl BucketStore for MemoryBucketStore {
    fn allocate(&mut self, bucket_count: u64, bucket_size: usize) -> Result<(), OramError> {
        self.ensure_open()?;
        let count = usize::try_from(bucket_count)?;
        self.bucket_size = bucket_size;
        self.buckets = vec![None; count];
        self.macs = vec![[0u8; DIGEST_LEN]; count];
        Ok(())
    }

    fn bucket_count(&self) -> u64 {
        self.buckets.len() as u64
    }

    fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn header_data(&self) -> Result<Vec<u8>, OramError> {
        self.ensure_open()?;
        Ok(self.header.clone())
    }

    fn set_header_data(&mut self, data: &[u8]) -> Result<(), OramError> {
        self.ensure_open()?;
        self.header = data.to_vec();
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    fn get_bucket(&mut self, node: NodeAddress) -> Result<Vec<u8>, OramError> {
        self.ensure_open()?;
        log::debug!("Physical read -- {}", node);
        let index = usize::try_from(node)?;
        let bucket = self
            .buckets
            .get(index)
            .ok_or(OramError::BucketOutOfRange(node))?
            .as_ref()
            .ok_or_else(|| {
                OramError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "bucket has never been written",
                ))
            })?;
        let expected = self.bucket_mac(node, bucket)?;
        if !digests_match(&expected, &self.macs[index]) {
            return Err(OramError::IntegrityCheckFailed { region: "bucket" });
        }
        self.bucket_reads += 1;
        self.bytes_received += bucket.len() as u64;
        Ok(bucket.clone())
    }

    fn put_bucket(&mut self, node: NodeAddress, bytes: &[u8]) -> Result<(), OramError> {
        self.ensure_open()?;
        log::debug!("Physical write -- {}", node);
        let index = usize::try_from(node)?;
        if index >= self.buckets.len() {
            return Err(OramError::BucketOutOfRange(node));
        }
        if bytes.len() != self.bucket_size {
            return Err(OramError::ConsistencyViolation(
                "bucket write length does not match the store's bucket size",
            ));
        }
        self.macs[index] = self.bucket_mac(node, bytes)?;
        self.buckets[index] = Some(bytes.to_vec());
        self.bucket_writes += 1;
        self.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    fn close(&mut self) -> Result<(), OramError> {
        self.closed = true;
        Ok(())
    }
}

/// A level-caching decorator over another [`BucketStore`].
///
/// Buckets with addresses below the cache boundary (the topmost levels of the
/// heap) are served from memory and written back to the inner store when the
/// decorator is closed. The byte counters report only traffic that reaches
/// the inner store.
#[derive(Debug)]
pub struct CachingBucketStore<S> {
    inner: S,
    cached_buckets: u64,
    cache: Vec<Option<Vec<u8>>>,
    dirty: Vec<bool>,
}

impl<S: BucketStore> CachingBucketStore<S> {
    /// Wraps `inner`, caching the first `cached_buckets` bucket addresses.
    ///
    /// With level-order node numbering, caching the first
    /// `(base^levels - 1) / (base - 1)` addresses caches the top `levels`
    /// levels of the heap.
    pub fn new(inner: S, cached_buckets: u64) -> Result<Self, OramError> {
        let mut store = Self {
            inner,
            cached_buckets,
            cache: Vec::new(),
            dirty: Vec::new(),
        };
        store.resize_cache()?;
        Ok(store)
    }

    /// A view of the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Discards the cache and returns the wrapped store.
    pub fn into_inner(self) -> S {
        self.inner
    }

    #[cfg(test)]
    pub(crate) fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn resize_cache(&mut self) -> Result<(), OramError> {
        let len = usize::try_from(self.cached_buckets.min(self.inner.bucket_count()))?;
        self.cache = vec![None; len];
        self.dirty = vec![false; len];
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OramError> {
        for index in 0..self.cache.len() {
            if self.dirty[index] {
                if let Some(bytes) = &self.cache[index] {
                    self.inner.put_bucket(index as NodeAddress, bytes)?;
                }
                self.dirty[index] = false;
            }
        }
        Ok(())
    }
}

impl<S: BucketStore> BucketStore for CachingBucketStore<S> {
    fn allocate(&mut self, bucket_count: u64, bucket_size: usize) -> Result<(), OramError> {
        self.inner.allocate(bucket_count, bucket_size)?;
        self.resize_cache()
    }

    fn bucket_count(&self) -> u64 {
        self.inner.bucket_count()
    }

    fn bucket_size(&self) -> usize {
        self.inner.bucket_size()
    }

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn header_data(&self) -> Result<Vec<u8>, OramError> {
        self.inner.header_data()
    }

    fn set_header_data(&mut self, data: &[u8]) -> Result<(), OramError> {
        self.inner.set_header_data(data)
    }

    fn get_bucket(&mut self, node: NodeAddress) -> Result<Vec<u8>, OramError> {
        let index = usize::try_from(node)?;
        if index < self.cache.len() {
            if let Some(bytes) = &self.cache[index] {
                return Ok(bytes.clone());
            }
            let bytes = self.inner.get_bucket(node)?;
            self.cache[index] = Some(bytes.clone());
            return Ok(bytes);
        }
        self.inner.get_bucket(node)
    }

    fn put_bucket(&mut self, node: NodeAddress, bytes: &[u8]) -> Result<(), OramError> {
        let index = usize::try_from(node)?;
        if index < self.cache.len() {
            if bytes.len() != self.inner.bucket_size() {
                return Err(OramError::ConsistencyViolation(
                    "bucket write length does not match the store's bucket size",
                ));
            }
            self.cache[index] = Some(bytes.to_vec());
            self.dirty[index] = true;
            return Ok(());
        }
        self.inner.put_bucket(node, bytes)
    }

    fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent()
    }

    fn bytes_received(&self) -> u64 {
        self.inner.bytes_received()
    }

    fn close(&mut self) -> Result<(), OramError> {
        // The inner store must end up closed even if the write-back fails.
        let flush_result = self.flush();
        let close_result = self.inner.close();
        flush_result.and(close_result)
    }
}
