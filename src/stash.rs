// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM stash.
//!
//! The stash holds blocks that could not be placed into any bucket on their
//! assigned path during the last eviction. It is unbounded and never discards
//! a block; with sensible geometry parameters its expected size stays small.
//! Entries iterate in ascending id order, which the stash integrity digest
//! relies on.

use crate::{BlockId, OramError};
use std::collections::BTreeMap;

/// An overflow buffer mapping block ids to block bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stash {
    blocks: BTreeMap<BlockId, Vec<u8>>,
}

impl Stash {
    /// Returns an empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `payload` under `id`.
    ///
    /// # Errors
    ///
    /// Returns a `ConsistencyViolation` error if the stash already holds a
    /// block with this id; a block has exactly one holder at all times.
    pub fn insert(&mut self, id: BlockId, payload: Vec<u8>) -> Result<(), OramError> {
        if self.blocks.insert(id, payload).is_some() {
            return Err(OramError::ConsistencyViolation(
                "block inserted into a stash that already holds it",
            ));
        }
        Ok(())
    }

    /// Removes and returns the block stored under `id`, if present.
    pub fn remove(&mut self, id: BlockId) -> Option<Vec<u8>> {
        self.blocks.remove(&id)
    }

    /// Returns whether the stash holds a block with this id.
    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// The number of blocks currently stashed.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns whether the stash is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterates over `(id, block bytes)` entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &[u8])> {
        self.blocks.iter().map(|(id, bytes)| (*id, bytes.as_slice()))
    }

    /// Collects the stashed ids in ascending order into `out`.
    pub(crate) fn ids_into(&self, out: &mut Vec<BlockId>) {
        out.clear();
        out.extend(self.blocks.keys().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_in_ascending_id_order() {
        let mut stash = Stash::new();
        stash.insert(9, vec![9]).unwrap();
        stash.insert(1, vec![1]).unwrap();
        stash.insert(4, vec![4]).unwrap();
        let ids: Vec<BlockId> = stash.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 4, 9]);
    }

    #[test]
    fn duplicate_insert_is_a_consistency_violation() {
        let mut stash = Stash::new();
        stash.insert(2, vec![0]).unwrap();
        assert!(stash.insert(2, vec![1]).is_err());
    }

    #[test]
    fn remove_shrinks_the_stash() {
        let mut stash = Stash::new();
        stash.insert(5, vec![1, 2]).unwrap();
        assert_eq!(stash.remove(5), Some(vec![1, 2]));
        assert_eq!(stash.remove(5), None);
        assert!(stash.is_empty());
    }
}
