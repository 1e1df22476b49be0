// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory store implementation
//!
//! Buckets are ordered maps behind one lock. `update` holds the write lock for
//! the whole transaction and keeps an undo log, replayed in reverse when an
//! operation fails, so partial effects are never visible to other callers.

use super::{execute_operations, Handle, OpExecutor};
use crate::driver::Driver;
use crate::error::{StoreError, StoreResult};
use crate::isolation::IsolationLevel;
use crate::operation::{Entry, OpResult, Transaction};
use crate::options::StoreOptions;
use crate::store::{cas_matches, CasOutcome, Store};
use log::debug;
use std::collections::{BTreeMap, HashMap};

type Bucket = BTreeMap<Vec<u8>, Vec<u8>>;
type Buckets = HashMap<Vec<u8>, Bucket>;

/// In-memory store for testing
pub struct MemoryStore {
    buckets: Handle<Buckets>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            buckets: Handle::new(HashMap::new()),
        }
    }

    /// Run `f` against the buckets as a single committed step
    fn write<R>(&self, f: impl FnOnce(&mut MemoryTxn<'_>) -> StoreResult<R>) -> StoreResult<R> {
        self.buckets.with_mut(|buckets| {
            let mut txn = MemoryTxn::new(buckets);
            let result = f(&mut txn);
            if result.is_err() {
                txn.undo();
            }
            result
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Represents a change that can be undone
#[derive(Debug)]
enum UndoOperation {
    /// A bucket was created - to undo, drop it
    CreateBucket { bucket: Vec<u8> },
    /// A bucket was dropped - to undo, restore it with its contents
    DropBucket { bucket: Vec<u8>, contents: Bucket },
    /// A key was written or removed - to undo, restore its previous value
    WriteKey {
        bucket: Vec<u8>,
        key: Vec<u8>,
        previous: Option<Vec<u8>>,
    },
}

/// Undo-logged view of the buckets for one transaction
struct MemoryTxn<'a> {
    buckets: &'a mut Buckets,
    /// Most recent change last
    undo_log: Vec<UndoOperation>,
}

impl<'a> MemoryTxn<'a> {
    fn new(buckets: &'a mut Buckets) -> Self {
        Self {
            buckets,
            undo_log: Vec::new(),
        }
    }

    fn bucket(&self, bucket: &[u8]) -> StoreResult<&Bucket> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| StoreError::bucket_not_found(bucket))
    }

    fn write_key(&mut self, bucket: &[u8], key: &[u8], value: Option<&[u8]>) -> StoreResult<()> {
        let contents = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::bucket_not_found(bucket))?;
        let previous = match value {
            Some(value) => contents.insert(key.to_vec(), value.to_vec()),
            None => contents.remove(key),
        };
        self.undo_log.push(UndoOperation::WriteKey {
            bucket: bucket.to_vec(),
            key: key.to_vec(),
            previous,
        });
        Ok(())
    }

    /// Revert every logged change, newest first
    fn undo(&mut self) {
        debug!("Undoing {} memory store changes", self.undo_log.len());
        while let Some(operation) = self.undo_log.pop() {
            match operation {
                UndoOperation::CreateBucket { bucket } => {
                    self.buckets.remove(&bucket);
                }
                UndoOperation::DropBucket { bucket, contents } => {
                    self.buckets.insert(bucket, contents);
                }
                UndoOperation::WriteKey {
                    bucket,
                    key,
                    previous,
                } => {
                    if let Some(contents) = self.buckets.get_mut(&bucket) {
                        match previous {
                            Some(value) => contents.insert(key, value),
                            None => contents.remove(&key),
                        };
                    }
                }
            }
        }
    }
}

impl OpExecutor for MemoryTxn<'_> {
    fn create_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
        if !self.buckets.contains_key(bucket) {
            self.buckets.insert(bucket.to_vec(), Bucket::new());
            self.undo_log.push(UndoOperation::CreateBucket {
                bucket: bucket.to_vec(),
            });
        }
        Ok(())
    }

    fn delete_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
        let contents = self
            .buckets
            .remove(bucket)
            .ok_or_else(|| StoreError::bucket_not_found(bucket))?;
        self.undo_log.push(UndoOperation::DropBucket {
            bucket: bucket.to_vec(),
            contents,
        });
        Ok(())
    }

    fn get(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.bucket(bucket)?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::key_not_found(bucket, key))
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.write_key(bucket, key, Some(value))
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.write_key(bucket, key, None)
    }

    fn cmp_and_swap(
        &mut self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome> {
        let current = self.bucket(bucket)?.get(key).cloned();
        if !cas_matches(current.as_deref(), old) {
            return Ok(CasOutcome::mismatch(current));
        }
        self.write_key(bucket, key, Some(new))?;
        Ok(CasOutcome::swapped(new.to_vec()))
    }
}

impl Store for MemoryStore {
    fn open(_data_source: &str, _options: &StoreOptions) -> StoreResult<Self> {
        Ok(Self::new())
    }

    fn driver(&self) -> Driver {
        Driver::Memory
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn close(&self) -> StoreResult<()> {
        self.buckets.take();
        Ok(())
    }

    fn create_table(&self, bucket: &[u8]) -> StoreResult<()> {
        self.write(|txn| txn.create_table(bucket))
    }

    fn delete_table(&self, bucket: &[u8]) -> StoreResult<()> {
        self.write(|txn| txn.delete_table(bucket))
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.buckets.with(|buckets| {
            buckets
                .get(bucket)
                .ok_or_else(|| StoreError::bucket_not_found(bucket))?
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::key_not_found(bucket, key))
        })
    }

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.write(|txn| txn.set(bucket, key, value))
    }

    fn del(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.write(|txn| txn.delete(bucket, key))
    }

    fn list(&self, bucket: &[u8]) -> StoreResult<Vec<Entry>> {
        self.buckets.with(|buckets| {
            let contents = buckets
                .get(bucket)
                .ok_or_else(|| StoreError::bucket_not_found(bucket))?;
            Ok(contents
                .iter()
                .map(|(k, v)| Entry::new(bucket, k.clone(), v.clone()))
                .collect())
        })
    }

    fn cmp_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome> {
        self.write(|txn| txn.cmp_and_swap(bucket, key, old, new))
    }

    fn update(&self, tx: &Transaction) -> StoreResult<Vec<OpResult>> {
        debug!("Memory store update with {} operations", tx.len());
        self.write(|txn| execute_operations(txn, tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_restores_every_change() {
        let store = MemoryStore::new();
        store.create_table(b"a").unwrap();
        store.set(b"a", b"k", b"old").unwrap();
        store.set(b"a", b"gone", b"x").unwrap();

        let mut tx = Transaction::new();
        tx.set(b"a", b"k", b"new")
            .delete(b"a", b"gone")
            .create_table(b"b")
            .set(b"b", b"k", b"v")
            .delete_table(b"a")
            .get(b"a", b"k");

        let err = store.update(&tx).unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(store.get(b"a", b"k").unwrap(), b"old".to_vec());
        assert_eq!(store.get(b"a", b"gone").unwrap(), b"x".to_vec());
        assert!(store.list(b"b").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_is_key_ordered() {
        let store = MemoryStore::new();
        store.create_table(b"a").unwrap();
        store.set(b"a", b"2", b"two").unwrap();
        store.set(b"a", b"1", b"one").unwrap();

        let keys: Vec<Vec<u8>> = store
            .list(b"a")
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec![b"1".to_vec(), b"2".to_vec()]);
    }
}
