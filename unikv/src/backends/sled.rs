// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Sled store implementation
//!
//! Each bucket is a sled `Tree`. Single-key compare-and-swap uses sled's
//! native `compare_and_swap`; `update` runs in a multi-tree sled transaction,
//! which sled executes serializably and retries internally on conflict.
//!
//! Sled cannot open or drop trees inside a transaction, so `CreateTable` and
//! `DeleteTable` are rejected by `update` (before anything runs) with
//! OpNotSupported. Use `create_table` / `delete_table` directly instead.
//!
//! `open_tree` creates a missing tree, so the existence check and the write
//! that follows must not interleave with a drop. Key operations hold the
//! store's table lock shared; `create_table` and `delete_table` hold it
//! exclusively.

use super::{execute_operations, reject_unsupported, Handle, OpExecutor};
use crate::driver::Driver;
use crate::error::{StoreError, StoreResult};
use crate::isolation::IsolationLevel;
use crate::operation::{Command, Entry, OpResult, Transaction};
use crate::options::StoreOptions;
use crate::store::{cas_matches, CasOutcome, Store};
use log::{debug, info};
use parking_lot::RwLock;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
    UnabortableTransactionError,
};
use sled::Transactional;
use std::collections::HashMap;

const UNSUPPORTED_IN_UPDATE: &[Command] = &[Command::CreateTable, Command::DeleteTable];

/// Sled store implementation
pub struct SledStore {
    db: Handle<sled::Db>,
    tables: RwLock<()>,
}

impl SledStore {
    /// Open the tree for an existing bucket
    fn tree(db: &sled::Db, bucket: &[u8]) -> StoreResult<sled::Tree> {
        if !Self::bucket_exists(db, bucket) {
            return Err(StoreError::bucket_not_found(bucket));
        }
        db.open_tree(bucket)
            .map_err(|e| StoreError::execution(format!("open tree {}", target(bucket, None)), e))
    }

    fn bucket_exists(db: &sled::Db, bucket: &[u8]) -> bool {
        db.tree_names().iter().any(|name| &name[..] == bucket)
    }
}

fn target(bucket: &[u8], key: Option<&[u8]>) -> String {
    let bucket = String::from_utf8_lossy(bucket);
    match key {
        Some(key) => format!("{}/{}", bucket, String::from_utf8_lossy(key)),
        None => bucket.into_owned(),
    }
}

/// Executor over the transactional views of the trees a transaction touches
struct SledTxn<'a> {
    views: &'a [TransactionalTree],
    index: &'a HashMap<Vec<u8>, usize>,
    /// Engine error behind the last failure, kept so conflicts reach sled's
    /// retry loop
    engine_error: Option<UnabortableTransactionError>,
}

impl SledTxn<'_> {
    fn view(&self, bucket: &[u8]) -> StoreResult<&TransactionalTree> {
        self.index
            .get(bucket)
            .map(|&i| &self.views[i])
            .ok_or_else(|| StoreError::bucket_not_found(bucket))
    }

    fn engine<T>(
        &mut self,
        result: Result<T, UnabortableTransactionError>,
        action: &str,
        bucket: &[u8],
        key: &[u8],
    ) -> StoreResult<T> {
        result.map_err(|e| {
            let err = StoreError::execution(
                format!("{} {}", action, target(bucket, Some(key))),
                e.to_string(),
            );
            self.engine_error = Some(e);
            err
        })
    }
}

impl OpExecutor for SledTxn<'_> {
    fn create_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
        Err(StoreError::op_not_supported(format!(
            "create table {} inside a sled transaction",
            target(bucket, None)
        )))
    }

    fn delete_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
        Err(StoreError::op_not_supported(format!(
            "delete table {} inside a sled transaction",
            target(bucket, None)
        )))
    }

    fn get(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        let result = self.view(bucket)?.get(key);
        self.engine(result, "get", bucket, key)?
            .map(|v| v.to_vec())
            .ok_or_else(|| StoreError::key_not_found(bucket, key))
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        let result = self.view(bucket)?.insert(key, value);
        self.engine(result, "set", bucket, key)?;
        Ok(())
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        let result = self.view(bucket)?.remove(key);
        self.engine(result, "delete", bucket, key)?;
        Ok(())
    }

    fn cmp_and_swap(
        &mut self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome> {
        let result = self.view(bucket)?.get(key);
        let current = self.engine(result, "read", bucket, key)?.map(|v| v.to_vec());
        if !cas_matches(current.as_deref(), old) {
            return Ok(CasOutcome::mismatch(current));
        }
        let result = self.view(bucket)?.insert(key, new);
        self.engine(result, "swap", bucket, key)?;
        Ok(CasOutcome::swapped(new.to_vec()))
    }
}

impl Store for SledStore {
    fn open(data_source: &str, options: &StoreOptions) -> StoreResult<Self> {
        let mut config = sled::Config::new()
            .path(data_source)
            .temporary(options.temporary);
        if let Some(capacity) = options.cache_capacity {
            config = config.cache_capacity(capacity);
        }
        if let Some(millis) = options.flush_every_ms {
            config = config.flush_every_ms(Some(millis));
        }

        let db = config
            .open()
            .map_err(|e| StoreError::connection(format!("error opening sled at {}", data_source), e))?;
        info!("Opened sled store at {}", data_source);

        Ok(Self {
            db: Handle::new(db),
            tables: RwLock::new(()),
        })
    }

    fn driver(&self) -> Driver {
        Driver::Sled
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn close(&self) -> StoreResult<()> {
        let Some(db) = self.db.take() else {
            return Ok(());
        };
        // Flush to ensure data is persisted before the handle is dropped
        db.flush()
            .map_err(|e| StoreError::execution("flush sled on close", e))?;
        info!("Closed sled store");
        Ok(())
    }

    fn create_table(&self, bucket: &[u8]) -> StoreResult<()> {
        let _tables = self.tables.write();
        self.db.with(|db| {
            db.open_tree(bucket).map_err(|e| {
                StoreError::execution(format!("create table {}", target(bucket, None)), e)
            })?;
            Ok(())
        })
    }

    fn delete_table(&self, bucket: &[u8]) -> StoreResult<()> {
        let _tables = self.tables.write();
        self.db.with(|db| {
            if !Self::bucket_exists(db, bucket) {
                return Err(StoreError::bucket_not_found(bucket));
            }
            let dropped = db.drop_tree(bucket).map_err(|e| {
                StoreError::execution(format!("delete table {}", target(bucket, None)), e)
            })?;
            if dropped {
                Ok(())
            } else {
                Err(StoreError::bucket_not_found(bucket))
            }
        })
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        let _tables = self.tables.read();
        self.db.with(|db| {
            Self::tree(db, bucket)?
                .get(key)
                .map_err(|e| StoreError::execution(format!("get {}", target(bucket, Some(key))), e))?
                .map(|v| v.to_vec())
                .ok_or_else(|| StoreError::key_not_found(bucket, key))
        })
    }

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        let _tables = self.tables.read();
        self.db.with(|db| {
            Self::tree(db, bucket)?
                .insert(key, value)
                .map_err(|e| StoreError::execution(format!("set {}", target(bucket, Some(key))), e))?;
            Ok(())
        })
    }

    fn del(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        let _tables = self.tables.read();
        self.db.with(|db| {
            Self::tree(db, bucket)?.remove(key).map_err(|e| {
                StoreError::execution(format!("delete {}", target(bucket, Some(key))), e)
            })?;
            Ok(())
        })
    }

    fn list(&self, bucket: &[u8]) -> StoreResult<Vec<Entry>> {
        let _tables = self.tables.read();
        self.db.with(|db| {
            Self::tree(db, bucket)?
                .iter()
                .map(|item| {
                    item.map(|(k, v)| Entry::new(bucket, k.to_vec(), v.to_vec()))
                        .map_err(|e| {
                            StoreError::execution(format!("list {}", target(bucket, None)), e)
                        })
                })
                .collect()
        })
    }

    fn cmp_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome> {
        let _tables = self.tables.read();
        self.db.with(|db| {
            let swap = Self::tree(db, bucket)?
                .compare_and_swap(key, old, Some(new))
                .map_err(|e| {
                    StoreError::execution(format!("swap {}", target(bucket, Some(key))), e)
                })?;
            match swap {
                Ok(()) => Ok(CasOutcome::swapped(new.to_vec())),
                Err(mismatch) => Ok(CasOutcome::mismatch(mismatch.current.map(|v| v.to_vec()))),
            }
        })
    }

    fn update(&self, tx: &Transaction) -> StoreResult<Vec<OpResult>> {
        reject_unsupported(tx, UNSUPPORTED_IN_UPDATE, "sled")?;
        debug!("Sled update with {} operations", tx.len());

        let _tables = self.tables.read();
        self.db.with(|db| {
            // Resolve every bucket up front; sled transactions need the full set of trees
            let mut trees = Vec::new();
            let mut index = HashMap::new();
            for (position, op) in tx.iter().enumerate() {
                if index.contains_key(&op.bucket) {
                    continue;
                }
                let tree = Self::tree(db, &op.bucket)
                    .map_err(|e| super::operation_error(position, op, e))?;
                index.insert(op.bucket.clone(), trees.len());
                trees.push(tree);
            }
            if trees.is_empty() {
                return Ok(Vec::new());
            }

            let outcome = trees.as_slice().transaction(|views| {
                let mut txn = SledTxn {
                    views,
                    index: &index,
                    engine_error: None,
                };
                match execute_operations(&mut txn, tx) {
                    Ok(results) => Ok(results),
                    Err(err) => match txn.engine_error.take() {
                        Some(UnabortableTransactionError::Conflict) => {
                            Err(ConflictableTransactionError::Conflict)
                        }
                        _ => Err(ConflictableTransactionError::Abort(err)),
                    },
                }
            });

            match outcome {
                Ok(results) => Ok(results),
                Err(TransactionError::Abort(err)) => Err(err),
                Err(TransactionError::Storage(e)) => {
                    Err(StoreError::execution("commit sled transaction", e))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(dir: &tempfile::TempDir) -> SledStore {
        let path = dir.path().join("sled");
        SledStore::open(path.to_str().unwrap(), &StoreOptions::default()).unwrap()
    }

    #[test]
    fn test_dropped_bucket_is_not_recreated_by_racing_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir);

        for round in 0..100 {
            store.create_table(b"racy").unwrap();
            std::thread::scope(|scope| {
                let writer = scope.spawn(|| {
                    for i in 0u32..200 {
                        if let Err(err) = store.set(b"racy", &i.to_be_bytes(), b"v") {
                            assert!(err.is_not_found(), "round {}: {}", round, err);
                            return;
                        }
                    }
                });
                store.delete_table(b"racy").unwrap();
                writer.join().unwrap();
            });
            assert!(
                store.list(b"racy").unwrap_err().is_not_found(),
                "round {}: bucket came back after delete_table",
                round
            );
        }
    }

    #[test]
    fn test_table_commands_rejected_in_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir);
        store.create_table(b"b").unwrap();

        let mut tx = Transaction::new();
        tx.set(b"b", b"k", b"v").delete_table(b"b");
        assert!(store.update(&tx).unwrap_err().is_op_not_supported());
        assert!(store.get(b"b", b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir);
        store.create_table(b"b").unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get(b"b", b"k"), Err(StoreError::Closed)));
        assert!(matches!(store.create_table(b"c"), Err(StoreError::Closed)));
    }
}
