// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Redb store implementation
//!
//! Redb is a pure-Rust embedded B-tree store with ACID transactions. Each
//! bucket is a `&[u8] -> &[u8]` table named after the bucket (bucket names
//! must be UTF-8). Reads use read transactions; every write path, including
//! single-key calls, runs in a write transaction, and redb admits one writer
//! at a time, so compare-and-swap and `update` are serializable.

use super::{execute_operations, finish, Completion, Finish, Handle, OpExecutor};
use crate::driver::Driver;
use crate::error::{display_bytes, BoxError, StoreError, StoreResult};
use crate::isolation::IsolationLevel;
use crate::operation::{Entry, OpResult, Transaction};
use crate::options::StoreOptions;
use crate::store::{cas_matches, CasOutcome, Store};
use log::{debug, info};
use redb::{Database, ReadableTable, TableDefinition, TableError, TableHandle, WriteTransaction};

type BucketTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

fn definition(name: &str) -> BucketTable<'_> {
    TableDefinition::new(name)
}

/// Redb names tables with non-empty strings
fn bucket_name(bucket: &[u8]) -> StoreResult<&str> {
    if bucket.is_empty() {
        return Err(StoreError::execution(
            "resolve bucket name",
            "bucket name is empty",
        ));
    }
    std::str::from_utf8(bucket).map_err(|e| {
        StoreError::execution(
            format!("resolve bucket name {}", display_bytes(bucket)),
            e,
        )
    })
}

/// A store backed by Redb
pub struct RedbStore {
    db: Handle<Database>,
}

impl RedbStore {
    /// Run `f` in a write transaction, committing on success
    fn write<R>(
        &self,
        f: impl FnOnce(&mut RedbTxn<'_>) -> StoreResult<Completion<R>>,
    ) -> StoreResult<R> {
        self.db.with(|db| {
            let txn = db
                .begin_write()
                .map_err(|e| StoreError::execution("begin redb write transaction", e))?;
            let outcome = f(&mut RedbTxn { txn: &txn });
            finish(txn, outcome)
        })
    }

    /// Open a bucket table in a read transaction and run `f` on it
    fn read<R>(
        &self,
        bucket: &[u8],
        f: impl FnOnce(&redb::ReadOnlyTable<&'static [u8], &'static [u8]>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let name = bucket_name(bucket)?;
        self.db.with(|db| {
            let txn = db
                .begin_read()
                .map_err(|e| StoreError::execution("begin redb read transaction", e))?;
            let table = match txn.open_table(definition(name)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => {
                    return Err(StoreError::bucket_not_found(bucket))
                }
                Err(e) => return Err(StoreError::execution(format!("open table {}", name), e)),
            };
            f(&table)
        })
    }
}

impl Finish for WriteTransaction {
    fn commit(self) -> StoreResult<()> {
        WriteTransaction::commit(self)
            .map_err(|e| StoreError::execution("commit redb transaction", e))
    }

    fn rollback(self) -> Result<(), BoxError> {
        self.abort().map_err(BoxError::from)
    }
}

/// Executor over an open redb write transaction
struct RedbTxn<'a> {
    txn: &'a WriteTransaction,
}

impl RedbTxn<'_> {
    /// Fail with NotFound unless the bucket's table exists
    fn existing<'n>(&self, bucket: &'n [u8]) -> StoreResult<&'n str> {
        let name = bucket_name(bucket)?;
        let mut tables = self
            .txn
            .list_tables()
            .map_err(|e| StoreError::execution("list redb tables", e))?;
        if tables.any(|table| table.name() == name) {
            Ok(name)
        } else {
            Err(StoreError::bucket_not_found(bucket))
        }
    }

    fn read_current(&self, name: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let table = self
            .txn
            .open_table(definition(name))
            .map_err(|e| StoreError::execution(format!("open table {}", name), e))?;
        let value = table
            .get(key)
            .map_err(|e| StoreError::execution(format!("get {}", name), e))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn write_key(&self, name: &str, key: &[u8], value: Option<&[u8]>) -> StoreResult<()> {
        let mut table = self
            .txn
            .open_table(definition(name))
            .map_err(|e| StoreError::execution(format!("open table {}", name), e))?;
        match value {
            Some(value) => {
                table
                    .insert(key, value)
                    .map_err(|e| StoreError::execution(format!("set in {}", name), e))?;
            }
            None => {
                table
                    .remove(key)
                    .map_err(|e| StoreError::execution(format!("delete in {}", name), e))?;
            }
        }
        Ok(())
    }
}

impl OpExecutor for RedbTxn<'_> {
    fn create_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
        let name = bucket_name(bucket)?;
        self.txn
            .open_table(definition(name))
            .map_err(|e| StoreError::execution(format!("create table {}", name), e))?;
        Ok(())
    }

    fn delete_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
        let name = bucket_name(bucket)?;
        let deleted = self
            .txn
            .delete_table(definition(name))
            .map_err(|e| StoreError::execution(format!("delete table {}", name), e))?;
        if deleted {
            Ok(())
        } else {
            Err(StoreError::bucket_not_found(bucket))
        }
    }

    fn get(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        let name = self.existing(bucket)?;
        self.read_current(name, key)?
            .ok_or_else(|| StoreError::key_not_found(bucket, key))
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        let name = self.existing(bucket)?;
        self.write_key(name, key, Some(value))
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        let name = self.existing(bucket)?;
        self.write_key(name, key, None)
    }

    fn cmp_and_swap(
        &mut self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome> {
        let name = self.existing(bucket)?;
        let current = self.read_current(name, key)?;
        if !cas_matches(current.as_deref(), old) {
            return Ok(CasOutcome::mismatch(current));
        }
        self.write_key(name, key, Some(new))?;
        Ok(CasOutcome::swapped(new.to_vec()))
    }
}

impl Store for RedbStore {
    fn open(data_source: &str, options: &StoreOptions) -> StoreResult<Self> {
        let mut builder = Database::builder();
        if let Some(cache_size) = options.cache_capacity {
            builder.set_cache_size(cache_size as usize);
        }

        let db = if options.temporary {
            builder.create_with_backend(redb::backends::InMemoryBackend::new())
        } else {
            builder.create(data_source)
        }
        .map_err(|e| StoreError::connection(format!("failed to open redb at {}", data_source), e))?;
        info!("Opened redb store at {}", data_source);

        Ok(Self { db: Handle::new(db) })
    }

    fn driver(&self) -> Driver {
        Driver::Redb
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn close(&self) -> StoreResult<()> {
        // Commits are durable; dropping the database releases the file lock
        if self.db.take().is_some() {
            info!("Closed redb store");
        }
        Ok(())
    }

    fn create_table(&self, bucket: &[u8]) -> StoreResult<()> {
        self.write(|txn| txn.create_table(bucket).map(Completion::Commit))
    }

    fn delete_table(&self, bucket: &[u8]) -> StoreResult<()> {
        self.write(|txn| txn.delete_table(bucket).map(Completion::Commit))
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.read(bucket, |table| {
            table
                .get(key)
                .map_err(|e| {
                    StoreError::execution(
                        format!("get {}/{}", display_bytes(bucket), display_bytes(key)),
                        e,
                    )
                })?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StoreError::key_not_found(bucket, key))
        })
    }

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.write(|txn| txn.set(bucket, key, value).map(Completion::Commit))
    }

    fn del(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.write(|txn| txn.delete(bucket, key).map(Completion::Commit))
    }

    fn list(&self, bucket: &[u8]) -> StoreResult<Vec<Entry>> {
        self.read(bucket, |table| {
            let to_err = |e: redb::StorageError| {
                StoreError::execution(format!("list {}", display_bytes(bucket)), e)
            };
            table
                .iter()
                .map_err(to_err)?
                .map(|item| {
                    item.map(|(k, v)| Entry::new(bucket, k.value().to_vec(), v.value().to_vec()))
                        .map_err(to_err)
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
        self.write(|txn| {
            let outcome = txn.cmp_and_swap(bucket, key, old, new)?;
            Ok(if outcome.swapped {
                Completion::Commit(outcome)
            } else {
                Completion::Rollback(outcome)
            })
        })
    }

    fn update(&self, tx: &Transaction) -> StoreResult<Vec<OpResult>> {
        debug!("Redb update with {} operations", tx.len());
        self.write(|txn| execute_operations(txn, tx).map(Completion::Commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_creation() {
        let store = RedbStore::open("", &StoreOptions::new().temporary(true))
            .expect("failed to create in-memory db");
        store.create_table(b"test").unwrap();
        store.set(b"test", b"key", b"value").unwrap();
        assert_eq!(store.get(b"test", b"key").unwrap(), b"value".to_vec());
    }

    #[test]
    fn test_file_is_locked_while_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.redb");
        let path = path.to_str().unwrap();

        let store = RedbStore::open(path, &StoreOptions::default()).unwrap();
        let err = RedbStore::open(path, &StoreOptions::default())
            .err()
            .expect("second open must fail");
        assert_eq!(err.kind(), crate::ErrorKind::Connection);

        store.close().unwrap();
        RedbStore::open(path, &StoreOptions::default()).expect("reopen after close");
    }

    #[test]
    fn test_non_utf8_bucket_is_rejected() {
        let store = RedbStore::open("", &StoreOptions::new().temporary(true)).unwrap();
        let err = store.create_table(&[0xff, 0x00]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Execution);
        assert!(store.create_table(b"").is_err());
        assert_eq!(bucket_name(b"users").unwrap(), "users");
    }
}
