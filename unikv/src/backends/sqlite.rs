// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! SQLite store implementation
//!
//! One connection, shared behind a mutex. Compare-and-swap and `update` run in
//! `BEGIN IMMEDIATE` transactions, which take the database write lock up
//! front, so both are serializable. `CmpOrRollback` is not supported.

use super::sql::{Dialect, SqlOps, SqlSession};
use super::{
    execute_operations, finish, reject_unsupported, Completion, ExclusiveHandle, Finish,
    OpExecutor,
};
use crate::driver::Driver;
use crate::error::{BoxError, StoreError, StoreResult};
use crate::isolation::IsolationLevel;
use crate::operation::{Command, Entry, OpResult, Transaction};
use crate::options::StoreOptions;
use crate::store::{CasOutcome, Store};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::time::Duration;

const UNSUPPORTED_IN_UPDATE: &[Command] = &[Command::CmpOrRollback];

/// SQLite reports a missing table as a generic SQLITE_ERROR; only the message
/// tells it apart
static NO_SUCH_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^no such table: ").expect("valid regex"));

/// A store backed by SQLite
pub struct SqliteStore {
    conn: ExclusiveHandle<Connection>,
}

impl SqliteStore {
    fn ops(conn: &Connection) -> SqlOps<SqliteSession<'_>> {
        SqlOps::new(SqliteSession(conn))
    }

    /// Run `f` inside an IMMEDIATE transaction
    fn in_transaction<R>(
        &self,
        f: impl FnOnce(&mut SqlOps<SqliteSession<'_>>) -> StoreResult<Completion<R>>,
    ) -> StoreResult<R> {
        self.conn.with(|conn| {
            let txn = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| StoreError::execution("begin sqlite transaction", e))?;
            let outcome = f(&mut Self::ops(&txn));
            finish(txn, outcome)
        })
    }
}

impl Finish for rusqlite::Transaction<'_> {
    fn commit(self) -> StoreResult<()> {
        rusqlite::Transaction::commit(self)
            .map_err(|e| StoreError::execution("commit sqlite transaction", e))
    }

    fn rollback(self) -> Result<(), BoxError> {
        rusqlite::Transaction::rollback(self).map_err(BoxError::from)
    }
}

/// Statement runner over a connection (or a transaction, through deref)
pub(crate) struct SqliteSession<'c>(&'c Connection);

impl SqlSession for SqliteSession<'_> {
    type Error = rusqlite::Error;

    const DIALECT: Dialect = Dialect::Sqlite;

    fn execute(&mut self, sql: &str, params: &[&[u8]]) -> Result<u64, Self::Error> {
        let mut stmt = self.0.prepare_cached(sql)?;
        let changed = stmt.execute(params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    fn query_value(&mut self, sql: &str, params: &[&[u8]]) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stmt = self.0.prepare_cached(sql)?;
        stmt.query_row(params_from_iter(params.iter()), |row| row.get(0))
            .optional()
    }

    fn query_pairs(&mut self, sql: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error> {
        let mut stmt = self.0.prepare_cached(sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let pairs = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    fn is_missing_table(err: &Self::Error) -> bool {
        match err {
            rusqlite::Error::SqliteFailure(failure, Some(message)) => {
                failure.code == ErrorCode::Unknown && NO_SUCH_TABLE.is_match(message)
            }
            _ => false,
        }
    }
}

impl Store for SqliteStore {
    fn open(data_source: &str, options: &StoreOptions) -> StoreResult<Self> {
        let conn = if options.temporary || data_source == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(data_source)
        }
        .map_err(|e| StoreError::connection(format!("failed to open sqlite at {}", data_source), e))?;

        if let Some(millis) = options.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(millis))
                .map_err(|e| StoreError::connection("failed to set sqlite busy timeout", e))?;
        }
        info!("Opened sqlite store at {}", data_source);

        Ok(Self {
            conn: ExclusiveHandle::new(conn),
        })
    }

    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn close(&self) -> StoreResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.close()
            .map_err(|(_, e)| StoreError::execution("close sqlite connection", e))?;
        info!("Closed sqlite store");
        Ok(())
    }

    fn create_table(&self, bucket: &[u8]) -> StoreResult<()> {
        self.conn.with(|conn| Self::ops(conn).create_table(bucket))
    }

    fn delete_table(&self, bucket: &[u8]) -> StoreResult<()> {
        self.conn.with(|conn| Self::ops(conn).delete_table(bucket))
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.conn.with(|conn| Self::ops(conn).get(bucket, key))
    }

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.conn.with(|conn| Self::ops(conn).set(bucket, key, value))
    }

    fn del(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.conn.with(|conn| Self::ops(conn).delete(bucket, key))
    }

    fn list(&self, bucket: &[u8]) -> StoreResult<Vec<Entry>> {
        self.conn.with(|conn| Self::ops(conn).list(bucket))
    }

    fn cmp_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome> {
        self.in_transaction(|ops| {
            let outcome = ops.cmp_and_swap(bucket, key, old, new)?;
            Ok(if outcome.swapped {
                Completion::Commit(outcome)
            } else {
                Completion::Rollback(outcome)
            })
        })
    }

    fn update(&self, tx: &Transaction) -> StoreResult<Vec<OpResult>> {
        reject_unsupported(tx, UNSUPPORTED_IN_UPDATE, "sqlite")?;
        debug!("Sqlite update with {} operations", tx.len());
        self.in_transaction(|ops| execute_operations(ops, tx).map(Completion::Commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> SqliteStore {
        SqliteStore::open(":memory:", &StoreOptions::default()).unwrap()
    }

    #[test]
    fn test_no_such_table_is_detected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .execute("DELETE FROM \"nope\" WHERE nkey = ?1", [b"k".as_slice()])
            .unwrap_err();
        assert!(SqliteSession::is_missing_table(&err));

        let err = conn.execute("DROP TABLE \"nope\"", []).unwrap_err();
        assert!(SqliteSession::is_missing_table(&err));

        let err = conn.execute("SELEC 1", []).unwrap_err();
        assert!(!SqliteSession::is_missing_table(&err));
    }

    #[test]
    fn test_missing_bucket_is_not_found() {
        let store = memory_store();
        assert!(store.get(b"nope", b"k").unwrap_err().is_not_found());
        assert!(store.set(b"nope", b"k", b"v").unwrap_err().is_not_found());
        assert!(store.del(b"nope", b"k").unwrap_err().is_not_found());
        assert!(store.list(b"nope").unwrap_err().is_not_found());
        assert!(store.delete_table(b"nope").unwrap_err().is_not_found());
        assert!(store
            .cmp_and_swap(b"nope", b"k", None, b"v")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_any_bucket_bytes_name_a_table() {
        let store = memory_store();
        let buckets: [&[u8]; 4] = [b"we\"ird; DROP TABLE x", b"sqlite_master", &[0xff, 0x00], b""];
        for bucket in buckets {
            store.create_table(bucket).unwrap();
            store.set(bucket, b"k", bucket).unwrap();
            assert_eq!(store.get(bucket, b"k").unwrap(), bucket.to_vec());
        }
        for bucket in buckets {
            store.delete_table(bucket).unwrap();
        }
    }

    #[test]
    fn test_buckets_differing_in_case_are_separate_tables() {
        let store = memory_store();
        store.create_table(b"Users").unwrap();
        store.create_table(b"users").unwrap();
        store.set(b"Users", b"alice", b"upper").unwrap();

        assert!(store.get(b"users", b"alice").unwrap_err().is_not_found());
        assert!(store.list(b"users").unwrap().is_empty());

        store.delete_table(b"users").unwrap();
        assert_eq!(store.get(b"Users", b"alice").unwrap(), b"upper".to_vec());
        assert_eq!(store.list(b"Users").unwrap().len(), 1);
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.sqlite");
        let path = path.to_str().unwrap();

        let store = SqliteStore::open(path, &StoreOptions::new().busy_timeout_ms(500)).unwrap();
        store.create_table(b"users").unwrap();
        store.set(b"users", b"alice", &[0, 1, 2]).unwrap();
        store.close().unwrap();

        let store = SqliteStore::open(path, &StoreOptions::default()).unwrap();
        assert_eq!(store.get(b"users", b"alice").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_value_round_trips() {
        let store = memory_store();
        store.create_table(b"b").unwrap();
        store.set(b"b", b"k", b"").unwrap();
        assert_eq!(store.get(b"b", b"k").unwrap(), Vec::<u8>::new());
        let outcome = store.cmp_and_swap(b"b", b"k", Some(b""), b"x").unwrap();
        assert!(outcome.swapped);
    }
}
