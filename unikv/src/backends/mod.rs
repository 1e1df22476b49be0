// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Store adapters
//!
//! Every adapter translates the operation vocabulary into its engine's native
//! transaction API. The pieces they share live here:
//!
//! - [`OpExecutor`]: the six primitive commands, executed against an open
//!   engine transaction. [`execute_operations`] drives an executor through a
//!   [`Transaction`], handling `CmpOrRollback` and attaching position context
//!   to failures.
//! - [`Finish`] / [`finish`]: commit or roll back an engine transaction and
//!   report a failed rollback next to the error that caused it.
//! - [`Handle`] / [`ExclusiveHandle`]: the engine handle, taken out on close.
//!
//! ```text
//! Store (contract)
//!     ↓
//! OpExecutor (per-adapter translation)
//!     ↓
//! Engine (sled, redb, SQLite, PostgreSQL, MySQL, memory)
//! ```

pub mod memory;
#[cfg(feature = "mysql-backend")]
pub mod mysql;
#[cfg(feature = "postgres-backend")]
pub mod postgres;
#[cfg(feature = "redb-backend")]
pub mod redb;
#[cfg(feature = "sled-backend")]
pub mod sled;
#[cfg(any(
    feature = "sqlite-backend",
    feature = "postgres-backend",
    feature = "mysql-backend"
))]
pub(crate) mod sql;
#[cfg(feature = "sqlite-backend")]
pub mod sqlite;

use crate::error::{display_bytes, BoxError, StoreError, StoreResult};
use crate::operation::{Command, OpResult, Operation, Transaction};
use crate::store::CasOutcome;
use log::{error, warn};
use parking_lot::{Mutex, RwLock};

/// Primitive commands executed inside one engine transaction
pub(crate) trait OpExecutor {
    fn create_table(&mut self, bucket: &[u8]) -> StoreResult<()>;

    fn delete_table(&mut self, bucket: &[u8]) -> StoreResult<()>;

    fn get(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>>;

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()>;

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<()>;

    fn cmp_and_swap(
        &mut self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome>;
}

/// Run every operation in order, stopping at the first failure
///
/// The caller owns the engine transaction and must roll it back when this
/// returns an error.
pub(crate) fn execute_operations<E: OpExecutor + ?Sized>(
    exec: &mut E,
    tx: &Transaction,
) -> StoreResult<Vec<OpResult>> {
    let mut results = Vec::with_capacity(tx.len());
    for (index, op) in tx.iter().enumerate() {
        let result = apply(exec, op).map_err(|e| operation_error(index, op, e))?;
        results.push(result);
    }
    Ok(results)
}

fn apply<E: OpExecutor + ?Sized>(exec: &mut E, op: &Operation) -> StoreResult<OpResult> {
    match op.command {
        Command::CreateTable => exec.create_table(&op.bucket).map(|_| OpResult::empty()),
        Command::DeleteTable => exec.delete_table(&op.bucket).map(|_| OpResult::empty()),
        Command::Get => exec.get(&op.bucket, &op.key).map(OpResult::read),
        Command::Set => exec
            .set(&op.bucket, &op.key, &op.value)
            .map(|_| OpResult::empty()),
        Command::Delete => exec.delete(&op.bucket, &op.key).map(|_| OpResult::empty()),
        Command::CmpAndSwap => exec
            .cmp_and_swap(&op.bucket, &op.key, op.cmp_value.as_deref(), &op.value)
            .map(OpResult::from),
        Command::CmpOrRollback => {
            let outcome =
                exec.cmp_and_swap(&op.bucket, &op.key, op.cmp_value.as_deref(), &op.value)?;
            if outcome.swapped {
                Ok(outcome.into())
            } else {
                Err(StoreError::CompareFailed(op.target()))
            }
        }
    }
}

/// Attach the failing operation's position and target to an error
pub(crate) fn operation_error(index: usize, op: &Operation, source: StoreError) -> StoreError {
    StoreError::Operation {
        index,
        command: op.command,
        bucket: display_bytes(&op.bucket),
        key: display_bytes(&op.key),
        source: Box::new(source),
    }
}

/// Fail with OpNotSupported, before anything runs, if the transaction uses a
/// command this adapter cannot execute atomically
pub(crate) fn reject_unsupported(
    tx: &Transaction,
    unsupported: &[Command],
    adapter: &str,
) -> StoreResult<()> {
    match tx.find_command(unsupported) {
        Some((index, op)) => Err(operation_error(
            index,
            op,
            StoreError::op_not_supported(format!(
                "{} inside a {} transaction",
                op.command, adapter
            )),
        )),
        None => Ok(()),
    }
}

/// An engine transaction that can be committed or rolled back
pub(crate) trait Finish: Sized {
    fn commit(self) -> StoreResult<()>;

    fn rollback(self) -> Result<(), BoxError>;
}

/// What to do with a transaction whose work succeeded
pub(crate) enum Completion<R> {
    Commit(R),
    /// Nothing was written (e.g. a CAS mismatch); release the transaction
    Rollback(R),
}

/// Commit or roll back `txn` according to `outcome`
///
/// When the work failed the transaction is rolled back and the original error
/// returned; if the rollback fails too, both are reported through
/// [`StoreError::RollbackFailed`].
pub(crate) fn finish<T: Finish, R>(txn: T, outcome: StoreResult<Completion<R>>) -> StoreResult<R> {
    match outcome {
        Ok(Completion::Commit(result)) => {
            txn.commit()?;
            Ok(result)
        }
        Ok(Completion::Rollback(result)) => {
            txn.rollback()
                .map_err(|e| StoreError::execution("release read-only transaction", e))?;
            Ok(result)
        }
        Err(err) => {
            warn!("Rolling back transaction: {}", err);
            match txn.rollback() {
                Ok(()) => Err(err),
                Err(rollback) => {
                    error!("Rollback failed, transaction state is unknown: {}", rollback);
                    Err(err.with_rollback_failure(rollback))
                }
            }
        }
    }
}

/// Shared engine handle for engines whose handle is `Sync`
pub(crate) struct Handle<T> {
    inner: RwLock<Option<T>>,
}

impl<T> Handle<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Some(value)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> StoreResult<R>) -> StoreResult<R> {
        match self.inner.read().as_ref() {
            Some(value) => f(value),
            None => Err(StoreError::Closed),
        }
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> StoreResult<R>) -> StoreResult<R> {
        match self.inner.write().as_mut() {
            Some(value) => f(value),
            None => Err(StoreError::Closed),
        }
    }

    /// Take the handle out; `None` if already closed
    pub fn take(&self) -> Option<T> {
        self.inner.write().take()
    }
}

/// Engine handle used by one caller at a time (connections that are `Send`
/// but not `Sync`)
pub(crate) struct ExclusiveHandle<T> {
    inner: Mutex<Option<T>>,
}

impl<T> ExclusiveHandle<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Some(value)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> StoreResult<R>) -> StoreResult<R> {
        match self.inner.lock().as_mut() {
            Some(value) => f(value),
            None => Err(StoreError::Closed),
        }
    }

    pub fn take(&self) -> Option<T> {
        self.inner.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;

    /// Executor over a plain map that records nothing and never rolls back
    #[derive(Default)]
    struct MapExecutor {
        data: HashMap<Vec<u8>, Vec<u8>>,
    }

    impl OpExecutor for MapExecutor {
        fn create_table(&mut self, _bucket: &[u8]) -> StoreResult<()> {
            Ok(())
        }

        fn delete_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
            Err(StoreError::bucket_not_found(bucket))
        }

        fn get(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
            self.data
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::key_not_found(bucket, key))
        }

        fn set(&mut self, _bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
            self.data.insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn delete(&mut self, _bucket: &[u8], key: &[u8]) -> StoreResult<()> {
            self.data.remove(key);
            Ok(())
        }

        fn cmp_and_swap(
            &mut self,
            _bucket: &[u8],
            key: &[u8],
            old: Option<&[u8]>,
            new: &[u8],
        ) -> StoreResult<CasOutcome> {
            let current = self.data.get(key).cloned();
            if current.as_deref() == old {
                self.data.insert(key.to_vec(), new.to_vec());
                Ok(CasOutcome::swapped(new.to_vec()))
            } else {
                Ok(CasOutcome::mismatch(current))
            }
        }
    }

    struct FakeTxn {
        commit_ok: bool,
        rollback_ok: bool,
    }

    impl Finish for FakeTxn {
        fn commit(self) -> StoreResult<()> {
            if self.commit_ok {
                Ok(())
            } else {
                Err(StoreError::execution("commit transaction", "disk full"))
            }
        }

        fn rollback(self) -> Result<(), BoxError> {
            if self.rollback_ok {
                Ok(())
            } else {
                Err("connection reset".into())
            }
        }
    }

    #[test]
    fn test_results_are_parallel_to_operations() {
        let mut tx = Transaction::new();
        tx.set(b"b", b"k", b"1")
            .get(b"b", b"k")
            .cmp_and_swap(b"b", b"k", Some(b"0"), b"2")
            .cmp_and_swap(b"b", b"k", Some(b"1"), b"2");

        let results = execute_operations(&mut MapExecutor::default(), &tx).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0], OpResult::empty());
        assert_eq!(results[1].value, Some(b"1".to_vec()));
        assert_eq!(results[2], OpResult::swap(Some(b"1".to_vec()), false));
        assert_eq!(results[3], OpResult::swap(Some(b"2".to_vec()), true));
    }

    #[test]
    fn test_failure_carries_position() {
        let mut tx = Transaction::new();
        tx.set(b"b", b"k", b"1").get(b"b", b"missing");

        let err = execute_operations(&mut MapExecutor::default(), &tx).unwrap_err();
        match &err {
            StoreError::Operation {
                index,
                command,
                bucket,
                key,
                ..
            } => {
                assert_eq!(*index, 1);
                assert_eq!(*command, Command::Get);
                assert_eq!(bucket, "b");
                assert_eq!(key, "missing");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cmp_or_rollback_mismatch_is_an_error() {
        let mut tx = Transaction::new();
        tx.set(b"b", b"k", b"1")
            .cmp_or_rollback(b"b", b"k", Some(b"0"), b"2");

        let err = execute_operations(&mut MapExecutor::default(), &tx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().contains("compare failed on b/k"));
    }

    #[test]
    fn test_reject_unsupported_reports_first_offender() {
        let mut tx = Transaction::new();
        tx.set(b"b", b"k", b"1")
            .cmp_or_rollback(b"b", b"k", None, b"2")
            .create_table(b"c");

        let err = reject_unsupported(
            &tx,
            &[Command::CreateTable, Command::CmpOrRollback],
            "test",
        )
        .unwrap_err();
        assert!(err.is_op_not_supported());
        assert!(matches!(err, StoreError::Operation { index: 1, .. }));
    }

    #[test]
    fn test_finish_commits_and_releases() {
        let txn = FakeTxn {
            commit_ok: true,
            rollback_ok: true,
        };
        assert_eq!(finish(txn, Ok(Completion::Commit(7))).unwrap(), 7);

        let txn = FakeTxn {
            commit_ok: false,
            rollback_ok: true,
        };
        let err = finish(txn, Ok(Completion::Commit(7))).unwrap_err();
        assert_eq!(err.to_string(), "failed to commit transaction: disk full");
    }

    #[test]
    fn test_finish_reports_rollback_failure_distinctly() {
        let txn = FakeTxn {
            commit_ok: true,
            rollback_ok: true,
        };
        let err = finish::<_, ()>(txn, Err(StoreError::key_not_found(b"b", b"k"))).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let txn = FakeTxn {
            commit_ok: true,
            rollback_ok: false,
        };
        let err = finish::<_, ()>(txn, Err(StoreError::key_not_found(b"b", b"k"))).unwrap_err();
        assert!(err.is_rollback_failure());
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "b/k not found; rollback also failed: connection reset"
        );
    }

    #[test]
    fn test_handle_after_take_is_closed() {
        let handle = Handle::new(5u32);
        assert_eq!(handle.with(|v| Ok(*v)).unwrap(), 5);
        assert_eq!(handle.take(), Some(5));
        assert!(matches!(handle.with(|v| Ok(*v)), Err(StoreError::Closed)));
        assert_eq!(handle.take(), None);

        let exclusive = ExclusiveHandle::new(String::from("conn"));
        exclusive
            .with(|s| {
                s.push('!');
                Ok(())
            })
            .unwrap();
        assert_eq!(exclusive.take().as_deref(), Some("conn!"));
        assert!(matches!(exclusive.with(|_| Ok(())), Err(StoreError::Closed)));
    }
}
