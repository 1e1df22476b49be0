// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! The store contract
//!
//! [`Store`] is the one interface every adapter implements. It is object safe
//! (apart from the `open` constructor) so callers hold a `Box<dyn Store>`
//! produced by [`DriverRegistry`](crate::DriverRegistry) and never name a
//! concrete adapter.
//!
//! # Contract
//!
//! - `create_table` is idempotent; `delete_table` fails with NotFound when the
//!   bucket does not exist.
//! - `get` fails with NotFound when the key or its bucket is absent.
//! - `set` is an unconditional upsert; `del` never fails because the key was
//!   already absent.
//! - Key operations on a bucket that does not exist fail with NotFound.
//! - `cmp_and_swap` is a single atomic read-compare-write. A mismatch is not an
//!   error: it yields `swapped == false` and the current value.
//! - `update` runs every operation in order inside one atomic unit and rolls
//!   everything back on the first failure.
//! - After `close`, every call except `close` fails with
//!   [`StoreError::Closed`](crate::StoreError::Closed).

use crate::driver::Driver;
use crate::error::StoreResult;
use crate::isolation::IsolationLevel;
use crate::operation::{Entry, OpResult, Transaction};
use crate::options::StoreOptions;

/// Outcome of a compare-and-swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasOutcome {
    /// The value stored after the call: the new value when swapped, otherwise
    /// the current value (`None` if the key is absent)
    pub value: Option<Vec<u8>>,
    pub swapped: bool,
}

impl CasOutcome {
    pub fn swapped(value: Vec<u8>) -> Self {
        Self {
            value: Some(value),
            swapped: true,
        }
    }

    pub fn mismatch(current: Option<Vec<u8>>) -> Self {
        Self {
            value: current,
            swapped: false,
        }
    }
}

impl From<CasOutcome> for OpResult {
    fn from(outcome: CasOutcome) -> Self {
        OpResult::swap(outcome.value, outcome.swapped)
    }
}

/// Compare a stored value against the expected one; absence only matches
/// `None`
pub(crate) fn cas_matches(current: Option<&[u8]>, expected: Option<&[u8]>) -> bool {
    current == expected
}

/// Key-value store backed by one concrete engine
pub trait Store: Send + Sync {
    /// Open the backend identified by `data_source`
    fn open(data_source: &str, options: &StoreOptions) -> StoreResult<Self>
    where
        Self: Sized;

    /// Which driver this store was opened with
    fn driver(&self) -> Driver;

    /// Native isolation level of the backend's transactions
    fn isolation_level(&self) -> IsolationLevel;

    /// Release the backend; later calls fail with `Closed`, a second close is
    /// a no-op
    fn close(&self) -> StoreResult<()>;

    fn create_table(&self, bucket: &[u8]) -> StoreResult<()>;

    fn delete_table(&self, bucket: &[u8]) -> StoreResult<()>;

    fn get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>>;

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()>;

    fn del(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()>;

    /// Every entry in the bucket, in backend-defined order
    fn list(&self, bucket: &[u8]) -> StoreResult<Vec<Entry>>;

    /// Atomically replace the value of `key` if its current value equals
    /// `old` (`None` expects the key to be absent)
    fn cmp_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome>;

    /// Execute a transaction atomically, returning one result per operation
    fn update(&self, tx: &Transaction) -> StoreResult<Vec<OpResult>>;

    /// Execute a transaction atomically, discarding per-operation results
    fn run(&self, tx: &Transaction) -> StoreResult<()> {
        self.update(tx).map(|_| ())
    }
}
