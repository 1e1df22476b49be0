// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! UniKV - one transactional key-value interface over many storage engines
//!
//! Programs talk to a [`Store`] and never to a concrete engine. A store holds
//! named buckets of byte keys and byte values and supports single-key reads
//! and writes, atomic compare-and-swap, and multi-operation transactions that
//! are applied all-or-nothing.
//!
//! # Features
//!
//! - **One contract**: sled, redb, SQLite, PostgreSQL, MySQL and an in-memory store
//!   behave the same way behind [`Store`]
//! - **Atomic updates**: [`Store::update`] runs a [`Transaction`] in the
//!   engine's native transaction and returns one [`OpResult`] per operation
//! - **Uniform errors**: branch on [`ErrorKind`] or the [`is_not_found`] /
//!   [`is_op_not_supported`] predicates instead of engine error types
//! - **Driver selection at runtime**: [`open`] resolves a driver name through
//!   the [`DriverRegistry`]
//!
//! # Usage
//!
//! ```ignore
//! use unikv::{open, StoreOptions, Transaction};
//!
//! let store = open("redb", "./data.redb", &StoreOptions::default())?;
//! store.create_table(b"accounts")?;
//!
//! let mut tx = Transaction::new();
//! tx.set(b"accounts", b"alice", b"100")
//!     .cmp_and_swap(b"accounts", b"bob", None, b"0")
//!     .get(b"accounts", b"alice");
//! let results = store.update(&tx)?;
//! assert_eq!(results[2].value.as_deref(), Some(&b"100"[..]));
//! ```

pub mod backends;
pub mod driver;
pub mod error;
pub mod isolation;
pub mod operation;
pub mod options;
pub mod store;

pub use driver::{open, Driver, DriverRegistry, OpenFn};
pub use error::{is_not_found, is_op_not_supported, ErrorKind, StoreError, StoreResult};
pub use isolation::{IsolationLevel, Phenomenon};
pub use operation::{Command, Entry, OpResult, Operation, Transaction};
pub use options::StoreOptions;
pub use store::{CasOutcome, Store};

pub use backends::memory::MemoryStore;
#[cfg(feature = "mysql-backend")]
pub use backends::mysql::MysqlStore;
#[cfg(feature = "postgres-backend")]
pub use backends::postgres::PostgresStore;
#[cfg(feature = "redb-backend")]
pub use backends::redb::RedbStore;
#[cfg(feature = "sled-backend")]
pub use backends::sled::SledStore;
#[cfg(feature = "sqlite-backend")]
pub use backends::sqlite::SqliteStore;

/// UniKV version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// UniKV crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
