// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Shared core of the relational adapters
//!
//! SQLite, PostgreSQL and MySQL store each bucket as a two-column table
//! (`nkey`, `nvalue`). [`Dialect`] renders the statement text and maps bucket
//! names to table names; [`SqlSession`] is the thin seam over a driver
//! connection or transaction; [`SqlOps`] implements the primitive commands on
//! top of any session.
//!
//! # Table names
//!
//! A bucket's table is `kv_` followed by the bucket bytes, with lowercase
//! ASCII letters and digits kept and every other byte written as `_` plus two
//! hex digits. The mapping is one-to-one and case-safe, so `Users` and `users`
//! never share a table even on engines that fold identifier case. Servers with
//! an identifier length limit reject buckets whose table name would exceed it.

use super::OpExecutor;
use crate::error::{display_bytes, StoreError, StoreResult};
use crate::operation::Entry;
use crate::store::{cas_matches, CasOutcome};

const TABLE_PREFIX: &str = "kv_";

/// SQL flavour of a relational backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    #[cfg_attr(not(feature = "sqlite-backend"), allow(dead_code))]
    Sqlite,
    #[cfg_attr(not(feature = "postgres-backend"), allow(dead_code))]
    Postgres,
    #[cfg_attr(not(feature = "mysql-backend"), allow(dead_code))]
    Mysql,
}

impl Dialect {
    fn key_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "BLOB",
            Dialect::Postgres => "BYTEA",
            // InnoDB indexes at most 3072 bytes of a key
            Dialect::Mysql => "VARBINARY(3072)",
        }
    }

    fn value_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "BLOB",
            Dialect::Postgres => "BYTEA",
            Dialect::Mysql => "LONGBLOB",
        }
    }

    /// Longest identifier the server keeps without truncating
    fn max_identifier_len(&self) -> Option<usize> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Postgres => Some(63),
            Dialect::Mysql => Some(64),
        }
    }

    /// Positional placeholder, 1-based
    fn param(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Postgres => format!("${}", n),
            Dialect::Mysql => "?".to_string(),
        }
    }

    fn quote(&self, name: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
            _ => quote_identifier(name),
        }
    }

    /// Table holding `bucket`
    pub fn table_name(&self, bucket: &[u8]) -> StoreResult<String> {
        let mut name = String::with_capacity(TABLE_PREFIX.len() + bucket.len());
        name.push_str(TABLE_PREFIX);
        for &byte in bucket {
            match byte {
                b'a'..=b'z' | b'0'..=b'9' => name.push(char::from(byte)),
                _ => name.push_str(&format!("_{:02x}", byte)),
            }
        }

        match self.max_identifier_len() {
            Some(max) if name.len() > max => Err(StoreError::execution(
                format!("resolve table for bucket {}", display_bytes(bucket)),
                format!(
                    "table name is {} bytes, the server keeps at most {}",
                    name.len(),
                    max
                ),
            )),
            _ => Ok(name),
        }
    }

    pub fn create_table(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (nkey {} PRIMARY KEY, nvalue {})",
            self.quote(table),
            self.key_type(),
            self.value_type()
        )
    }

    pub fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote(table))
    }

    pub fn select(&self, table: &str) -> String {
        format!(
            "SELECT nvalue FROM {} WHERE nkey = {}",
            self.quote(table),
            self.param(1)
        )
    }

    /// Read that locks the row until the transaction ends, where the engine
    /// supports row locks (SQLite's IMMEDIATE transaction already holds the
    /// database write lock)
    pub fn select_for_update(&self, table: &str) -> String {
        match self {
            Dialect::Sqlite => self.select(table),
            Dialect::Postgres | Dialect::Mysql => format!("{} FOR UPDATE", self.select(table)),
        }
    }

    pub fn select_all(&self, table: &str) -> String {
        format!(
            "SELECT nkey, nvalue FROM {} ORDER BY nkey",
            self.quote(table)
        )
    }

    pub fn upsert(&self, table: &str) -> String {
        let conflict = match self {
            Dialect::Mysql => "ON DUPLICATE KEY UPDATE nvalue = VALUES(nvalue)",
            _ => "ON CONFLICT (nkey) DO UPDATE SET nvalue = excluded.nvalue",
        };
        format!(
            "INSERT INTO {} (nkey, nvalue) VALUES ({}, {}) {}",
            self.quote(table),
            self.param(1),
            self.param(2),
            conflict
        )
    }

    /// Insert that affects no rows when the key already exists
    pub fn insert_if_absent(&self, table: &str) -> String {
        match self {
            Dialect::Mysql => format!(
                "INSERT IGNORE INTO {} (nkey, nvalue) VALUES (?, ?)",
                self.quote(table)
            ),
            _ => format!(
                "INSERT INTO {} (nkey, nvalue) VALUES ({}, {}) ON CONFLICT (nkey) DO NOTHING",
                self.quote(table),
                self.param(1),
                self.param(2)
            ),
        }
    }

    /// Parameters: new value, key, expected value
    pub fn update_if_equals(&self, table: &str) -> String {
        format!(
            "UPDATE {} SET nvalue = {} WHERE nkey = {} AND nvalue = {}",
            self.quote(table),
            self.param(1),
            self.param(2),
            self.param(3)
        )
    }

    pub fn delete(&self, table: &str) -> String {
        format!(
            "DELETE FROM {} WHERE nkey = {}",
            self.quote(table),
            self.param(1)
        )
    }
}

/// Double-quote an identifier, doubling embedded quotes
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Minimal statement interface over a driver connection or transaction
pub(crate) trait SqlSession {
    type Error: std::error::Error + Send + Sync + 'static;

    const DIALECT: Dialect;

    /// Run a statement, returning the number of affected rows
    fn execute(&mut self, sql: &str, params: &[&[u8]]) -> Result<u64, Self::Error>;

    /// Run a query returning at most one single-column row
    fn query_value(&mut self, sql: &str, params: &[&[u8]]) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Run a parameterless query returning two-column rows
    fn query_pairs(&mut self, sql: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error>;

    /// True when the error means the statement's table does not exist
    fn is_missing_table(err: &Self::Error) -> bool;
}

/// Primitive commands over a [`SqlSession`]
///
/// `SqlOps` never begins or ends transactions; the adapter decides which
/// statements share one.
pub(crate) struct SqlOps<S> {
    session: S,
}

impl<S: SqlSession> SqlOps<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// Map a driver error, turning a missing table into bucket NotFound
    fn check<T>(
        bucket: &[u8],
        key: Option<&[u8]>,
        action: &str,
        result: Result<T, S::Error>,
    ) -> StoreResult<T> {
        result.map_err(|e| {
            if S::is_missing_table(&e) {
                return StoreError::bucket_not_found(bucket);
            }
            let target = match key {
                Some(key) => format!("{}/{}", display_bytes(bucket), display_bytes(key)),
                None => display_bytes(bucket),
            };
            StoreError::execution(format!("{} {}", action, target), e)
        })
    }

    fn read(&mut self, sql: &str, bucket: &[u8], key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let result = self.session.query_value(sql, &[key]);
        Self::check(bucket, Some(key), "get", result)
    }

    /// Every entry of the bucket, ordered by key
    pub fn list(&mut self, bucket: &[u8]) -> StoreResult<Vec<Entry>> {
        let table = S::DIALECT.table_name(bucket)?;
        let result = self.session.query_pairs(&S::DIALECT.select_all(&table));
        let rows = Self::check(bucket, None, "list", result)?;
        Ok(rows
            .into_iter()
            .map(|(key, value)| Entry::new(bucket, key, value))
            .collect())
    }
}

impl<S: SqlSession> OpExecutor for SqlOps<S> {
    fn create_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
        let table = S::DIALECT.table_name(bucket)?;
        let result = self.session.execute(&S::DIALECT.create_table(&table), &[]);
        Self::check(bucket, None, "create table", result)?;
        Ok(())
    }

    fn delete_table(&mut self, bucket: &[u8]) -> StoreResult<()> {
        let table = S::DIALECT.table_name(bucket)?;
        let result = self.session.execute(&S::DIALECT.drop_table(&table), &[]);
        Self::check(bucket, None, "delete table", result)?;
        Ok(())
    }

    fn get(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        let table = S::DIALECT.table_name(bucket)?;
        self.read(&S::DIALECT.select(&table), bucket, key)?
            .ok_or_else(|| StoreError::key_not_found(bucket, key))
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        let table = S::DIALECT.table_name(bucket)?;
        let result = self.session.execute(&S::DIALECT.upsert(&table), &[key, value]);
        Self::check(bucket, Some(key), "set", result)?;
        Ok(())
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        let table = S::DIALECT.table_name(bucket)?;
        let result = self.session.execute(&S::DIALECT.delete(&table), &[key]);
        Self::check(bucket, Some(key), "delete", result)?;
        Ok(())
    }

    /// Must run inside a transaction; the guarded write makes a concurrent
    /// change between read and write show up as a mismatch
    fn cmp_and_swap(
        &mut self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<CasOutcome> {
        let table = S::DIALECT.table_name(bucket)?;
        let current = self.read(&S::DIALECT.select_for_update(&table), bucket, key)?;
        if !cas_matches(current.as_deref(), old) {
            return Ok(CasOutcome::mismatch(current));
        }
        // MySQL counts an unchanged row as not affected; the locked read
        // already proved the match
        if old == Some(new) {
            return Ok(CasOutcome::swapped(new.to_vec()));
        }

        let result = match old {
            None => self
                .session
                .execute(&S::DIALECT.insert_if_absent(&table), &[key, new]),
            Some(old) => self
                .session
                .execute(&S::DIALECT.update_if_equals(&table), &[new, key, old]),
        };
        let written = Self::check(bucket, Some(key), "swap", result)?;
        if written == 0 {
            let current = self.read(&S::DIALECT.select(&table), bucket, key)?;
            return Ok(CasOutcome::mismatch(current));
        }
        Ok(CasOutcome::swapped(new.to_vec()))
    }
}
