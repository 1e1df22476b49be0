// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! PostgreSQL store implementation
//!
//! Uses the synchronous `postgres` client over one connection. Transactions run
//! at the server default (READ COMMITTED); compare-and-swap locks the row with
//! `SELECT ... FOR UPDATE`, and an absent-key swap relies on the primary key
//! to reject a concurrent insert. `CmpOrRollback` is not supported.

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
use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, Config, GenericClient, NoTls};

const UNSUPPORTED_IN_UPDATE: &[Command] = &[Command::CmpOrRollback];

/// A store backed by a PostgreSQL server
pub struct PostgresStore {
    client: ExclusiveHandle<Client>,
}

impl PostgresStore {
    fn ops(client: &mut Client) -> SqlOps<PgSession<'_, Client>> {
        SqlOps::new(PgSession(client))
    }

    fn in_transaction<R>(
        &self,
        f: impl FnOnce(&mut SqlOps<PgSession<'_, postgres::Transaction<'_>>>) -> StoreResult<Completion<R>>,
    ) -> StoreResult<R> {
        self.client.with(|client| {
            let mut txn = client
                .transaction()
                .map_err(|e| StoreError::execution("begin postgres transaction", e))?;
            let outcome = f(&mut SqlOps::new(PgSession(&mut txn)));
            finish(txn, outcome)
        })
    }
}

impl Finish for postgres::Transaction<'_> {
    fn commit(self) -> StoreResult<()> {
        postgres::Transaction::commit(self)
            .map_err(|e| StoreError::execution("commit postgres transaction", e))
    }

    fn rollback(self) -> Result<(), BoxError> {
        postgres::Transaction::rollback(self).map_err(BoxError::from)
    }
}

/// Statement runner over a client or an open transaction
pub(crate) struct PgSession<'a, C>(&'a mut C);

fn pg_params<'p>(params: &'p [&'p [u8]]) -> Vec<&'p (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl<C: GenericClient> SqlSession for PgSession<'_, C> {
    type Error = postgres::Error;

    const DIALECT: Dialect = Dialect::Postgres;

    fn execute(&mut self, sql: &str, params: &[&[u8]]) -> Result<u64, Self::Error> {
        self.0.execute(sql, &pg_params(params))
    }

    fn query_value(&mut self, sql: &str, params: &[&[u8]]) -> Result<Option<Vec<u8>>, Self::Error> {
        match self.0.query_opt(sql, &pg_params(params))? {
            Some(row) => Ok(Some(row.try_get(0)?)),
            None => Ok(None),
        }
    }

    fn query_pairs(&mut self, sql: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error> {
        self.0
            .query(sql, &[])?
            .iter()
            .map(|row| -> Result<_, Self::Error> { Ok((row.try_get(0)?, row.try_get(1)?)) })
            .collect()
    }

    fn is_missing_table(err: &Self::Error) -> bool {
        err.code() == Some(&SqlState::UNDEFINED_TABLE)
    }
}

impl Store for PostgresStore {
    fn open(data_source: &str, options: &StoreOptions) -> StoreResult<Self> {
        let mut config: Config = data_source
            .parse()
            .map_err(|e| StoreError::connection("invalid postgres connection string", e))?;
        if let Some(database) = &options.database {
            config.dbname(database);
        }

        let client = config
            .connect(NoTls)
            .map_err(|e| StoreError::connection("failed to connect to postgres", e))?;
        info!(
            "Opened postgres store (database {})",
            config.get_dbname().unwrap_or("<default>")
        );

        Ok(Self {
            client: ExclusiveHandle::new(client),
        })
    }

    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn close(&self) -> StoreResult<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        client
            .close()
            .map_err(|e| StoreError::execution("close postgres connection", e))?;
        info!("Closed postgres store");
        Ok(())
    }

    fn create_table(&self, bucket: &[u8]) -> StoreResult<()> {
        self.client.with(|client| Self::ops(client).create_table(bucket))
    }

    fn delete_table(&self, bucket: &[u8]) -> StoreResult<()> {
        self.client.with(|client| Self::ops(client).delete_table(bucket))
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.client.with(|client| Self::ops(client).get(bucket, key))
    }

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.client
            .with(|client| Self::ops(client).set(bucket, key, value))
    }

    fn del(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.client.with(|client| Self::ops(client).delete(bucket, key))
    }

    fn list(&self, bucket: &[u8]) -> StoreResult<Vec<Entry>> {
        self.client.with(|client| Self::ops(client).list(bucket))
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
        reject_unsupported(tx, UNSUPPORTED_IN_UPDATE, "postgresql")?;
        debug!("Postgres update with {} operations", tx.len());
        self.in_transaction(|ops| execute_operations(ops, tx).map(Completion::Commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_invalid_connection_string() {
        let err = PostgresStore::open("host=localhost port=notaport", &StoreOptions::default())
            .err()
            .expect("must not parse");
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_unreachable_server_is_connection_error() {
        let err = PostgresStore::open(
            "host=127.0.0.1 port=1 user=unikv connect_timeout=2",
            &StoreOptions::new().database("unikv"),
        )
        .err()
        .expect("nothing listens on port 1");
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}
