// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! MySQL store implementation
//!
//! Uses the synchronous `mysql` client over one connection. Transactions run
//! at the InnoDB default (REPEATABLE READ). Compare-and-swap locks the row
//! with `SELECT ... FOR UPDATE`, which also takes a gap lock on an absent key.
//!
//! `CREATE TABLE` and `DROP TABLE` commit the open transaction implicitly, so
//! `update` rejects `CreateTable` and `DeleteTable` (and `CmpOrRollback`)
//! with OpNotSupported before anything runs.
//!
//! Missing tables are recognised by server error code: 1146
//! (`ER_NO_SUCH_TABLE`) for statements on a table and 1051
//! (`ER_BAD_TABLE_ERROR`) for `DROP TABLE`.

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
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Params, TxOpts, Value};

const UNSUPPORTED_IN_UPDATE: &[Command] = &[
    Command::CreateTable,
    Command::DeleteTable,
    Command::CmpOrRollback,
];

const ER_BAD_TABLE_ERROR: u16 = 1051;
const ER_NO_SUCH_TABLE: u16 = 1146;

/// A store backed by a MySQL server
pub struct MysqlStore {
    conn: ExclusiveHandle<Conn>,
}

impl MysqlStore {
    fn ops(conn: &mut Conn) -> SqlOps<MysqlSession<'_, Conn>> {
        SqlOps::new(MysqlSession(conn))
    }

    fn in_transaction<R>(
        &self,
        f: impl FnOnce(&mut SqlOps<MysqlSession<'_, mysql::Transaction<'_>>>) -> StoreResult<Completion<R>>,
    ) -> StoreResult<R> {
        self.conn.with(|conn| {
            let mut txn = conn
                .start_transaction(TxOpts::default())
                .map_err(|e| StoreError::execution("begin mysql transaction", e))?;
            let outcome = f(&mut SqlOps::new(MysqlSession(&mut txn)));
            finish(txn, outcome)
        })
    }
}

impl Finish for mysql::Transaction<'_> {
    fn commit(self) -> StoreResult<()> {
        mysql::Transaction::commit(self)
            .map_err(|e| StoreError::execution("commit mysql transaction", e))
    }

    fn rollback(self) -> Result<(), BoxError> {
        mysql::Transaction::rollback(self).map_err(BoxError::from)
    }
}

/// Statement runner over a connection or an open transaction
pub(crate) struct MysqlSession<'a, Q>(&'a mut Q);

fn mysql_params(params: &[&[u8]]) -> Params {
    Params::from(
        params
            .iter()
            .map(|p| Value::Bytes(p.to_vec()))
            .collect::<Vec<_>>(),
    )
}

impl<Q: Queryable> SqlSession for MysqlSession<'_, Q> {
    type Error = mysql::Error;

    const DIALECT: Dialect = Dialect::Mysql;

    fn execute(&mut self, sql: &str, params: &[&[u8]]) -> Result<u64, Self::Error> {
        let result = self.0.exec_iter(sql, mysql_params(params))?;
        Ok(result.affected_rows())
    }

    fn query_value(&mut self, sql: &str, params: &[&[u8]]) -> Result<Option<Vec<u8>>, Self::Error> {
        self.0.exec_first(sql, mysql_params(params))
    }

    fn query_pairs(&mut self, sql: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error> {
        self.0.query(sql)
    }

    fn is_missing_table(err: &Self::Error) -> bool {
        matches!(
            err,
            mysql::Error::MySqlError(server)
                if server.code == ER_NO_SUCH_TABLE || server.code == ER_BAD_TABLE_ERROR
        )
    }
}

impl Store for MysqlStore {
    fn open(data_source: &str, options: &StoreOptions) -> StoreResult<Self> {
        let opts = Opts::from_url(data_source)
            .map_err(|e| StoreError::connection("invalid mysql connection url", e))?;
        let mut builder = OptsBuilder::from_opts(opts);
        if let Some(database) = &options.database {
            builder = builder.db_name(Some(database.as_str()));
        }
        let opts = Opts::from(builder);
        let database = opts.get_db_name().unwrap_or("<default>").to_string();

        let conn = Conn::new(opts)
            .map_err(|e| StoreError::connection("failed to connect to mysql", e))?;
        info!("Opened mysql store (database {})", database);

        Ok(Self {
            conn: ExclusiveHandle::new(conn),
        })
    }

    fn driver(&self) -> Driver {
        Driver::Mysql
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::RepeatableRead
    }

    fn close(&self) -> StoreResult<()> {
        // Dropping the connection sends COM_QUIT
        if self.conn.take().is_some() {
            info!("Closed mysql store");
        }
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
        reject_unsupported(tx, UNSUPPORTED_IN_UPDATE, "mysql")?;
        debug!("Mysql update with {} operations", tx.len());
        self.in_transaction(|ops| execute_operations(ops, tx).map(Completion::Commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use mysql::MySqlError;

    fn server_error(code: u16) -> mysql::Error {
        mysql::Error::MySqlError(MySqlError {
            state: "42S02".to_string(),
            message: "missing".to_string(),
            code,
        })
    }

    #[test]
    fn test_missing_table_codes() {
        assert!(MysqlSession::<Conn>::is_missing_table(&server_error(1146)));
        assert!(MysqlSession::<Conn>::is_missing_table(&server_error(1051)));
        assert!(!MysqlSession::<Conn>::is_missing_table(&server_error(1064)));
    }

    #[test]
    fn test_invalid_connection_url() {
        let err = MysqlStore::open("postgres://localhost/db", &StoreOptions::default())
            .err()
            .expect("must not parse");
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_unreachable_server_is_connection_error() {
        let err = MysqlStore::open(
            "mysql://unikv@127.0.0.1:1/unikv?tcp_connect_timeout_ms=2000",
            &StoreOptions::default(),
        )
        .err()
        .expect("nothing listens on port 1");
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}
