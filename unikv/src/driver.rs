// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Driver selection and store factory
//!
//! [`Driver`] names a backend; [`DriverRegistry`] maps each driver to the
//! function that opens it. The default registry contains every backend
//! compiled into this build (see the crate's cargo features). Driver names are
//! resolved before any I/O, so a typo fails immediately.

use crate::backends::memory::MemoryStore;
use crate::error::{StoreError, StoreResult};
use crate::options::StoreOptions;
use crate::store::Store;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// sled - embedded log-structured key-value engine, one tree per bucket
    Sled,

    /// redb - embedded B-tree file store, one table per bucket
    Redb,

    /// SQLite - embedded relational engine, one table per bucket
    Sqlite,

    /// PostgreSQL - relational server, one table per bucket
    Postgres,

    /// MySQL - relational server, one table per bucket
    Mysql,

    /// Memory - in-process store for tests and scratch use
    Memory,
}

impl Driver {
    /// All drivers, in display order
    pub const ALL: [Driver; 6] = [
        Driver::Sled,
        Driver::Redb,
        Driver::Sqlite,
        Driver::Postgres,
        Driver::Mysql,
        Driver::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Sled => "sled",
            Driver::Redb => "redb",
            Driver::Sqlite => "sqlite",
            Driver::Postgres => "postgresql",
            Driver::Mysql => "mysql",
            Driver::Memory => "memory",
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::Sled
    }
}

impl std::str::FromStr for Driver {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sled" => Ok(Driver::Sled),
            "redb" => Ok(Driver::Redb),
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "postgresql" | "postgres" | "pg" => Ok(Driver::Postgres),
            "mysql" | "mariadb" => Ok(Driver::Mysql),
            "memory" | "mem" => Ok(Driver::Memory),
            _ => Err(StoreError::UnknownDriver(s.to_string())),
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Function that opens one backend
pub type OpenFn = fn(&str, &StoreOptions) -> StoreResult<Box<dyn Store>>;

fn open_boxed<S: Store + 'static>(
    data_source: &str,
    options: &StoreOptions,
) -> StoreResult<Box<dyn Store>> {
    Ok(Box::new(S::open(data_source, options)?))
}

/// Map from driver to opener, built once at startup
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: HashMap<Driver, OpenFn>,
}

impl DriverRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// A registry containing every backend compiled into this build
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Driver::Memory, open_boxed::<MemoryStore>);

        #[cfg(feature = "sled-backend")]
        registry.register(
            Driver::Sled,
            open_boxed::<crate::backends::sled::SledStore>,
        );

        #[cfg(feature = "redb-backend")]
        registry.register(
            Driver::Redb,
            open_boxed::<crate::backends::redb::RedbStore>,
        );

        #[cfg(feature = "sqlite-backend")]
        registry.register(
            Driver::Sqlite,
            open_boxed::<crate::backends::sqlite::SqliteStore>,
        );

        #[cfg(feature = "postgres-backend")]
        registry.register(
            Driver::Postgres,
            open_boxed::<crate::backends::postgres::PostgresStore>,
        );

        #[cfg(feature = "mysql-backend")]
        registry.register(
            Driver::Mysql,
            open_boxed::<crate::backends::mysql::MysqlStore>,
        );

        registry
    }

    /// Register (or replace) the opener for a driver, returning the previous one
    pub fn register(&mut self, driver: Driver, open: OpenFn) -> Option<OpenFn> {
        debug!("Registering {} driver", driver);
        self.drivers.insert(driver, open)
    }

    pub fn is_registered(&self, driver: Driver) -> bool {
        self.drivers.contains_key(&driver)
    }

    /// Registered drivers, in display order
    pub fn drivers(&self) -> Vec<Driver> {
        let mut drivers: Vec<Driver> = self.drivers.keys().copied().collect();
        drivers.sort();
        drivers
    }

    /// Open a store for an already-resolved driver
    pub fn open_driver(
        &self,
        driver: Driver,
        data_source: &str,
        options: &StoreOptions,
    ) -> StoreResult<Box<dyn Store>> {
        let open = self
            .drivers
            .get(&driver)
            .ok_or_else(|| StoreError::DriverUnavailable(driver.to_string()))?;

        info!("Opening {} store", driver);
        open(data_source, options)
    }

    /// Resolve a driver name (case-insensitive) and open a store with it
    pub fn open(
        &self,
        driver_name: &str,
        data_source: &str,
        options: &StoreOptions,
    ) -> StoreResult<Box<dyn Store>> {
        let driver: Driver = driver_name.parse()?;
        self.open_driver(driver, data_source, options)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Open a store through the default registry
///
/// # Examples
/// ```ignore
/// use unikv::{open, StoreOptions};
///
/// let store = open("sqlite", "./data.db", &StoreOptions::default())?;
/// store.create_table(b"users")?;
/// store.set(b"users", b"alice", b"1")?;
/// ```
pub fn open(
    driver_name: &str,
    data_source: &str,
    options: &StoreOptions,
) -> StoreResult<Box<dyn Store>> {
    DriverRegistry::with_defaults().open(driver_name, data_source, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_names_are_case_insensitive() {
        assert_eq!("SQLite".parse::<Driver>().unwrap(), Driver::Sqlite);
        assert_eq!("PostgreSQL".parse::<Driver>().unwrap(), Driver::Postgres);
        assert_eq!("pg".parse::<Driver>().unwrap(), Driver::Postgres);
        assert_eq!("MySQL".parse::<Driver>().unwrap(), Driver::Mysql);
        assert_eq!("SLED".parse::<Driver>().unwrap(), Driver::Sled);
        assert_eq!("ReDB".parse::<Driver>().unwrap(), Driver::Redb);
        assert_eq!("mem".parse::<Driver>().unwrap(), Driver::Memory);
    }

    #[test]
    fn test_display_parses_back() {
        for driver in Driver::ALL {
            assert_eq!(driver.to_string().parse::<Driver>().unwrap(), driver);
        }
    }

    #[test]
    fn test_unknown_driver_fails_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-created");
        let err = open("badger", path.to_str().unwrap(), &StoreOptions::default())
            .err()
            .expect("unknown driver must fail");

        assert!(matches!(err, StoreError::UnknownDriver(ref name) if name == "badger"));
        assert_eq!(err.to_string(), "badger database not supported");
        assert!(!path.exists());
    }

    #[test]
    fn test_unregistered_driver_is_unavailable() {
        let registry = DriverRegistry::new();
        let err = registry
            .open("memory", "", &StoreOptions::default())
            .err()
            .expect("empty registry");
        assert!(matches!(err, StoreError::DriverUnavailable(_)));
    }

    #[test]
    fn test_defaults_include_memory() {
        let registry = DriverRegistry::with_defaults();
        assert!(registry.is_registered(Driver::Memory));
        let store = registry
            .open("Memory", "", &StoreOptions::default())
            .unwrap();
        assert_eq!(store.driver(), Driver::Memory);
    }

    #[test]
    fn test_register_overrides() {
        fn failing(_: &str, _: &StoreOptions) -> StoreResult<Box<dyn Store>> {
            Err(StoreError::Connection {
                message: "refused".to_string(),
                source: None,
            })
        }

        let mut registry = DriverRegistry::with_defaults();
        assert!(registry.register(Driver::Memory, failing).is_some());
        let err = registry
            .open("memory", "", &StoreOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "connection error: refused");
    }
}
