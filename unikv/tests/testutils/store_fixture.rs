// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Test fixture for UniKV integration tests
//!
//! Each fixture opens a fresh store through the public driver registry. On-disk
//! stores live in a temporary directory removed on drop. Bucket names carry a
//! per-fixture prefix so fixtures sharing a server database do not collide.

use std::sync::atomic::{AtomicUsize, Ordering};
use unikv::{Driver, DriverRegistry, Store, StoreOptions};

/// Environment variable holding the DSN of a PostgreSQL server for tests
pub const POSTGRES_DSN_VAR: &str = "UNIKV_POSTGRES_DSN";

/// Environment variable holding the URL of a MySQL server for tests
pub const MYSQL_DSN_VAR: &str = "UNIKV_MYSQL_DSN";

/// Environment variable naming the test server for a server driver
pub fn server_dsn_var(driver: Driver) -> Option<&'static str> {
    match driver {
        Driver::Postgres => Some(POSTGRES_DSN_VAR),
        Driver::Mysql => Some(MYSQL_DSN_VAR),
        _ => None,
    }
}

static FIXTURE_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub struct StoreFixture {
    store: Box<dyn Store>,
    driver: Driver,
    prefix: String,
    _temp_dir: tempfile::TempDir,
}

impl StoreFixture {
    /// Open a fresh store; server drivers read their DSN from the environment
    pub fn new(driver: Driver) -> Result<Self, Box<dyn std::error::Error>> {
        init_logging();
        let temp_dir = tempfile::tempdir()?;
        let data_source = match driver {
            Driver::Postgres | Driver::Mysql => {
                let var = server_dsn_var(driver).ok_or("no test server variable")?;
                std::env::var(var)?
            }
            Driver::Sled => temp_dir.path().join("sled").display().to_string(),
            Driver::Redb => temp_dir.path().join("store.redb").display().to_string(),
            Driver::Sqlite => temp_dir.path().join("store.sqlite").display().to_string(),
            Driver::Memory => String::new(),
        };

        let store = DriverRegistry::with_defaults().open_driver(
            driver,
            &data_source,
            &StoreOptions::default(),
        )?;

        let prefix = format!(
            "t{}_{}_",
            std::process::id(),
            FIXTURE_COUNTER.fetch_add(1, Ordering::SeqCst)
        );

        Ok(Self {
            store,
            driver,
            prefix,
            _temp_dir: temp_dir,
        })
    }

    /// Whether a test server is configured for `driver`
    pub fn server_configured(driver: Driver) -> bool {
        server_dsn_var(driver).is_some_and(|var| std::env::var(var).is_ok())
    }

    /// Every registered driver that needs no external server
    pub fn embedded_drivers() -> Vec<Driver> {
        DriverRegistry::with_defaults()
            .drivers()
            .into_iter()
            .filter(|driver| server_dsn_var(*driver).is_none())
            .collect()
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// Bucket name unique to this fixture
    pub fn bucket(&self, name: &str) -> Vec<u8> {
        format!("{}{}", self.prefix, name).into_bytes()
    }

    /// Create a unique bucket and return its name
    pub fn create_bucket(&self, name: &str) -> Vec<u8> {
        let bucket = self.bucket(name);
        self.store
            .create_table(&bucket)
            .expect("Failed to create bucket");
        bucket
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
