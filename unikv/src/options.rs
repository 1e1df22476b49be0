// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Store configuration options
//!
//! A single option set is passed to every adapter's `open`; each adapter
//! reads the fields that mean something to its engine and ignores the rest.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options applied when opening a store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreOptions {
    /// Database to connect to, overriding the data source (PostgreSQL)
    pub database: Option<String>,
    /// Page/block cache size in bytes (sled, redb)
    pub cache_capacity: Option<u64>,
    /// Keep all data in memory and discard it on close (sled, redb, SQLite)
    pub temporary: bool,
    /// Background flush interval in milliseconds (sled)
    pub flush_every_ms: Option<u64>,
    /// How long to wait on a locked database in milliseconds (SQLite)
    pub busy_timeout_ms: Option<u64>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// Set the cache capacity.
    #[must_use]
    pub fn cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = Some(bytes);
        self
    }

    /// Keep the store in memory only.
    #[must_use]
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Set the background flush interval.
    #[must_use]
    pub fn flush_every_ms(mut self, millis: u64) -> Self {
        self.flush_every_ms = Some(millis);
        self
    }

    /// Set the busy timeout.
    #[must_use]
    pub fn busy_timeout_ms(mut self, millis: u64) -> Self {
        self.busy_timeout_ms = Some(millis);
        self
    }

    /// Load options from a JSON document
    pub fn from_json(json: &str) -> StoreResult<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::InvalidOption(e.to_string()))
    }

    /// Load options from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StoreError::InvalidOption(format!("cannot read {:?}: {}", path.as_ref(), e))
        })?;
        Self::from_json(&text)
    }
}
