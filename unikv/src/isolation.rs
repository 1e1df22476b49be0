// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Isolation levels reported by store adapters
//!
//! The abstraction adds no locking of its own, so the guarantees a caller gets
//! from [`Store::update`](crate::Store::update) and
//! [`Store::cmp_and_swap`](crate::Store::cmp_and_swap) are exactly those of
//! the backend. Each adapter reports its level through
//! [`Store::isolation_level`](crate::Store::isolation_level).
//!
//! | driver     | level          |
//! |------------|----------------|
//! | sled       | Serializable   |
//! | redb       | Serializable   |
//! | sqlite     | Serializable   |
//! | memory     | Serializable   |
//! | postgresql | ReadCommitted  |
//! | mysql      | RepeatableRead |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Read anomaly a level may let a transaction observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phenomenon {
    /// Re-reading a key returns a value committed in between
    NonRepeatableRead,
    /// Re-scanning a bucket returns keys committed in between
    PhantomRead,
}

/// Transaction isolation level of a backend, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "read committed",
            IsolationLevel::RepeatableRead => "repeatable read",
            IsolationLevel::Serializable => "serializable",
        }
    }

    /// Whether a transaction at this level can observe `phenomenon`
    pub fn permits(&self, phenomenon: Phenomenon) -> bool {
        match phenomenon {
            Phenomenon::NonRepeatableRead => *self < IsolationLevel::RepeatableRead,
            Phenomenon::PhantomRead => *self < IsolationLevel::Serializable,
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
