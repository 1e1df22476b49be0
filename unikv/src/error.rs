// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Store error types
//!
//! Every adapter reports failures through [`StoreError`]. Callers should not
//! match on adapter-specific variants; instead they branch on [`ErrorKind`]
//! (via [`StoreError::kind`]) or use the [`is_not_found`] and
//! [`is_op_not_supported`] predicates, which also see through errors that
//! were boxed or wrapped by the caller.

use crate::operation::Command;
use std::fmt;
use thiserror::Error;

/// Boxed underlying engine error
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The externally visible classification of a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The backend could not be opened or is no longer usable
    Connection,
    /// The requested key or bucket does not exist
    NotFound,
    /// The adapter cannot express the requested operation atomically
    OpNotSupported,
    /// Any other backend failure
    Execution,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::NotFound => "not found",
            ErrorKind::OpNotSupported => "operation not supported",
            ErrorKind::Execution => "execution",
        };
        write!(f, "{}", name)
    }
}

/// Error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("store is closed")]
    Closed,

    #[error("{0} database not supported")]
    UnknownDriver(String),

    #[error("{0} driver is not compiled into this build")]
    DriverUnavailable(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("operation not supported: {0}")]
    OpNotSupported(String),

    #[error("failed to {context}: {source}")]
    Execution {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("compare failed on {0}, transaction rolled back")]
    CompareFailed(String),

    #[error("operation #{index} ({command} {bucket}/{key}) failed: {source}")]
    Operation {
        index: usize,
        command: Command,
        bucket: String,
        key: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("{source}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        source: Box<StoreError>,
        rollback: BoxError,
    },
}

impl StoreError {
    /// Classify this error
    ///
    /// Wrapping variants report the kind of the error they wrap, so an
    /// operation that failed with NotFound inside a transaction (even one
    /// whose rollback then failed) is still a NotFound.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connection { .. }
            | StoreError::Closed
            | StoreError::UnknownDriver(_)
            | StoreError::DriverUnavailable(_)
            | StoreError::InvalidOption(_) => ErrorKind::Connection,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::OpNotSupported(_) => ErrorKind::OpNotSupported,
            StoreError::Execution { .. } | StoreError::CompareFailed(_) => ErrorKind::Execution,
            StoreError::Operation { source, .. } | StoreError::RollbackFailed { source, .. } => {
                source.kind()
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_op_not_supported(&self) -> bool {
        self.kind() == ErrorKind::OpNotSupported
    }

    /// True when a rollback failed somewhere in this error, leaving the
    /// transaction in an indeterminate state
    pub fn is_rollback_failure(&self) -> bool {
        match self {
            StoreError::RollbackFailed { .. } => true,
            StoreError::Operation { source, .. } => source.is_rollback_failure(),
            _ => false,
        }
    }

    /// Create a connection error from an engine error
    pub fn connection<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Wrap an engine error with the action that was being attempted
    pub fn execution<S, E>(context: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Execution {
            context: context.into(),
            source: source.into(),
        }
    }

    /// NotFound for a missing key
    pub fn key_not_found(bucket: &[u8], key: &[u8]) -> Self {
        Self::NotFound(format!("{}/{}", display_bytes(bucket), display_bytes(key)))
    }

    /// NotFound for a missing bucket
    pub fn bucket_not_found(bucket: &[u8]) -> Self {
        Self::NotFound(format!("bucket {}", display_bytes(bucket)))
    }

    pub fn op_not_supported<S: Into<String>>(msg: S) -> Self {
        Self::OpNotSupported(msg.into())
    }

    /// Attach a rollback failure to the error that caused the rollback
    pub fn with_rollback_failure<E: Into<BoxError>>(self, rollback: E) -> Self {
        Self::RollbackFailed {
            source: Box::new(self),
            rollback: rollback.into(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Returns true if `err`, or any error in its source chain, is a NotFound
/// [`StoreError`]
pub fn is_not_found(err: &(dyn std::error::Error + 'static)) -> bool {
    find_kind(err) == Some(ErrorKind::NotFound)
}

/// Returns true if `err`, or any error in its source chain, is an
/// OpNotSupported [`StoreError`]
pub fn is_op_not_supported(err: &(dyn std::error::Error + 'static)) -> bool {
    find_kind(err) == Some(ErrorKind::OpNotSupported)
}

fn find_kind(err: &(dyn std::error::Error + 'static)) -> Option<ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(store_err) = e.downcast_ref::<StoreError>() {
            return Some(store_err.kind());
        }
        current = e.source();
    }
    None
}

/// Render an opaque byte string for messages and logs
pub(crate) fn display_bytes(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
