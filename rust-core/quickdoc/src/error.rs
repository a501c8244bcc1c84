// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Error types for QuickDoc.
//
// Two layers: `DriverError` is what a backend adapter reports, and
// `QuickDocError` is what the `Database` facade hands back to callers.
// Driver failures are wrapped unchanged; everything else is raised by the
// facade itself, either before any I/O (validation, readiness) or after a
// single read (type mismatches).

use thiserror::Error;

use crate::guard::ValueKind;
use crate::lifecycle::ReadyState;

/// Errors that can occur when a driver talks to its backing store.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An I/O error occurred in the underlying storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize a stored row.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored data is corrupted or in an unexpected format.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// The backing store is not reachable (connection lost, handle closed).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The collection name is not acceptable to the driver.
    #[error("invalid collection name {name:?}: {reason}")]
    InvalidCollection {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Errors surfaced by the [`crate::Database`] facade.
#[derive(Debug, Error)]
pub enum QuickDocError {
    /// A key or argument was malformed. Raised before any driver call.
    #[error("validation error: {0}")]
    Validation(String),

    /// The value stored at `key` has the wrong shape for the operation.
    #[error("type mismatch at {key:?}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The full dotted key the operation addressed.
        key: String,
        /// The kind the operation needs.
        expected: ValueKind,
        /// The kind actually stored.
        found: ValueKind,
    },

    /// The backing store call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The connection has not reached the ready state.
    #[error("database is not ready (state: {0})")]
    NotReady(ReadyState),

    /// A caller-supplied value could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QuickDocError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn mismatch(key: &str, expected: ValueKind, found: ValueKind) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            expected,
            found,
        }
    }
}

/// Result alias used throughout the facade.
pub type Result<T> = std::result::Result<T, QuickDocError>;
