// SPDX-License-Identifier: PMPL-1.0-or-later
//! Database options.

use serde::{Deserialize, Serialize};

use crate::driver::validate_table_name;
use crate::error::{QuickDocError, Result};

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "JSON";

/// Options for building a [`crate::Database`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseOptions {
    /// Collection the database reads and writes.
    pub collection_name: String,
    /// Whether this database was created as a child table.
    pub child: bool,
    /// Whether child tables reuse this database's connection.
    pub share_connection_from_parent: bool,
    /// Whether [`crate::Database::open`] connects immediately.
    pub auto_connect: bool,
}

impl DatabaseOptions {
    /// Options for `collection` with every other field defaulted.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection_name: collection.into(),
            ..Self::default()
        }
    }

    /// Set `auto_connect`.
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Check the options before a database is bound to them.
    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.collection_name)
            .map_err(|err| QuickDocError::validation(err.to_string()))
    }
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            collection_name: DEFAULT_COLLECTION.to_string(),
            child: false,
            share_connection_from_parent: true,
            auto_connect: true,
        }
    }
}
