// SPDX-License-Identifier: PMPL-1.0-or-later
//
// The driver contract for QuickDoc.
//
// A driver is the only thing that touches a backing store. It works on whole
// rows addressed by master key inside a named collection; nested paths,
// compound mutations and expiry filtering all live above it in the
// `Database` facade. Any store that can do the six operations below (a
// document database, a relational table, an embedded B-tree) can back a
// `Database` unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DriverError;

/// One stored record.
///
/// Serialized with the backend-agnostic field names `id`, `data`,
/// `createdAt`, `updatedAt` and `expireAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Master key, unique within its collection.
    pub id: String,
    /// The stored payload.
    pub data: Value,
    /// When the row was first inserted.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
    /// When the row stops being visible, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
}

impl Row {
    /// Build a fresh row stamped with `now`.
    pub fn new(id: impl Into<String>, data: Value, now: DateTime<Utc>, expire_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            data,
            created_at: now,
            updated_at: now,
            expire_at,
        }
    }

    /// Overwrite the payload and expiry, keeping `created_at`.
    pub fn rewrite(&mut self, data: Value, now: DateTime<Utc>, expire_at: Option<DateTime<Utc>>) {
        self.data = data;
        self.updated_at = now;
        self.expire_at = expire_at;
    }

    /// Whether the row is logically deleted at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        crate::expiry::is_expired(self.expire_at, now)
    }
}

/// A pluggable row store.
///
/// Every operation is scoped to a collection (`table`). Implementations must
/// be safe to share across tokio tasks.
///
/// Two guarantees callers rely on:
/// - [`Driver::get_row_by_key`] never reports an expired row as present.
/// - [`Driver::set_row_by_key`] is the only writer of `updated_at` and
///   `expire_at`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Idempotent per-collection setup (indexes, table creation).
    async fn prepare(&self, table: &str) -> Result<(), DriverError>;

    /// Every row in the collection, expired ones included. Order is up to
    /// the backend.
    async fn get_all_rows(&self, table: &str) -> Result<Vec<Row>, DriverError>;

    /// The row stored under `key`.
    ///
    /// `Ok(None)` means absent; a present row whose payload is JSON null is
    /// `Ok(Some(..))`.
    async fn get_row_by_key(&self, table: &str, key: &str) -> Result<Option<Row>, DriverError>;

    /// Insert or update the row under `key` and return the stored payload.
    ///
    /// `update` tells the driver whether the caller saw an existing row;
    /// drivers must still upsert if the row vanished in between. `expire_at`
    /// replaces any previous expiry, `None` clears it.
    async fn set_row_by_key(
        &self,
        table: &str,
        key: &str,
        value: Value,
        update: bool,
        expire_at: Option<DateTime<Utc>>,
    ) -> Result<Value, DriverError>;

    /// Remove the row under `key`; returns how many rows went away (0 or 1).
    async fn delete_row_by_key(&self, table: &str, key: &str) -> Result<u64, DriverError>;

    /// Remove every row in the collection; returns how many went away.
    async fn delete_all_rows(&self, table: &str) -> Result<u64, DriverError>;

    /// Establish the backend connection. Defaults to a no-op.
    async fn connect(&self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Tear the backend connection down. Defaults to a no-op.
    async fn close(&self, _force: bool) -> Result<(), DriverError> {
        Ok(())
    }

    /// A human-readable name for this driver, used in logging and metadata.
    fn name(&self) -> &str;
}

/// A shared driver is still a driver, so one handle can be kept for
/// inspection while another is given to a [`crate::Database`].
#[async_trait]
impl<D: Driver + ?Sized> Driver for Arc<D> {
    async fn prepare(&self, table: &str) -> Result<(), DriverError> {
        (**self).prepare(table).await
    }

    async fn get_all_rows(&self, table: &str) -> Result<Vec<Row>, DriverError> {
        (**self).get_all_rows(table).await
    }

    async fn get_row_by_key(&self, table: &str, key: &str) -> Result<Option<Row>, DriverError> {
        (**self).get_row_by_key(table, key).await
    }

    async fn set_row_by_key(
        &self,
        table: &str,
        key: &str,
        value: Value,
        update: bool,
        expire_at: Option<DateTime<Utc>>,
    ) -> Result<Value, DriverError> {
        (**self).set_row_by_key(table, key, value, update, expire_at).await
    }

    async fn delete_row_by_key(&self, table: &str, key: &str) -> Result<u64, DriverError> {
        (**self).delete_row_by_key(table, key).await
    }

    async fn delete_all_rows(&self, table: &str) -> Result<u64, DriverError> {
        (**self).delete_all_rows(table).await
    }

    async fn connect(&self) -> Result<(), DriverError> {
        (**self).connect().await
    }

    async fn close(&self, force: bool) -> Result<(), DriverError> {
        (**self).close(force).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Collection name checks shared by every bundled driver.
///
/// Names must be non-empty, must not contain `$` or NUL, and must not use
/// the reserved `system.` prefix.
pub fn validate_table_name(name: &str) -> Result<(), DriverError> {
    let reason = if name.trim().is_empty() {
        "must not be empty"
    } else if name.contains('\0') {
        "contains a NUL byte"
    } else if name.contains('$') {
        "contains '$'"
    } else if name.starts_with("system.") {
        "uses the reserved 'system.' prefix"
    } else {
        return Ok(());
    };

    Err(DriverError::InvalidCollection {
        name: name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("JSON").is_ok());
        assert!(validate_table_name("users.v2").is_ok());
        for bad in ["", "   ", "a\0b", "cash$", "system.indexes"] {
            assert!(
                matches!(validate_table_name(bad), Err(DriverError::InvalidCollection { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_row_serializes_with_persisted_field_names() {
        let now = Utc::now();
        let row = Row::new("k", json!({"a": 1}), now, None);
        let encoded = serde_json::to_value(&row).unwrap();
        assert_eq!(encoded["id"], "k");
        assert_eq!(encoded["data"], json!({"a": 1}));
        assert!(encoded.get("createdAt").is_some());
        assert!(encoded.get("updatedAt").is_some());
        assert!(encoded.get("expireAt").is_none());
    }

    #[test]
    fn test_rewrite_keeps_created_at() {
        let then = Utc::now() - Duration::seconds(10);
        let mut row = Row::new("k", json!(1), then, None);
        let now = Utc::now();
        row.rewrite(json!(2), now, Some(now + Duration::seconds(5)));
        assert_eq!(row.created_at, then);
        assert_eq!(row.updated_at, now);
        assert_eq!(row.data, json!(2));
        assert!(!row.is_expired_at(now));
        assert!(row.is_expired_at(now + Duration::seconds(5)));
    }
}
