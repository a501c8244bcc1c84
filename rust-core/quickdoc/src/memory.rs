// SPDX-License-Identifier: PMPL-1.0-or-later
//
// In-memory driver for QuickDoc.
//
// One `BTreeMap` per collection, all wrapped in a tokio `RwLock`. Ordered
// maps keep `get_all_rows` deterministic (ascending id), which makes the
// driver handy for tests and small ephemeral datasets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::driver::{validate_table_name, Driver, Row};
use crate::error::DriverError;

type Tables = HashMap<String, BTreeMap<String, Row>>;

/// An in-memory driver backed by one sorted map per collection.
///
/// Clones share the same underlying data, so a test can keep a handle to
/// the driver it gave to a [`crate::Database`] and inspect rows directly.
///
/// Expired rows stay in memory until [`InMemoryDriver::purge_expired`] runs
/// (directly or through [`InMemoryDriver::spawn_sweeper`]), mirroring a
/// document store whose TTL monitor runs on its own schedule.
///
/// # Example
///
/// ```rust
/// use quickdoc::driver::Driver;
/// use quickdoc::memory::InMemoryDriver;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let driver = InMemoryDriver::new();
/// driver.prepare("JSON").await.unwrap();
/// driver.set_row_by_key("JSON", "hello", json!("world"), false, None).await.unwrap();
/// let row = driver.get_row_by_key("JSON", "hello").await.unwrap().unwrap();
/// assert_eq!(row.data, json!("world"));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryDriver {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryDriver {
    /// Create a new, empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows physically held for `table`, expired ones included.
    pub async fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map_or(0, BTreeMap::len)
    }

    /// Whether `table` holds no rows at all.
    pub async fn is_empty(&self, table: &str) -> bool {
        self.len(table).await == 0
    }

    /// Names of the collections that have been prepared or written to.
    pub async fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Physically remove every row whose expiry has passed, across all
    /// collections. Returns how many rows were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let mut purged = 0;
        for rows in tables.values_mut() {
            let before = rows.len();
            rows.retain(|_, row| !row.is_expired_at(now));
            purged += before - rows.len();
        }
        if purged > 0 {
            debug!(purged, "purged expired rows");
        }
        purged
    }

    /// Run [`InMemoryDriver::purge_expired`] every `period` until the
    /// returned handle is aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                driver.purge_expired().await;
            }
        })
    }
}

#[async_trait]
impl Driver for InMemoryDriver {
    async fn prepare(&self, table: &str) -> Result<(), DriverError> {
        validate_table_name(table)?;
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn get_all_rows(&self, table: &str) -> Result<Vec<Row>, DriverError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_row_by_key(&self, table: &str, key: &str) -> Result<Option<Row>, DriverError> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .filter(|row| !row.is_expired_at(now))
            .cloned())
    }

    async fn set_row_by_key(
        &self,
        table: &str,
        key: &str,
        value: Value,
        _update: bool,
        expire_at: Option<DateTime<Utc>>,
    ) -> Result<Value, DriverError> {
        validate_table_name(table)?;
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();

        match rows.get_mut(key) {
            // An expired leftover is replaced wholesale, timestamps included.
            Some(row) if !row.is_expired_at(now) => row.rewrite(value.clone(), now, expire_at),
            _ => {
                rows.insert(key.to_string(), Row::new(key, value.clone(), now, expire_at));
            }
        }
        Ok(value)
    }

    async fn delete_row_by_key(&self, table: &str, key: &str) -> Result<u64, DriverError> {
        let mut tables = self.tables.write().await;
        let removed = tables
            .get_mut(table)
            .and_then(|rows| rows.remove(key))
            .is_some();
        Ok(u64::from(removed))
    }

    async fn delete_all_rows(&self, table: &str) -> Result<u64, DriverError> {
        let mut tables = self.tables.write().await;
        let removed = tables.get_mut(table).map_or(0, |rows| {
            let count = rows.len();
            rows.clear();
            count
        });
        Ok(removed as u64)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
