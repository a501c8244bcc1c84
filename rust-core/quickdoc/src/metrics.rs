// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Metrics-collecting driver wrapper for QuickDoc.
//
// Wraps any `Driver` and transparently counts operations, sums latencies
// and tallies rows moved. Useful for seeing how many round trips a compound
// operation really costs (every `push` is a read plus a write).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::driver::{Driver, Row};
use crate::error::DriverError;

/// Accumulated statistics for a driver.
///
/// All counters are monotonically increasing for the lifetime of the
/// [`MetricsDriver`] that owns them, until [`MetricsDriver::reset_stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverStats {
    /// Number of `prepare` calls.
    pub prepare_count: u64,
    /// Number of `get_row_by_key` calls.
    pub get_count: u64,
    /// Number of `get_all_rows` calls.
    pub scan_count: u64,
    /// Number of `set_row_by_key` calls.
    pub set_count: u64,
    /// Number of `delete_row_by_key` and `delete_all_rows` calls.
    pub delete_count: u64,
    /// Cumulative wall-clock latency of reads (`get` and `scan`), in ms.
    pub read_latency_sum_ms: f64,
    /// Cumulative wall-clock latency of `set_row_by_key`, in ms.
    pub write_latency_sum_ms: f64,
    /// Rows returned by reads.
    pub rows_read: u64,
    /// Rows removed by deletes.
    pub rows_deleted: u64,
}

/// A driver wrapper that collects operation metrics.
///
/// # Example
///
/// ```rust
/// use quickdoc::driver::Driver;
/// use quickdoc::memory::InMemoryDriver;
/// use quickdoc::metrics::MetricsDriver;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let metered = MetricsDriver::new(InMemoryDriver::new());
///
/// metered.set_row_by_key("JSON", "k", json!(1), false, None).await.unwrap();
/// metered.get_row_by_key("JSON", "k").await.unwrap();
///
/// let stats = metered.stats().await;
/// assert_eq!(stats.set_count, 1);
/// assert_eq!(stats.get_count, 1);
/// # });
/// ```
pub struct MetricsDriver<D: Driver> {
    inner: D,
    stats: Arc<RwLock<DriverStats>>,
}

impl<D: Driver> MetricsDriver<D> {
    /// Wrap `inner` with metrics collection.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            stats: Arc::new(RwLock::new(DriverStats::default())),
        }
    }

    /// Return a snapshot of the current statistics.
    pub async fn stats(&self) -> DriverStats {
        self.stats.read().await.clone()
    }

    /// Reset all statistics to zero.
    pub async fn reset_stats(&self) {
        *self.stats.write().await = DriverStats::default();
    }

    /// Return a reference to the inner driver.
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[async_trait]
impl<D: Driver> Driver for MetricsDriver<D> {
    async fn prepare(&self, table: &str) -> Result<(), DriverError> {
        self.stats.write().await.prepare_count += 1;
        self.inner.prepare(table).await
    }

    async fn get_all_rows(&self, table: &str) -> Result<Vec<Row>, DriverError> {
        let start = Instant::now();
        let result = self.inner.get_all_rows(table).await;
        let elapsed = elapsed_ms(start);

        let mut s = self.stats.write().await;
        s.scan_count += 1;
        s.read_latency_sum_ms += elapsed;
        if let Ok(ref rows) = result {
            s.rows_read += rows.len() as u64;
        }

        result
    }

    async fn get_row_by_key(&self, table: &str, key: &str) -> Result<Option<Row>, DriverError> {
        let start = Instant::now();
        let result = self.inner.get_row_by_key(table, key).await;
        let elapsed = elapsed_ms(start);

        let mut s = self.stats.write().await;
        s.get_count += 1;
        s.read_latency_sum_ms += elapsed;
        if let Ok(Some(_)) = result {
            s.rows_read += 1;
        }

        result
    }

    async fn set_row_by_key(
        &self,
        table: &str,
        key: &str,
        value: Value,
        update: bool,
        expire_at: Option<DateTime<Utc>>,
    ) -> Result<Value, DriverError> {
        let start = Instant::now();
        let result = self
            .inner
            .set_row_by_key(table, key, value, update, expire_at)
            .await;
        let elapsed = elapsed_ms(start);

        let mut s = self.stats.write().await;
        s.set_count += 1;
        s.write_latency_sum_ms += elapsed;

        result
    }

    async fn delete_row_by_key(&self, table: &str, key: &str) -> Result<u64, DriverError> {
        let result = self.inner.delete_row_by_key(table, key).await;
        let mut s = self.stats.write().await;
        s.delete_count += 1;
        if let Ok(n) = result {
            s.rows_deleted += n;
        }
        result
    }

    async fn delete_all_rows(&self, table: &str) -> Result<u64, DriverError> {
        let result = self.inner.delete_all_rows(table).await;
        let mut s = self.stats.write().await;
        s.delete_count += 1;
        if let Ok(n) = result {
            s.rows_deleted += n;
        }
        result
    }

    async fn connect(&self) -> Result<(), DriverError> {
        self.inner.connect().await
    }

    async fn close(&self, force: bool) -> Result<(), DriverError> {
        self.inner.close(force).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
