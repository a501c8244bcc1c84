// SPDX-License-Identifier: PMPL-1.0-or-later
//
// redb-backed persistent driver for QuickDoc.
//
// Uses redb (pure Rust, B-tree, ACID, single-file database) so a QuickDoc
// store survives restarts without any external server.
//
// # Design
//
// - One redb table per collection, named after the collection.
// - Keys are master keys; values are `Row`s serialized as JSON, so the
//   timestamps and expiry travel with the payload.
// - Every call runs on the blocking pool via `spawn_blocking`.
// - Reading a collection that was never written yields nothing rather than
//   an error.
// - `set_row_by_key` reads and writes inside one write transaction, so
//   `createdAt` survives updates even when callers race.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quickdoc::driver::{validate_table_name, Driver, Row};
use quickdoc::error::DriverError;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use serde_json::Value;
use tracing::{debug, instrument};

type RowTable<'a> = TableDefinition<'a, &'static str, &'static [u8]>;

fn definition(collection: &str) -> RowTable<'_> {
    TableDefinition::new(collection)
}

fn unavailable(context: &str, err: impl Display) -> DriverError {
    DriverError::BackendUnavailable(format!("{context}: {err}"))
}

fn corrupted(context: &str, err: impl Display) -> DriverError {
    DriverError::CorruptedData(format!("{context}: {err}"))
}

fn decode(bytes: &[u8]) -> Result<Row, DriverError> {
    serde_json::from_slice(bytes).map_err(|e| corrupted("decode row", e))
}

fn encode(row: &Row) -> Result<Vec<u8>, DriverError> {
    serde_json::to_vec(row).map_err(|e| DriverError::Serialization(e.to_string()))
}

/// A persistent QuickDoc driver powered by redb.
///
/// Each `RedbDriver` wraps a single database file; collections become redb
/// tables inside it.
///
/// # Example
///
/// ```rust,no_run
/// use quickdoc::{Database, DatabaseOptions};
/// use quickdoc_redb::RedbDriver;
///
/// # tokio_test::block_on(async {
/// let driver = RedbDriver::open("/tmp/quickdoc.redb").unwrap();
/// let db = Database::open(driver, DatabaseOptions::default()).await.unwrap();
/// db.set("greeting", "hello").await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct RedbDriver {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbDriver {
    /// Open or create a redb database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)
            .map_err(|e| unavailable(&format!("failed to open redb at {}", path.display()), e))?;

        debug!(path = %path.display(), "opened redb driver");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Filesystem path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Physically remove expired rows from `table`. Returns how many were
    /// dropped.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self, table: &str) -> Result<u64, DriverError> {
        let table = table.to_string();
        let purged = self
            .blocking(move |db| {
                let now = Utc::now();
                let txn = db.begin_write().map_err(|e| unavailable("write txn", e))?;
                let purged;
                {
                    let mut rows = txn
                        .open_table(definition(&table))
                        .map_err(|e| unavailable("open table", e))?;

                    let mut expired = Vec::new();
                    for entry in rows.iter().map_err(|e| corrupted("scan", e))? {
                        let (key, value) = entry.map_err(|e| corrupted("scan entry", e))?;
                        if decode(value.value())?.is_expired_at(now) {
                            expired.push(key.value().to_string());
                        }
                    }
                    for key in &expired {
                        rows.remove(key.as_str()).map_err(|e| corrupted("remove", e))?;
                    }
                    purged = expired.len() as u64;
                }
                txn.commit().map_err(|e| corrupted("commit", e))?;
                Ok(purged)
            })
            .await?;
        if purged > 0 {
            debug!(purged, "purged expired rows");
        }
        Ok(purged)
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, DriverError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || work(&db))
            .await
            .map_err(|e| unavailable("task join", e))?
    }
}

impl std::fmt::Debug for RedbDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDriver")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl Driver for RedbDriver {
    async fn prepare(&self, table: &str) -> Result<(), DriverError> {
        validate_table_name(table)?;
        let table = table.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(|e| unavailable("write txn", e))?;
            txn.open_table(definition(&table))
                .map_err(|e| unavailable("open table", e))?;
            txn.commit().map_err(|e| corrupted("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn get_all_rows(&self, table: &str) -> Result<Vec<Row>, DriverError> {
        let table = table.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(|e| unavailable("read txn", e))?;
            let rows = match txn.open_table(definition(&table)) {
                Ok(t) => t,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(unavailable("open table", e)),
            };

            let mut out = Vec::new();
            for entry in rows.iter().map_err(|e| corrupted("scan", e))? {
                let (_, value) = entry.map_err(|e| corrupted("scan entry", e))?;
                out.push(decode(value.value())?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_row_by_key(&self, table: &str, key: &str) -> Result<Option<Row>, DriverError> {
        let table = table.to_string();
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(|e| unavailable("read txn", e))?;
            let rows = match txn.open_table(definition(&table)) {
                Ok(t) => t,
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(unavailable("open table", e)),
            };

            let row = match rows.get(key.as_str()).map_err(|e| corrupted("get", e))? {
                Some(value) => decode(value.value())?,
                None => return Ok(None),
            };
            Ok((!row.is_expired_at(Utc::now())).then_some(row))
        })
        .await
    }

    #[instrument(skip(self, value))]
    async fn set_row_by_key(
        &self,
        table: &str,
        key: &str,
        value: Value,
        update: bool,
        expire_at: Option<DateTime<Utc>>,
    ) -> Result<Value, DriverError> {
        validate_table_name(table)?;
        let table = table.to_string();
        let key = key.to_string();
        self.blocking(move |db| {
            let now = Utc::now();
            let txn = db.begin_write().map_err(|e| unavailable("write txn", e))?;
            {
                let mut rows = txn
                    .open_table(definition(&table))
                    .map_err(|e| unavailable("open table", e))?;

                let existing = match rows.get(key.as_str()).map_err(|e| corrupted("get", e))? {
                    Some(bytes) => Some(decode(bytes.value())?),
                    None => None,
                };
                let row = match existing {
                    Some(mut row) if !row.is_expired_at(now) => {
                        row.rewrite(value.clone(), now, expire_at);
                        row
                    }
                    _ => Row::new(key.as_str(), value.clone(), now, expire_at),
                };

                let bytes = encode(&row)?;
                rows.insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| corrupted("insert", e))?;
            }
            txn.commit().map_err(|e| corrupted("commit", e))?;
            Ok(value)
        })
        .await
    }

    async fn delete_row_by_key(&self, table: &str, key: &str) -> Result<u64, DriverError> {
        let table = table.to_string();
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(|e| unavailable("write txn", e))?;
            let existed;
            {
                let mut rows = txn
                    .open_table(definition(&table))
                    .map_err(|e| unavailable("open table", e))?;
                existed = rows
                    .remove(key.as_str())
                    .map_err(|e| corrupted("remove", e))?
                    .is_some();
            }
            txn.commit().map_err(|e| corrupted("commit", e))?;
            Ok(u64::from(existed))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_all_rows(&self, table: &str) -> Result<u64, DriverError> {
        let table = table.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(|e| unavailable("write txn", e))?;
            let removed;
            {
                let rows = txn
                    .open_table(definition(&table))
                    .map_err(|e| unavailable("open table", e))?;
                removed = rows.iter().map_err(|e| corrupted("scan", e))?.count() as u64;
            }
            txn.delete_table(definition(&table))
                .map_err(|e| unavailable("delete table", e))?;
            txn.commit().map_err(|e| corrupted("commit", e))?;
            Ok(removed)
        })
        .await
    }

    fn name(&self) -> &str {
        "redb"
    }
}
