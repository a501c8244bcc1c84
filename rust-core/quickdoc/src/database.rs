// SPDX-License-Identifier: PMPL-1.0-or-later
//! The key-value facade.
//!
//! [`Database`] turns whole-row driver calls into dotted-key operations.
//! Every call resolves its key first, checks readiness, then talks to the
//! driver; nothing touches the backend if the key or an argument is
//! malformed.
//!
//! Compound operations (`push`, `pull`, `add`, nested `set`/`delete`, ...)
//! are a read followed by a write. They are not atomic: two writers racing
//! on the same master key both read the old row, and whichever persists last
//! wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::DatabaseOptions;
use crate::driver::{Driver, Row};
use crate::error::{QuickDocError, Result};
use crate::expiry;
use crate::guard::{self, ValueKind};
use crate::lifecycle::{Connection, ReadyState};
use crate::path::{self, KeyMetadata, PathConflict};
use crate::query::{AllOptions, Entry, Matcher, SortKey};

/// Identity of the collection a [`Database`] is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Collection name.
    pub name: String,
    /// Driver name.
    pub driver: String,
    /// `"{driver}.{name}"`.
    pub namespace: String,
}

/// A key-value view over one collection of a driver.
///
/// # Example
///
/// ```rust
/// use quickdoc::{Database, DatabaseOptions, InMemoryDriver};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let db = Database::open(InMemoryDriver::new(), DatabaseOptions::default()).await.unwrap();
///
/// db.set("profile.name", "Ada").await.unwrap();
/// db.set("profile.age", 30).await.unwrap();
/// assert_eq!(db.get("profile").await.unwrap(), Some(json!({"name": "Ada", "age": 30})));
///
/// db.push("profile.langs", json!(["en", "fr"])).await.unwrap();
/// assert_eq!(db.get("profile.langs.1").await.unwrap(), Some(json!("fr")));
/// # });
/// ```
pub struct Database {
    pub(crate) connection: Arc<Connection>,
    pub(crate) options: DatabaseOptions,
    pub(crate) parent: Option<String>,
    prepared: AtomicBool,
}

/// The row behind a key and the value currently at the key's path.
struct Slot {
    row: Option<Row>,
    current: Option<Value>,
}

impl Slot {
    fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.row.as_ref().and_then(|row| row.expire_at)
    }
}

impl Database {
    /// Bind a fresh connection over `driver`. The database starts
    /// [`ReadyState::Uninitialized`]; call [`Database::connect`] or use
    /// [`Database::open`].
    pub fn new(driver: impl Driver + 'static, options: DatabaseOptions) -> Result<Self> {
        Self::with_connection(Arc::new(Connection::new(Arc::new(driver))), options)
    }

    /// Bind to an existing, possibly shared, connection.
    pub fn with_connection(connection: Arc<Connection>, options: DatabaseOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            connection,
            options,
            parent: None,
            prepared: AtomicBool::new(false),
        })
    }

    /// Build a database and connect it when `options.auto_connect` is set.
    pub async fn open(driver: impl Driver + 'static, options: DatabaseOptions) -> Result<Self> {
        let db = Self::new(driver, options)?;
        if db.options.auto_connect {
            db.connect().await?;
        }
        Ok(db)
    }

    /// Open the connection and prepare this collection.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await?;
        self.ready_check().await?;
        info!(collection = %self.collection(), driver = self.driver().name(), "database ready");
        Ok(())
    }

    /// Close the underlying connection, affecting every table sharing it.
    pub async fn close(&self, force: bool) -> Result<()> {
        self.connection.close(force).await
    }

    /// Whether the connection is ready.
    pub fn ready(&self) -> bool {
        self.ready_state() == ReadyState::Ready
    }

    /// Current connection state.
    pub fn ready_state(&self) -> ReadyState {
        self.connection.state()
    }

    /// Subscribe to connection state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ReadyState> {
        self.connection.subscribe()
    }

    /// The collection this database is bound to.
    pub fn collection(&self) -> &str {
        &self.options.collection_name
    }

    /// The options this database was built with.
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// The driver behind the connection.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        self.connection.driver()
    }

    /// The connection, for sharing with other databases.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Collection name, driver name and combined namespace.
    pub fn metadata(&self) -> CollectionMetadata {
        let driver = self.driver().name().to_string();
        CollectionMetadata {
            name: self.collection().to_string(),
            namespace: format!("{driver}.{}", self.collection()),
            driver,
        }
    }

    // ---------------------------------------------------------------------
    // Driver plumbing
    // ---------------------------------------------------------------------

    /// Fail fast unless the connection is ready; prepare the collection on
    /// first use.
    pub(crate) async fn ready_check(&self) -> Result<()> {
        self.connection.ensure_ready()?;
        if !self.prepared.load(Ordering::Acquire) {
            self.driver().prepare(self.collection()).await?;
            self.prepared.store(true, Ordering::Release);
            debug!(collection = %self.collection(), "collection prepared");
        }
        Ok(())
    }

    pub(crate) fn forget_preparation(&self) {
        self.prepared.store(false, Ordering::Release);
    }

    /// Best-effort physical removal of rows seen expired on a read.
    async fn discard_expired(&self, ids: &[String]) {
        for id in ids {
            if let Err(err) = self.driver().delete_row_by_key(self.collection(), id).await {
                warn!(collection = %self.collection(), key = %id, error = %err, "failed to discard expired row");
            }
        }
        if !ids.is_empty() {
            debug!(collection = %self.collection(), count = ids.len(), "discarded expired rows");
        }
    }

    async fn live_row(&self, master: &str) -> Result<Option<Row>> {
        self.ready_check().await?;
        match self.driver().get_row_by_key(self.collection(), master).await? {
            Some(row) if row.is_expired_at(Utc::now()) => {
                self.discard_expired(&[row.id]).await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn live_rows(&self) -> Result<Vec<Row>> {
        self.ready_check().await?;
        let rows = self.driver().get_all_rows(self.collection()).await?;
        let sweep = expiry::partition(rows, Utc::now());
        self.discard_expired(&sweep.expired).await;
        Ok(sweep.live)
    }

    async fn load(&self, meta: &KeyMetadata) -> Result<Slot> {
        let row = self.live_row(&meta.master).await?;
        let current = row
            .as_ref()
            .and_then(|row| path::pick(&row.data, &meta.child))
            .cloned();
        Ok(Slot { row, current })
    }

    fn conflict(meta: &KeyMetadata, conflict: PathConflict) -> QuickDocError {
        let at = meta.prefix(conflict.depth);
        match conflict.found {
            ValueKind::Array => QuickDocError::validation(format!(
                "{:?} is not a usable index into the array at {at:?}",
                meta.child[conflict.depth]
            )),
            found => QuickDocError::mismatch(&at, ValueKind::Object, found),
        }
    }

    /// Write `value` at the key's path and persist the whole master value.
    async fn persist(
        &self,
        meta: &KeyMetadata,
        row: Option<Row>,
        value: Value,
        expire_at: Option<DateTime<Utc>>,
    ) -> Result<Value> {
        let update = row.is_some();
        let master_value = if meta.is_nested() {
            let mut data = row
                .map(|row| row.data)
                .unwrap_or_else(|| Value::Object(Map::new()));
            path::assign(&mut data, &meta.child, value).map_err(|c| Self::conflict(meta, c))?;
            data
        } else {
            value
        };

        let stored = self
            .driver()
            .set_row_by_key(self.collection(), &meta.master, master_value, update, expire_at)
            .await?;
        debug!(collection = %self.collection(), key = %meta.master, update, "row written");
        Ok(stored)
    }

    fn array_at(key: &str, current: Option<Value>) -> Result<Vec<Value>> {
        let value = current.unwrap_or(Value::Null);
        if !value.is_null() && !ValueKind::Array.matches(&value) {
            return Err(QuickDocError::mismatch(key, ValueKind::Array, ValueKind::of(&value)));
        }
        // Null is the only remaining non-array and starts an empty list.
        match guard::or_fallback(value, ValueKind::Array, Value::Array(Vec::new())) {
            Value::Array(items) => Ok(items),
            _ => Ok(Vec::new()),
        }
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// The value at `key`, or `None` when the row is absent or expired, the
    /// path does not resolve, or the value is JSON null.
    #[instrument(skip(self), fields(collection = %self.collection()))]
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let meta = KeyMetadata::parse(key)?;
        let Some(row) = self.live_row(&meta.master).await? else {
            return Ok(None);
        };
        Ok(path::pick(&row.data, &meta.child)
            .filter(|value| !value.is_null())
            .cloned())
    }

    /// Alias of [`Database::get`].
    pub async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        self.get(key).await
    }

    /// [`Database::get`] deserialized into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// The live row behind `key`'s master, with its timestamps.
    pub async fn get_raw(&self, key: &str) -> Result<Option<Row>> {
        let meta = KeyMetadata::parse(key)?;
        self.live_row(&meta.master).await
    }

    /// The array at `key`; empty when absent.
    pub async fn get_array(&self, key: &str) -> Result<Vec<Value>> {
        let value = self.get(key).await?;
        Self::array_at(key, value)
    }

    /// Whether [`Database::get`] finds a non-null value.
    pub async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Number of live rows.
    #[instrument(skip(self), fields(collection = %self.collection()))]
    pub async fn count(&self) -> Result<usize> {
        Ok(self.live_rows().await?.len())
    }

    /// Every live row, in driver order.
    pub async fn all(&self) -> Result<Vec<Entry>> {
        self.all_with(AllOptions::default()).await
    }

    /// Live rows, sorted, filtered and then limited per `options`.
    #[instrument(skip(self, options), fields(collection = %self.collection()))]
    pub async fn all_with(&self, options: AllOptions) -> Result<Vec<Entry>> {
        let sort = match options.sort.as_deref() {
            Some(field) => Some(
                SortKey::parse(field)
                    .ok_or_else(|| QuickDocError::validation(format!("invalid sort field {field:?}")))?,
            ),
            None => None,
        };

        let mut rows = self.live_rows().await?;
        if let Some(key) = sort {
            rows.sort_by(|a, b| key.compare(a, b));
        }

        let limit = if options.limit > 0 { options.limit } else { usize::MAX };
        let entries = rows
            .into_iter()
            .map(Entry::from)
            .filter(|entry| options.filter.as_ref().map_or(true, |keep| keep(entry)))
            .take(limit)
            .collect::<Vec<_>>();
        debug!(returned = entries.len(), "listed rows");
        Ok(entries)
    }

    /// Live rows whose id starts with `query`.
    pub async fn starts_with(&self, query: &str) -> Result<Vec<Entry>> {
        let query = query.to_string();
        self.all_with(AllOptions::new().filter(move |entry| entry.id.starts_with(&query)))
            .await
    }

    /// Live rows whose id ends with `query`.
    pub async fn ends_with(&self, query: &str) -> Result<Vec<Entry>> {
        let query = query.to_string();
        self.all_with(AllOptions::new().filter(move |entry| entry.id.ends_with(&query)))
            .await
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Store `value` at `key` permanently and return the new master value.
    pub async fn set(&self, key: &str, value: impl Serialize) -> Result<Value> {
        self.write(key, serde_json::to_value(value)?, None).await
    }

    /// Store `value` at `key`, expiring the whole master row after
    /// `expire_after_seconds`. Non-positive or non-finite durations (such as
    /// `-1`) make the row permanent.
    pub async fn set_with_expiry(
        &self,
        key: &str,
        value: impl Serialize,
        expire_after_seconds: f64,
    ) -> Result<Value> {
        self.write(key, serde_json::to_value(value)?, Some(expire_after_seconds))
            .await
    }

    #[instrument(skip(self, value), fields(collection = %self.collection()))]
    async fn write(&self, key: &str, value: Value, expire_after_seconds: Option<f64>) -> Result<Value> {
        let meta = KeyMetadata::parse(key)?;
        let expire_at = expiry::deadline(expire_after_seconds)?;
        let row = self.live_row(&meta.master).await?;
        self.persist(&meta, row, value, expire_at).await
    }

    /// Remove `key`. Flat keys delete the row; nested keys remove the
    /// property and rewrite the row. Returns whether anything was removed.
    #[instrument(skip(self), fields(collection = %self.collection()))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let meta = KeyMetadata::parse(key)?;
        if !meta.is_nested() {
            // An expired row is already gone as far as callers can tell; it
            // is still removed physically but does not count.
            let live = self.live_row(&meta.master).await?.is_some();
            let removed = self
                .driver()
                .delete_row_by_key(self.collection(), &meta.master)
                .await?;
            return Ok(live && removed > 0);
        }

        let Some(row) = self.live_row(&meta.master).await? else {
            return Ok(false);
        };
        let mut data = row.data;
        if path::remove(&mut data, &meta.child).is_none() {
            return Ok(false);
        }
        self.driver()
            .set_row_by_key(self.collection(), &meta.master, data, true, row.expire_at)
            .await?;
        Ok(true)
    }

    /// Remove every row in the collection.
    #[instrument(skip(self), fields(collection = %self.collection()))]
    pub async fn delete_all(&self) -> Result<bool> {
        self.ready_check().await?;
        let removed = self.driver().delete_all_rows(self.collection()).await?;
        info!(removed, "deleted all rows");
        Ok(true)
    }

    /// Remove every row and forget that the collection was prepared.
    pub async fn drop(&self) -> Result<bool> {
        let dropped = self.delete_all().await?;
        self.forget_preparation();
        Ok(dropped)
    }

    // ---------------------------------------------------------------------
    // Array operations
    // ---------------------------------------------------------------------

    /// Append `value` (or each element of an array `value`) to the array at
    /// `key`, creating it when absent. Returns the new array.
    #[instrument(skip(self, value), fields(collection = %self.collection()))]
    pub async fn push(&self, key: &str, value: impl Serialize) -> Result<Value> {
        let meta = KeyMetadata::parse(key)?;
        let value = serde_json::to_value(value)?;

        let slot = self.load(&meta).await?;
        let expire_at = slot.expire_at();
        let mut items = Self::array_at(key, slot.current)?;
        match value {
            Value::Array(values) => items.extend(values),
            other => items.push(other),
        }

        let updated = Value::Array(items);
        self.persist(&meta, slot.row, updated.clone(), expire_at).await?;
        Ok(updated)
    }

    /// Prepend `value` (or the elements of an array `value`, in order) to
    /// the array at `key`. Returns the new array.
    #[instrument(skip(self, value), fields(collection = %self.collection()))]
    pub async fn unshift(&self, key: &str, value: impl Serialize) -> Result<Value> {
        let meta = KeyMetadata::parse(key)?;
        let value = serde_json::to_value(value)?;

        let slot = self.load(&meta).await?;
        let expire_at = slot.expire_at();
        let mut items = Self::array_at(key, slot.current)?;
        let front = match value {
            Value::Array(values) => values,
            other => vec![other],
        };
        items.splice(0..0, front);

        let updated = Value::Array(items);
        self.persist(&meta, slot.row, updated.clone(), expire_at).await?;
        Ok(updated)
    }

    /// Remove and return the first element of the array at `key`.
    pub async fn shift(&self, key: &str) -> Result<Option<Value>> {
        self.take_end(key, true).await
    }

    /// Remove and return the last element of the array at `key`.
    pub async fn pop(&self, key: &str) -> Result<Option<Value>> {
        self.take_end(key, false).await
    }

    #[instrument(skip(self), fields(collection = %self.collection()))]
    async fn take_end(&self, key: &str, front: bool) -> Result<Option<Value>> {
        let meta = KeyMetadata::parse(key)?;
        let slot = self.load(&meta).await?;
        let expire_at = slot.expire_at();
        let mut items = Self::array_at(key, slot.current)?;
        let taken = if front {
            (!items.is_empty()).then(|| items.remove(0))
        } else {
            items.pop()
        };
        let Some(taken) = taken else {
            return Ok(None);
        };

        self.persist(&meta, slot.row, Value::Array(items), expire_at)
            .await?;
        Ok(Some(taken))
    }

    /// Remove elements matching `matcher` from the array at `key`: every
    /// match when `all_occurrences`, else only the first.
    ///
    /// Returns `None` when nothing is stored at `key`, else the updated
    /// array.
    #[instrument(skip(self, matcher), fields(collection = %self.collection()))]
    pub async fn pull(
        &self,
        key: &str,
        matcher: impl Into<Matcher>,
        all_occurrences: bool,
    ) -> Result<Option<Value>> {
        let meta = KeyMetadata::parse(key)?;
        let matcher = matcher.into();

        let slot = self.load(&meta).await?;
        if matches!(slot.current, None | Some(Value::Null)) {
            return Ok(None);
        }
        let expire_at = slot.expire_at();
        let mut items = Self::array_at(key, slot.current)?;

        let removed = matcher.remove_from(&mut items, all_occurrences);
        let updated = Value::Array(items);
        if removed > 0 {
            self.persist(&meta, slot.row, updated.clone(), expire_at).await?;
        }
        debug!(removed, "pulled elements");
        Ok(Some(updated))
    }

    // ---------------------------------------------------------------------
    // Numeric operations
    // ---------------------------------------------------------------------

    /// Add `value` to the number at `key` (absent counts as 0). Returns the
    /// new number.
    pub async fn add(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        self.add_subtract(key, value, false).await
    }

    /// Subtract `value` from the number at `key`.
    pub async fn subtract(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        self.add_subtract(key, value, true).await
    }

    /// Alias of [`Database::subtract`].
    pub async fn sub(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        self.add_subtract(key, value, true).await
    }

    /// Add or subtract `value` at `key`.
    #[instrument(skip(self, value), fields(collection = %self.collection()))]
    pub async fn add_subtract(&self, key: &str, value: impl Into<Value>, subtract: bool) -> Result<Value> {
        let meta = KeyMetadata::parse(key)?;
        let delta = value.into();
        let Value::Number(delta) = guard::expect(&delta, ValueKind::Number, "value")?.clone() else {
            return Err(QuickDocError::validation("value must be of type number"));
        };

        let slot = self.load(&meta).await?;
        let expire_at = slot.expire_at();
        let current = match slot.current {
            None | Some(Value::Null) => Number::from(0),
            Some(Value::Number(n)) => n,
            Some(other) => {
                return Err(QuickDocError::mismatch(key, ValueKind::Number, ValueKind::of(&other)))
            }
        };

        let result = Value::Number(combine(&current, &delta, subtract)?);
        self.persist(&meta, slot.row, result.clone(), expire_at).await?;
        Ok(result)
    }
}

/// Integer arithmetic when both sides are integers and the result fits,
/// floating point otherwise.
fn combine(current: &Number, delta: &Number, subtract: bool) -> Result<Number> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        let exact = if subtract { a.checked_sub(b) } else { a.checked_add(b) };
        if let Some(n) = exact {
            return Ok(Number::from(n));
        }
    }

    let a = current.as_f64().unwrap_or(0.0);
    let b = delta.as_f64().unwrap_or(0.0);
    let result = if subtract { a - b } else { a + b };
    Number::from_f64(result)
        .ok_or_else(|| QuickDocError::validation("arithmetic result is not a finite number"))
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collection", &self.collection())
            .field("driver", &self.driver().name())
            .field("state", &self.ready_state())
            .field("parent", &self.parent)
            .finish()
    }
}
