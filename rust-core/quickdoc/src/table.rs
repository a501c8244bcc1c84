// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Child tables for QuickDoc.
//
// A child table is a `Database` bound to another collection. By default it
// reuses the parent's `Connection`, so both see the same readiness state and
// the same driver, while their rows stay apart because every driver call is
// scoped by collection name.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::DatabaseOptions;
use crate::database::Database;
use crate::driver::Driver;
use crate::error::Result;
use crate::lifecycle::{Connection, ReadyState};

impl Database {
    /// A child table over `collection`.
    ///
    /// With `share_connection_from_parent` (the default) the child reuses
    /// this database's connection and, if it is already ready, prepares the
    /// collection straight away. Otherwise the child gets its own connection
    /// over the same driver and connects when `auto_connect` is set.
    ///
    /// # Example
    ///
    /// ```rust
    /// use quickdoc::{Database, DatabaseOptions, InMemoryDriver};
    /// use serde_json::json;
    ///
    /// # tokio_test::block_on(async {
    /// let db = Database::open(InMemoryDriver::new(), DatabaseOptions::default()).await.unwrap();
    /// let users = db.instantiate_child("users").await.unwrap();
    ///
    /// users.set("ada", json!({"admin": true})).await.unwrap();
    /// assert!(users.has("ada").await.unwrap());
    /// assert!(!db.has("ada").await.unwrap());
    /// assert!(users.is_child());
    /// # });
    /// ```
    #[instrument(skip(self), fields(parent = %self.collection()))]
    pub async fn instantiate_child(&self, collection: &str) -> Result<Database> {
        let options = self.child_options(collection);
        let connection = if self.options.share_connection_from_parent {
            Arc::clone(&self.connection)
        } else {
            Arc::new(Connection::new(Arc::clone(self.driver())))
        };
        self.adopt(connection, options).await
    }

    /// A child table over `collection` on a fresh connection to `driver`.
    #[instrument(skip(self, driver), fields(parent = %self.collection()))]
    pub async fn instantiate_child_with(
        &self,
        collection: &str,
        driver: impl Driver + 'static,
    ) -> Result<Database> {
        let options = self.child_options(collection);
        let connection = Arc::new(Connection::new(Arc::new(driver)));
        self.adopt(connection, options).await
    }

    /// Alias of [`Database::instantiate_child`].
    pub async fn table(&self, collection: &str) -> Result<Database> {
        self.instantiate_child(collection).await
    }

    /// Alias of [`Database::instantiate_child`].
    pub async fn use_collection(&self, collection: &str) -> Result<Database> {
        self.instantiate_child(collection).await
    }

    /// Whether this database was created from another one.
    pub fn is_child(&self) -> bool {
        self.options.child
    }

    /// Whether this database is a root rather than a child table.
    pub fn is_parent(&self) -> bool {
        !self.is_child()
    }

    /// Collection of the database this child was created from.
    pub fn parent_collection(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn child_options(&self, collection: &str) -> DatabaseOptions {
        DatabaseOptions {
            collection_name: collection.to_string(),
            child: true,
            ..self.options.clone()
        }
    }

    async fn adopt(&self, connection: Arc<Connection>, options: DatabaseOptions) -> Result<Database> {
        let shared = Arc::ptr_eq(&connection, &self.connection);
        let mut child = Database::with_connection(connection, options)?;
        child.parent = Some(self.collection().to_string());

        if shared {
            if child.ready_state() == ReadyState::Ready {
                child.ready_check().await?;
            }
        } else if child.options.auto_connect {
            child.connect().await?;
        }

        debug!(child = %child.collection(), shared, "child table created");
        Ok(child)
    }
}
