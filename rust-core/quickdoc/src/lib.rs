// SPDX-License-Identifier: PMPL-1.0-or-later
//
// QuickDoc: a dot-path key-value store over pluggable document drivers
//
// Values are JSON documents stored one row per master key. A key such as
// `"user.profile.name"` addresses row `"user"` and the path
// `profile.name` inside it. The `Database` facade resolves keys, reads the
// whole row through a `Driver`, edits it in memory and writes it back.
//
// # Modules
//
// - [`database`] -- The `Database` facade: reads, writes, array and numeric
//   operations, listing.
// - [`driver`] -- The `Driver` contract and the persisted `Row` shape.
// - [`path`] -- Dotted-key parsing and path get/set/remove on JSON values.
// - [`expiry`] -- Row expiration arithmetic.
// - [`lifecycle`] -- Connection readiness state.
// - [`table`] -- Child tables bound to other collections.
// - [`memory`] -- An in-memory driver for tests and ephemeral data.
// - [`metrics`] -- A transparent wrapper that counts driver operations.
// - [`query`] -- Listing options, sort keys and array matchers.
// - [`guard`] -- Runtime kind checks on JSON arguments.
// - [`config`] -- `DatabaseOptions`.
// - [`error`] -- `DriverError` and `QuickDocError`.
//
// # Example
//
// ```rust
// use quickdoc::{AllOptions, Database, DatabaseOptions, InMemoryDriver, MetricsDriver};
// use serde_json::json;
//
// # tokio_test::block_on(async {
// let driver = MetricsDriver::new(InMemoryDriver::new());
// let db = Database::open(driver, DatabaseOptions::default()).await.unwrap();
//
// db.set("alice", json!({"score": 10})).await.unwrap();
// db.add("alice.score", 5).await.unwrap();
// db.set("bob.score", 3).await.unwrap();
//
// let ranked = db.all_with(AllOptions::new().sort("-score")).await.unwrap();
// assert_eq!(ranked[0].id, "alice");
// assert_eq!(ranked[0].data, json!({"score": 15}));
// # });
// ```

pub mod config;
pub mod database;
pub mod driver;
pub mod error;
pub mod expiry;
pub mod guard;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod path;
pub mod query;
pub mod table;

pub use config::DatabaseOptions;
pub use database::{CollectionMetadata, Database};
pub use driver::{Driver, Row};
pub use error::{DriverError, QuickDocError, Result};
pub use guard::ValueKind;
pub use lifecycle::{Connection, ReadyState};
pub use memory::InMemoryDriver;
pub use metrics::{DriverStats, MetricsDriver};
pub use path::KeyMetadata;
pub use query::{AllOptions, Entry, Matcher};

pub use serde_json::Value;
