// SPDX-License-Identifier: PMPL-1.0-or-later
//! Integration tests for QuickDoc
//!
//! End-to-end behaviour of the `Database` facade over the in-memory driver:
//! dotted keys, expiry, array and numeric operations, listing and child
//! tables.

use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::Utc;
use quickdoc::driver::Driver;
use quickdoc::{
    AllOptions, Database, DatabaseOptions, InMemoryDriver, Matcher, MetricsDriver, QuickDocError,
    ReadyState, ValueKind,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A ready database plus a handle on its driver for direct inspection.
async fn create_test_store() -> (Database, InMemoryDriver) {
    init_tracing();
    let driver = InMemoryDriver::new();
    let db = Database::open(driver.clone(), DatabaseOptions::default())
        .await
        .unwrap();
    (db, driver)
}

// ---------------------------------------------------------------------------
// Reads and writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_set_get_round_trip() {
    let (db, _) = create_test_store().await;

    for (key, value) in [
        ("num", json!(42)),
        ("float", json!(1.5)),
        ("text", json!("hello")),
        ("flag", json!(false)),
        ("list", json!([1, "two", {"three": 3}])),
        ("obj", json!({"a": {"b": [true]}})),
    ] {
        db.set(key, &value).await.unwrap();
        assert_eq!(db.get(key).await.unwrap(), Some(value), "key {key}");
    }
}

#[tokio::test]
async fn test_nested_writes_build_the_master_value() {
    let (db, driver) = create_test_store().await;

    db.set("profile.name", "Ada").await.unwrap();
    db.set("profile.age", 30).await.unwrap();

    assert_eq!(
        db.get("profile").await.unwrap(),
        Some(json!({"name": "Ada", "age": 30}))
    );
    assert_eq!(db.get("profile.name").await.unwrap(), Some(json!("Ada")));
    assert_eq!(db.get("profile.missing").await.unwrap(), None);

    // One physical row.
    assert_eq!(driver.len("JSON").await, 1);
}

#[tokio::test]
async fn test_array_index_paths() {
    let (db, _) = create_test_store().await;

    db.set("scores", json!([10, 20])).await.unwrap();
    db.set("scores.1", 25).await.unwrap();
    db.set("scores.2", 30).await.unwrap();
    assert_eq!(db.get("scores").await.unwrap(), Some(json!([10, 25, 30])));
    assert_eq!(db.get("scores.0").await.unwrap(), Some(json!(10)));
}

#[tokio::test]
async fn test_typed_reads() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        age: u32,
    }

    let (db, _) = create_test_store().await;
    let ada = User { name: "Ada".into(), age: 36 };
    db.set("users.ada", &ada).await.unwrap();

    let back: Option<User> = db.get_as("users.ada").await.unwrap();
    assert_eq!(back, Some(ada));

    let wrong: Result<Option<u32>, _> = db.get_as("users.ada").await;
    assert!(matches!(wrong, Err(QuickDocError::Serialization(_))));
}

#[tokio::test]
async fn test_malformed_keys_fail_before_io() {
    init_tracing();
    let metered = MetricsDriver::new(InMemoryDriver::new());
    let db = Database::open(metered, DatabaseOptions::default()).await.unwrap();

    for key in ["", ".a", "a.", "a..b"] {
        assert!(
            matches!(db.get(key).await, Err(QuickDocError::Validation(_))),
            "key {key:?}"
        );
        assert!(matches!(db.set(key, 1).await, Err(QuickDocError::Validation(_))));
    }
}

#[tokio::test]
async fn test_delete_twice() {
    let (db, _) = create_test_store().await;
    db.set("k", "v").await.unwrap();

    assert!(db.delete("k").await.unwrap());
    assert!(!db.delete("k").await.unwrap());
    assert!(!db.has("k").await.unwrap());
}

#[tokio::test]
async fn test_delete_nested_property() {
    let (db, driver) = create_test_store().await;
    db.set("user", json!({"name": "Ada", "email": "ada@example.com"}))
        .await
        .unwrap();

    assert!(db.delete("user.email").await.unwrap());
    assert!(!db.delete("user.email").await.unwrap());
    assert_eq!(db.get("user").await.unwrap(), Some(json!({"name": "Ada"})));
    assert_eq!(driver.len("JSON").await, 1);
}

#[tokio::test]
async fn test_delete_all_and_drop() {
    let (db, driver) = create_test_store().await;
    for key in ["a", "b", "c"] {
        db.set(key, 1).await.unwrap();
    }

    assert!(db.delete_all().await.unwrap());
    assert_eq!(db.count().await.unwrap(), 0);

    db.set("d", 1).await.unwrap();
    assert!(db.drop().await.unwrap());
    assert!(driver.is_empty("JSON").await);

    // The collection is prepared again on next use.
    db.set("e", 1).await.unwrap();
    assert_eq!(db.count().await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_expired_key_reads_as_absent_before_purge() {
    let (db, driver) = create_test_store().await;

    db.set_with_expiry("session", json!({"token": "t"}), 0.05)
        .await
        .unwrap();
    assert!(db.has("session").await.unwrap());

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(db.get("session").await.unwrap(), None);
    assert!(!db.has("session").await.unwrap());
    assert_eq!(db.count().await.unwrap(), 0);
    // The read cleaned it up.
    assert!(driver.is_empty("JSON").await);
}

#[tokio::test]
async fn test_listing_skips_and_removes_expired_rows() {
    let (db, driver) = create_test_store().await;
    let past = Utc::now() - chrono::Duration::seconds(1);
    driver.prepare("JSON").await.unwrap();
    driver
        .set_row_by_key("JSON", "stale", json!(1), false, Some(past))
        .await
        .unwrap();
    db.set("fresh", 2).await.unwrap();

    let ids: Vec<_> = db.all().await.unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["fresh".to_string()]);
    assert_eq!(driver.len("JSON").await, 1);
}

#[tokio::test]
async fn test_out_of_range_ttl_is_rejected() {
    let (db, driver) = create_test_store().await;
    for ttl in [1e13, f64::MAX] {
        let err = db.set_with_expiry("k", 1, ttl).await.unwrap_err();
        assert!(matches!(err, QuickDocError::Validation(_)), "ttl {ttl}: {err:?}");
    }
    assert!(!db.has("k").await.unwrap());
    assert!(driver.is_empty("JSON").await);
}

#[tokio::test]
async fn test_delete_of_expired_row_reports_false() {
    let (db, driver) = create_test_store().await;
    let past = Utc::now() - chrono::Duration::seconds(1);
    driver.prepare("JSON").await.unwrap();
    driver
        .set_row_by_key("JSON", "stale", json!(1), false, Some(past))
        .await
        .unwrap();

    assert!(!db.delete("stale").await.unwrap());
    assert!(driver.is_empty("JSON").await);
    assert!(!db.delete("stale.inner").await.unwrap());
}

#[tokio::test]
async fn test_permanent_ttl_values() {
    let (db, _) = create_test_store().await;
    for ttl in [-1.0, 0.0, f64::NAN] {
        db.set_with_expiry("forever", 1, ttl).await.unwrap();
        let row = db.get_raw("forever").await.unwrap().unwrap();
        assert!(row.expire_at.is_none(), "ttl {ttl}");
    }
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_push_initialises_and_appends() {
    let (db, _) = create_test_store().await;

    assert_eq!(db.push("list", "x").await.unwrap(), json!(["x"]));
    assert_eq!(db.push("list", json!(["y", "z"])).await.unwrap(), json!(["x", "y", "z"]));
    assert_eq!(db.get_array("list").await.unwrap().len(), 3);
    assert!(db.get_array("nothing").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_push_on_non_array_leaves_value_unchanged() {
    let (db, _) = create_test_store().await;
    db.set("name", "Ada").await.unwrap();

    match db.push("name", "x").await.unwrap_err() {
        QuickDocError::TypeMismatch { key, expected, found } => {
            assert_eq!(key, "name");
            assert_eq!(expected, ValueKind::Array);
            assert_eq!(found, ValueKind::String);
        }
        other => panic!("expected TypeMismatch, got {other:?}"),
    }
    assert_eq!(db.get("name").await.unwrap(), Some(json!("Ada")));
}

#[tokio::test]
async fn test_unshift_shift_pop() {
    let (db, _) = create_test_store().await;
    db.set("q", json!([2, 3])).await.unwrap();

    db.unshift("q", 1).await.unwrap();
    assert_eq!(db.unshift("q", json!([-1, 0])).await.unwrap(), json!([-1, 0, 1, 2, 3]));

    assert_eq!(db.shift("q").await.unwrap(), Some(json!(-1)));
    assert_eq!(db.pop("q").await.unwrap(), Some(json!(3)));
    assert_eq!(db.get("q").await.unwrap(), Some(json!([0, 1, 2])));

    assert_eq!(db.shift("absent").await.unwrap(), None);
    db.set("empty", json!([])).await.unwrap();
    assert_eq!(db.pop("empty").await.unwrap(), None);
}

#[tokio::test]
async fn test_pull_variants() {
    let (db, _) = create_test_store().await;
    db.set("tags", json!(["a", "b", "a", "c", "a"])).await.unwrap();

    assert_eq!(
        db.pull("tags", json!("a"), false).await.unwrap(),
        Some(json!(["b", "a", "c", "a"]))
    );
    assert_eq!(
        db.pull("tags", json!("a"), true).await.unwrap(),
        Some(json!(["b", "c"]))
    );
    assert_eq!(
        db.pull("tags", Matcher::predicate(|v| v == "c"), true).await.unwrap(),
        Some(json!(["b"]))
    );
    assert_eq!(db.pull("absent", json!("a"), true).await.unwrap(), None);

    db.set("n", 1).await.unwrap();
    assert!(matches!(
        db.pull("n", json!(1), true).await,
        Err(QuickDocError::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_nested_array_operations_keep_siblings() {
    let (db, _) = create_test_store().await;
    db.set("user.name", "Ada").await.unwrap();
    db.push("user.langs", "en").await.unwrap();
    db.push("user.langs", "fr").await.unwrap();

    assert_eq!(
        db.get("user").await.unwrap(),
        Some(json!({"name": "Ada", "langs": ["en", "fr"]}))
    );
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_add_and_subtract() {
    let (db, _) = create_test_store().await;

    assert_eq!(db.add("k", 5).await.unwrap(), json!(5));
    assert_eq!(db.subtract("k", 3).await.unwrap(), json!(2));
    assert_eq!(db.sub("k", 0.5).await.unwrap(), json!(1.5));
    assert_eq!(db.add_subtract("stats.hits", 1, false).await.unwrap(), json!(1));
    assert_eq!(db.get("stats").await.unwrap(), Some(json!({"hits": 1})));
}

#[tokio::test]
async fn test_add_on_string_is_a_type_mismatch() {
    let (db, _) = create_test_store().await;
    db.set("k", "five").await.unwrap();

    assert!(matches!(
        db.add("k", 1).await,
        Err(QuickDocError::TypeMismatch { expected: ValueKind::Number, found: ValueKind::String, .. })
    ));
    assert_eq!(db.get("k").await.unwrap(), Some(json!("five")));
}

#[tokio::test]
async fn test_add_rejects_non_numeric_delta() {
    let (db, _) = create_test_store().await;
    assert!(matches!(
        db.add("k", "1").await,
        Err(QuickDocError::Validation(_))
    ));
    assert!(!db.has("k").await.unwrap());
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_all_limit_filter_sort() {
    let (db, _) = create_test_store().await;
    for (i, key) in ["e", "d", "c", "b", "a"].iter().enumerate() {
        db.set(key, json!({"rank": i})).await.unwrap();
    }

    assert_eq!(db.all().await.unwrap().len(), 5);
    assert_eq!(db.all_with(AllOptions::new().limit(2)).await.unwrap().len(), 2);

    let odd = db
        .all_with(AllOptions::new().filter(|e| e.data["rank"].as_u64().is_some_and(|r| r % 2 == 1)))
        .await
        .unwrap();
    assert_eq!(odd.len(), 2);

    let top: Vec<_> = db
        .all_with(AllOptions::new().sort("-rank").limit(3))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(top, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_limit_counts_filtered_entries() {
    let (db, _) = create_test_store().await;
    for key in ["a", "b", "c", "d", "e"] {
        db.set(key, 1).await.unwrap();
    }

    let ids: Vec<_> = db
        .all_with(AllOptions::new().sort("ID").limit(2).filter(|e| e.id.as_str() >= "c"))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec!["c", "d"]);

    let all_kept = db
        .all_with(AllOptions::new().limit(0).filter(|e| e.id != "a"))
        .await
        .unwrap();
    assert_eq!(all_kept.len(), 4);
}

#[tokio::test]
async fn test_starts_with_and_ends_with() {
    let (db, driver) = create_test_store().await;
    driver.prepare("JSON").await.unwrap();
    // Dotted ids can only be created below the facade.
    for id in ["user.1", "user.2", "username", "admin.1"] {
        driver.set_row_by_key("JSON", id, json!(id), false, None).await.unwrap();
    }

    let users: Vec<_> = db
        .starts_with("user.")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(users, vec!["user.1", "user.2"]);

    let ones = db.ends_with(".1").await.unwrap();
    assert_eq!(ones.len(), 2);
}

#[tokio::test]
async fn test_entries_serialize_with_upper_case_id() {
    let (db, _) = create_test_store().await;
    db.set("k", 1).await.unwrap();
    let listed = serde_json::to_value(db.all().await.unwrap()).unwrap();
    assert_eq!(listed, json!([{"ID": "k", "data": 1}]));
}

// ---------------------------------------------------------------------------
// Lifecycle, tables and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_not_ready_until_connected() {
    init_tracing();
    let db = Database::new(InMemoryDriver::new(), DatabaseOptions::default()).unwrap();
    let mut states = db.subscribe();

    assert!(matches!(
        db.count().await,
        Err(QuickDocError::NotReady(ReadyState::Uninitialized))
    ));

    db.connect().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ReadyState::Ready);

    db.close(true).await.unwrap();
    assert_eq!(db.ready_state(), ReadyState::Closed);
    assert!(matches!(db.get("k").await, Err(QuickDocError::NotReady(ReadyState::Closed))));
}

#[tokio::test]
async fn test_child_tables_are_isolated() {
    let (db, driver) = create_test_store().await;
    let users = db.table("users").await.unwrap();
    let posts = db.use_collection("posts").await.unwrap();

    users.set("1", json!({"name": "Ada"})).await.unwrap();
    posts.set("1", json!({"title": "Hello"})).await.unwrap();

    assert_eq!(users.get("1.name").await.unwrap(), Some(json!("Ada")));
    assert_eq!(posts.get("1.title").await.unwrap(), Some(json!("Hello")));
    assert!(!db.has("1").await.unwrap());
    assert_eq!(driver.tables().await, vec!["JSON", "posts", "users"]);
}

#[tokio::test]
async fn test_compound_ops_cost_one_read_and_one_write() {
    init_tracing();
    let metered = Arc::new(MetricsDriver::new(InMemoryDriver::new()));
    let db = Database::open(metered.clone(), DatabaseOptions::default())
        .await
        .unwrap();
    metered.reset_stats().await;

    db.push("list", 1).await.unwrap();
    let stats = metered.stats().await;
    assert_eq!(stats.get_count, 1);
    assert_eq!(stats.set_count, 1);
}

#[tokio::test]
async fn test_concurrent_writers_last_write_wins() {
    let (db, _) = create_test_store().await;
    db.set("counter", 0).await.unwrap();

    let writes = (1..=10).map(|i| db.set("counter", i));
    let results = futures::future::join_all(writes).await;
    assert!(results.iter().all(Result::is_ok));

    let value = db.get("counter").await.unwrap().unwrap();
    assert!((1..=10).contains(&value.as_i64().unwrap()));
}
