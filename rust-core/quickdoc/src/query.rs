// SPDX-License-Identifier: PMPL-1.0-or-later
//! Listing options and array matchers.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::driver::Row;
use crate::path;

/// One listed row: its master key and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "ID")]
    pub id: String,
    pub data: Value,
}

impl From<Row> for Entry {
    fn from(row: Row) -> Self {
        Self {
            id: row.id,
            data: row.data,
        }
    }
}

type EntryFilter = Arc<dyn Fn(&Entry) -> bool + Send + Sync>;

/// Options for [`crate::Database::all_with`].
///
/// Rows are sorted, then passed through `filter`, then truncated to
/// `limit`.
#[derive(Clone, Default)]
pub struct AllOptions {
    /// Maximum entries returned after filtering; 0 means unbounded.
    pub limit: usize,
    /// Sort field, see [`SortKey::parse`].
    pub sort: Option<String>,
    /// Predicate applied to each materialized entry.
    pub filter: Option<EntryFilter>,
}

impl AllOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn sort(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(field.into());
        self
    }

    pub fn filter(mut self, predicate: impl Fn(&Entry) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for AllOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllOptions")
            .field("limit", &self.limit)
            .field("sort", &self.sort)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// What a sort string refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SortField {
    Id,
    CreatedAt,
    UpdatedAt,
    ExpireAt,
    Data(Vec<String>),
}

/// A parsed sort field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    field: SortField,
    descending: bool,
}

impl SortKey {
    /// Parse a sort string.
    ///
    /// A leading `-` sorts descending. `ID`/`id`, `createdAt`, `updatedAt`
    /// and `expireAt` name row fields; `data` or `data.<path>` name the
    /// payload; any other string is taken as a path inside the payload.
    pub fn parse(field: &str) -> Option<Self> {
        let (descending, name) = match field.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, field.strip_prefix('+').unwrap_or(field)),
        };
        if name.is_empty() {
            return None;
        }

        let field = match name {
            "ID" | "id" => SortField::Id,
            "createdAt" => SortField::CreatedAt,
            "updatedAt" => SortField::UpdatedAt,
            "expireAt" => SortField::ExpireAt,
            "data" => SortField::Data(Vec::new()),
            other => {
                let dotted = other.strip_prefix("data.").unwrap_or(other);
                SortField::Data(dotted.split('.').map(str::to_string).collect())
            }
        };

        Some(Self { field, descending })
    }

    /// Order two rows by this key.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ordering = match &self.field {
            SortField::Id => a.id.cmp(&b.id),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::ExpireAt => a.expire_at.cmp(&b.expire_at),
            SortField::Data(segments) => compare_values(
                path::pick(&a.data, segments),
                path::pick(&b.data, segments),
            ),
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn kind_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order over optional values: missing/null first, then booleans,
/// numbers, strings; arrays and objects compare equal among themselves.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

/// Loose equality used when pulling from arrays: numbers compare by value
/// (`1 == 1.0`), everything else structurally.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

type ElementPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Which array elements [`crate::Database::pull`] removes.
#[derive(Clone)]
pub enum Matcher {
    /// Elements equal to this value.
    Equals(Value),
    /// Elements equal to any of these values.
    AnyOf(Vec<Value>),
    /// Elements for which the predicate holds.
    Predicate(ElementPredicate),
}

impl Matcher {
    pub fn predicate(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Matcher::Predicate(Arc::new(f))
    }

    /// Remove matching elements from `items`, either every match or only
    /// the first one per candidate. Returns how many were removed.
    pub fn remove_from(&self, items: &mut Vec<Value>, all_occurrences: bool) -> usize {
        let before = items.len();
        match self {
            Matcher::Equals(target) => remove_matching(items, all_occurrences, |v| values_equal(v, target)),
            Matcher::AnyOf(targets) => {
                if all_occurrences {
                    items.retain(|v| !targets.iter().any(|t| values_equal(v, t)));
                } else {
                    for target in targets {
                        remove_matching(items, false, |v| values_equal(v, target));
                    }
                }
            }
            Matcher::Predicate(f) => remove_matching(items, all_occurrences, |v| f(v)),
        }
        before - items.len()
    }
}

fn remove_matching(items: &mut Vec<Value>, all_occurrences: bool, matches: impl Fn(&Value) -> bool) {
    if all_occurrences {
        items.retain(|v| !matches(v));
    } else if let Some(index) = items.iter().position(|v| matches(v)) {
        items.remove(index);
    }
}

/// An array value pulls each of its elements; anything else pulls itself.
impl From<Value> for Matcher {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(values) => Matcher::AnyOf(values),
            other => Matcher::Equals(other),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Equals(v) => f.debug_tuple("Equals").field(v).finish(),
            Matcher::AnyOf(vs) => f.debug_tuple("AnyOf").field(vs).finish(),
            Matcher::Predicate(_) => f.write_str("Predicate(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn row(id: &str, data: Value) -> Row {
        Row::new(id, data, Utc::now(), None)
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(
            SortKey::parse("-ID"),
            Some(SortKey { field: SortField::Id, descending: true })
        );
        assert_eq!(
            SortKey::parse("data.score"),
            Some(SortKey { field: SortField::Data(vec!["score".into()]), descending: false })
        );
        assert_eq!(
            SortKey::parse("stats.level"),
            Some(SortKey {
                field: SortField::Data(vec!["stats".into(), "level".into()]),
                descending: false
            })
        );
        assert_eq!(SortKey::parse("-"), None);
    }

    #[test]
    fn test_sort_by_payload_field() {
        let mut rows = vec![
            row("a", json!({"score": 3})),
            row("b", json!({"score": 1})),
            row("c", json!({})),
            row("d", json!({"score": 2.5})),
        ];
        let key = SortKey::parse("-score").unwrap();
        rows.sort_by(|x, y| key.compare(x, y));
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn test_sort_by_created_at() {
        let now = Utc::now();
        let older = Row::new("z", json!(1), now - Duration::seconds(5), None);
        let newer = Row::new("a", json!(1), now, None);
        let key = SortKey::parse("createdAt").unwrap();
        assert_eq!(key.compare(&older, &newer), Ordering::Less);
    }

    #[test]
    fn test_values_equal_across_number_representations() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!({"a": [1]}), &json!({"a": [1]})));
    }

    #[test]
    fn test_matcher_equals() {
        let mut items = vec![json!(1), json!(2), json!(1), json!(3)];
        assert_eq!(Matcher::Equals(json!(1)).remove_from(&mut items.clone(), true), 2);

        assert_eq!(Matcher::Equals(json!(1)).remove_from(&mut items, false), 1);
        assert_eq!(items, vec![json!(2), json!(1), json!(3)]);
    }

    #[test]
    fn test_matcher_any_of() {
        let mut items = vec![json!("a"), json!("b"), json!("a"), json!("c")];
        Matcher::from(json!(["a", "c"])).remove_from(&mut items, false);
        assert_eq!(items, vec![json!("b"), json!("a")]);
    }

    #[test]
    fn test_matcher_predicate() {
        let mut items = vec![json!(1), json!(5), json!(10)];
        let big = Matcher::predicate(|v| v.as_i64().is_some_and(|n| n >= 5));
        assert_eq!(big.remove_from(&mut items, true), 2);
        assert_eq!(items, vec![json!(1)]);
    }

    #[test]
    fn test_all_options_builder() {
        let opts = AllOptions::new().limit(2).sort("-ID").filter(|e| e.id != "x");
        assert_eq!(opts.limit, 2);
        assert_eq!(opts.sort.as_deref(), Some("-ID"));
        let keep = opts.filter.as_ref().unwrap();
        assert!(keep(&Entry { id: "y".into(), data: json!(null) }));
        assert!(!keep(&Entry { id: "x".into(), data: json!(null) }));
    }
}
