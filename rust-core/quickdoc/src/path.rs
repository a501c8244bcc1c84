// SPDX-License-Identifier: PMPL-1.0-or-later
//! Dot-notation key resolution.
//!
//! A key such as `"profile.address.city"` names a row (`profile`, the
//! master key) and a location inside that row's value (`address.city`).
//! Drivers only ever see master keys; everything below the master is read
//! and rewritten here, in memory, by walking the value.
//!
//! Path segments address object members by name and array elements by
//! decimal index (`"scores.0"`).

use serde_json::{Map, Value};

use crate::error::{QuickDocError, Result};
use crate::guard::{self, ValueKind};

/// The parts of a dotted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMetadata {
    /// Everything before the first dot. Never contains a dot.
    pub master: String,
    /// The nested path below `master`, in order. Empty for flat keys.
    pub child: Vec<String>,
    /// `child` joined with dots. Empty for flat keys.
    pub target: String,
}

impl KeyMetadata {
    /// Split `key` on its first dot.
    ///
    /// Rejects empty keys and keys with empty segments (`".a"`, `"a."`,
    /// `"a..b"`).
    pub fn parse(key: &str) -> Result<Self> {
        guard::expect_key(key)?;

        let (master, target) = match key.split_once('.') {
            Some((master, target)) => (master, target),
            None => (key, ""),
        };

        let child: Vec<String> = if target.is_empty() {
            Vec::new()
        } else {
            target.split('.').map(str::to_string).collect()
        };

        if master.is_empty()
            || child.iter().any(String::is_empty)
            || (key.ends_with('.') && child.is_empty())
        {
            return Err(QuickDocError::validation(format!(
                "key {key:?} contains an empty path segment"
            )));
        }

        Ok(Self {
            master: master.to_string(),
            child,
            target: target.to_string(),
        })
    }

    /// Whether the key addresses a location below the master row.
    pub fn is_nested(&self) -> bool {
        !self.child.is_empty()
    }

    /// Dotted key of the first `depth` segments, used in error reports.
    pub(crate) fn prefix(&self, depth: usize) -> String {
        let mut key = self.master.clone();
        for segment in self.child.iter().take(depth) {
            key.push('.');
            key.push_str(segment);
        }
        key
    }
}

/// Resolve a key into its [`KeyMetadata`].
pub fn key_metadata(key: &str) -> Result<KeyMetadata> {
    KeyMetadata::parse(key)
}

/// The master key of `key`.
pub fn master_key(key: &str) -> Result<String> {
    Ok(KeyMetadata::parse(key)?.master)
}

/// A write could not descend through a non-container value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathConflict {
    /// How many segments were walked before hitting the blocking value.
    pub depth: usize,
    /// Kind of the blocking value.
    pub found: ValueKind,
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Read the value at `path` inside `holder`.
///
/// An empty path yields `holder` itself; `None` when any step is missing.
pub fn pick<'a>(holder: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(holder, |cursor, segment| match cursor {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => parse_index(segment).and_then(|i| items.get(i)),
        _ => None,
    })
}

fn pick_mut<'a>(holder: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter().try_fold(holder, |cursor, segment| match cursor {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => parse_index(segment).and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

/// Write `value` at `path` inside `holder`, creating missing objects on the
/// way.
///
/// Null intermediates become objects. Array segments must be an existing
/// index or exactly one past the end (append). Scalars block the walk.
pub fn assign(holder: &mut Value, path: &[String], value: Value) -> std::result::Result<(), PathConflict> {
    assign_at(holder, path, value, 0)
}

fn assign_at(
    cursor: &mut Value,
    path: &[String],
    value: Value,
    depth: usize,
) -> std::result::Result<(), PathConflict> {
    let Some((segment, rest)) = path.split_first() else {
        *cursor = value;
        return Ok(());
    };

    if cursor.is_null() {
        *cursor = Value::Object(Map::new());
    }

    let slot = match cursor {
        Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
        Value::Array(items) => {
            let conflict = PathConflict {
                depth,
                found: ValueKind::Array,
            };
            let index = parse_index(segment).ok_or(conflict)?;
            if index == items.len() {
                items.push(Value::Null);
            }
            items.get_mut(index).ok_or(conflict)?
        }
        other => {
            return Err(PathConflict {
                depth,
                found: ValueKind::of(other),
            })
        }
    };

    assign_at(slot, rest, value, depth + 1)
}

/// Remove and return the value at `path`. An empty path removes nothing.
pub fn remove(holder: &mut Value, path: &[String]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    match pick_mut(holder, parents)? {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            let index = parse_index(last)?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}
