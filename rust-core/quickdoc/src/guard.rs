// SPDX-License-Identifier: PMPL-1.0-or-later
//! Argument and value kind checks.
//!
//! Every stored payload is a [`serde_json::Value`]; operations that need a
//! particular shape (numbers for `add`, arrays for `push`) check it against a
//! closed set of [`ValueKind`]s instead of probing types at runtime.

use std::fmt;

use serde_json::Value;

use crate::error::{QuickDocError, Result};

/// The shape of a JSON-like value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// Classify a value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Lowercase name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }

    /// Whether `value` has this kind.
    pub fn matches(self, value: &Value) -> bool {
        ValueKind::of(value) == self
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mandatory check: returns `value` when it has the `expected` kind, else a
/// [`QuickDocError::Validation`] naming the offending `argument`.
pub fn expect<'a>(value: &'a Value, expected: ValueKind, argument: &str) -> Result<&'a Value> {
    if expected.matches(value) {
        Ok(value)
    } else {
        Err(QuickDocError::validation(format!(
            "{argument} must be of type {expected}, received {}",
            ValueKind::of(value)
        )))
    }
}

/// Lenient check: returns `value` when it has the `expected` kind, else
/// `fallback`.
pub fn or_fallback(value: Value, expected: ValueKind, fallback: Value) -> Value {
    if expected.matches(&value) {
        value
    } else {
        fallback
    }
}

/// Validate a caller-supplied key before it is resolved.
pub(crate) fn expect_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(QuickDocError::validation("key must be a non-empty string"));
    }
    Ok(())
}
