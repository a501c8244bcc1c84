// SPDX-License-Identifier: PMPL-1.0-or-later
//! Soft TTL handling.
//!
//! Expired rows may linger physically until a backend sweep removes them;
//! every read path runs rows through [`partition`] so they are never
//! returned, and hands the expired ids back for best-effort deletion.

use chrono::{DateTime, Duration, Utc};

use crate::driver::Row;
use crate::error::{QuickDocError, Result};

/// Whether `seconds` asks for an expiry at all: finite and positive.
///
/// `-1` (the conventional "permanent"), zero, NaN and infinities all mean
/// the row never expires.
pub fn should_expire(seconds: f64) -> bool {
    seconds.is_finite() && seconds > 0.0
}

/// `now + seconds`, rounded up to the next millisecond so a positive
/// duration always lands after `now`.
///
/// Only meaningful when [`should_expire`] holds. `None` when the deadline
/// is past what a timestamp can represent.
pub fn create_duration(seconds: f64) -> Option<DateTime<Utc>> {
    let millis = (seconds * 1000.0).ceil();
    if !millis.is_finite() || millis > i64::MAX as f64 {
        return None;
    }
    let offset = Duration::try_milliseconds(millis as i64)?;
    Utc::now().checked_add_signed(offset)
}

/// The expiry deadline for a write asking for `seconds`, or `None` for a
/// permanent row.
///
/// Fails with [`QuickDocError::Validation`] when the deadline cannot be
/// represented.
pub fn deadline(seconds: Option<f64>) -> Result<Option<DateTime<Utc>>> {
    match seconds.filter(|s| should_expire(*s)) {
        Some(secs) => create_duration(secs).map(Some).ok_or_else(|| {
            QuickDocError::validation(format!("expiry of {secs} seconds is out of range"))
        }),
        None => Ok(None),
    }
}

/// Whether a row with this deadline is gone at `now`.
pub fn is_expired(expire_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expire_at, Some(at) if at <= now)
}

/// Rows split by visibility.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Rows still visible.
    pub live: Vec<Row>,
    /// Ids of rows that have expired but still exist physically.
    pub expired: Vec<String>,
}

/// Split `rows` into live rows and expired ids as of `now`.
pub fn partition(rows: Vec<Row>, now: DateTime<Utc>) -> Sweep {
    let mut sweep = Sweep::default();
    for row in rows {
        if row.is_expired_at(now) {
            sweep.expired.push(row.id);
        } else {
            sweep.live.push(row);
        }
    }
    sweep
}
