// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Fuzz target for dotted-key parsing and path writes.
// Run with: cargo +nightly fuzz run fuzz_key_path
//
// Any UTF-8 key must either be rejected or round-trip through
// assign/pick on a fresh object.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quickdoc::path::{self, KeyMetadata};
use serde_json::{json, Value};

fuzz_target!(|data: &[u8]| {
    let Ok(key) = std::str::from_utf8(data) else {
        return;
    };
    if key.len() > 4096 {
        return;
    }

    let Ok(meta) = KeyMetadata::parse(key) else {
        return;
    };
    assert!(!meta.master.contains('.'));

    let mut holder = json!({});
    let marker = Value::from(key);
    if path::assign(&mut holder, &meta.child, marker.clone()).is_ok() {
        assert_eq!(path::pick(&holder, &meta.child), Some(&marker));
        let _ = path::remove(&mut holder, &meta.child);
    }
});
