//! Canonical JSON encoding for audit-event hashing.
//!
//! One byte-deterministic encoding, used everywhere an event hash is
//! computed or verified: keys sorted lexicographically, RFC 3339 UTC
//! timestamps at microsecond precision, no insignificant whitespace,
//! absent optional fields omitted. `self_hash` is excluded from the
//! encoding; `prev_hash` is included.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::AuditEvent;

/// Hash value linking the genesis event: 64 zero hex chars.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Render a timestamp the way the chain stores and hashes it.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Truncate to microsecond precision so the in-memory event hashes
/// identically to its stored round-trip.
pub fn truncate_ts(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// Canonical serialization of an event, `self_hash` excluded.
pub fn canonical_event_json(event: &AuditEvent) -> String {
    let mut map = Vec::with_capacity(13);
    map.push(("action", Value::String(event.action.clone())));
    if let Some(actor) = &event.actor_id {
        map.push(("actor_id", Value::String(actor.clone())));
    }
    if let Some(changes) = &event.changes {
        map.push(("changes", changes.clone()));
    }
    map.push(("event_type", Value::String(event.event_type.as_str().into())));
    map.push(("id", Value::String(event.id.clone())));
    if let Some(meta) = &event.metadata {
        map.push(("metadata", meta.clone()));
    }
    map.push(("prev_hash", Value::String(event.prev_hash.clone())));
    map.push(("resource_id", Value::String(event.resource_id.clone())));
    map.push(("resource_type", Value::String(event.resource_type.clone())));
    map.push(("seq", Value::from(event.seq)));
    map.push(("severity", Value::String(event.severity.as_str().into())));
    if let Some(tenant) = &event.tenant_id {
        map.push(("tenant_id", Value::String(tenant.clone())));
    }
    map.push(("ts", Value::String(format_ts(event.ts))));

    // Top-level keys above are already in sorted order; nested values get
    // sorted by the recursive writer.
    let mut out = String::with_capacity(256);
    out.push('{');
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(key, &mut out);
        out.push(':');
        write_canonical_value(value, &mut out);
    }
    out.push('}');
    out
}

/// SHA-256 of the canonical encoding, hex-encoded (64 chars).
pub fn hash_event(event: &AuditEvent) -> String {
    let canonical = canonical_event_json(event);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Deterministic recursive writer: object keys sorted, compact separators.
pub fn write_canonical_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
