//! Timestamp and id helpers shared across the engine.

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Current instant as an ISO-8601 UTC timestamp, e.g. `2026-07-28T10:15:03Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parse a stored ISO-8601 timestamp back into a `DateTime<Utc>`.
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Seconds elapsed between a stored timestamp and now. Returns `None` if the
/// timestamp cannot be parsed.
pub fn seconds_since(iso: &str) -> Option<i64> {
    parse_iso(iso).map(|then| (Utc::now() - then).num_seconds())
}

pub fn new_node_id() -> String {
    format!("n_{}", Ulid::new())
}

pub fn new_edge_id() -> String {
    format!("e_{}", Ulid::new())
}

pub fn new_event_id() -> String {
    format!("ev_{}", Ulid::new())
}

pub fn new_knowledge_id() -> String {
    format!("k_{}", Ulid::new())
}
