//! UUID v7 utilities for time-ordered identifiers.
//!
//! Entity and job ids are UUIDv7 (RFC 9562): the first 48 bits embed a
//! millisecond Unix timestamp, so ids generated later sort greater. The
//! job store relies on this as the tiebreak when two jobs share a
//! `created_at` millisecond.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check whether a UUID is version 7.
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}

/// Extract the embedded millisecond timestamp from a UUIDv7.
///
/// Returns `None` for non-v7 UUIDs.
pub fn extract_timestamp(id: &Uuid) -> Option<DateTime<Utc>> {
    if !is_v7(id) {
        return None;
    }
    let bytes = id.as_bytes();
    let mut millis: u64 = 0;
    for b in &bytes[..6] {
        millis = (millis << 8) | u64::from(*b);
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}
