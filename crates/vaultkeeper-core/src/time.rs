//! Wall clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current time in milliseconds since the Unix epoch.
///
/// A clock set before 1970 reads as zero rather than panicking.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
