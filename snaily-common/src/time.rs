//! Timestamp utilities
//!
//! Offline events and cache entries carry epoch-millisecond timestamps so they
//! sort and compare the same way regardless of where they were produced.

use chrono::Utc;

/// Milliseconds in one day
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Get current time as milliseconds since the UNIX epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a number of days to milliseconds, saturating on overflow
pub fn days_to_millis(days: u32) -> i64 {
    i64::from(days).saturating_mul(MILLIS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_current() {
        let before = Utc::now().timestamp_millis();
        let millis = now_millis();
        let after = Utc::now().timestamp_millis();
        assert!(millis >= before && millis <= after);
        // After year 2000
        assert!(millis > 946_684_800_000);
    }

    #[test]
    fn test_days_to_millis() {
        assert_eq!(days_to_millis(0), 0);
        assert_eq!(days_to_millis(1), 86_400_000);
        assert_eq!(days_to_millis(30), 30 * 86_400_000);
    }
}
