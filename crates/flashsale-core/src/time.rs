use std::time::Duration;

use time::OffsetDateTime;

/// Current UTC wall-clock time.
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Milliseconds since the Unix epoch for `at`.
pub fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    unix_millis(now_utc())
}

/// `base + ttl` in Unix milliseconds, saturating.
pub fn millis_after(base: i64, ttl: Duration) -> i64 {
    base.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_unix_millis() {
        let at = datetime!(2022-01-01 0:00:01.250 UTC);
        assert_eq!(unix_millis(at), 1_640_995_201_250);
    }

    #[test]
    fn test_millis_after_saturates() {
        assert_eq!(millis_after(1_000, Duration::from_secs(2)), 3_000);
        assert_eq!(millis_after(i64::MAX - 1, Duration::from_secs(1)), i64::MAX);
    }
}
