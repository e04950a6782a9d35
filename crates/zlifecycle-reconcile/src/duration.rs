// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run duration calculation.

use chrono::{DateTime, Utc};

/// Duration reported while a run is in progress or its timestamps are unusable.
pub const UNKNOWN_DURATION: i64 = -1;

/// Milliseconds between `start` and `end`.
///
/// Returns [`UNKNOWN_DURATION`] when either timestamp is missing or `end`
/// precedes `start`. Consumers treat `-1` as "no data", not as an error.
pub fn duration_ms(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> i64 {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => (end - start).num_milliseconds(),
        _ => UNKNOWN_DURATION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_elapsed_milliseconds() {
        assert_eq!(
            duration_ms(Some(t0()), Some(t0() + Duration::milliseconds(5000))),
            5000
        );
    }

    #[test]
    fn test_zero_length_run() {
        assert_eq!(duration_ms(Some(t0()), Some(t0())), 0);
    }

    #[test]
    fn test_missing_timestamps_are_unknown() {
        assert_eq!(duration_ms(Some(t0()), None), UNKNOWN_DURATION);
        assert_eq!(duration_ms(None, Some(t0())), UNKNOWN_DURATION);
        assert_eq!(duration_ms(None, None), UNKNOWN_DURATION);
    }

    #[test]
    fn test_end_before_start_is_unknown() {
        assert_eq!(
            duration_ms(Some(t0()), Some(t0() - Duration::seconds(1))),
            UNKNOWN_DURATION
        );
    }
}
