// SPDX-License-Identifier: MIT
//! Event timestamp normalization.
//!
//! The ad-attribution API accepts event times within a fixed window: no older
//! than 7 days and no more than 60 seconds in the future. Anything outside the
//! window is silently replaced with "now" rather than rejected — a clamped
//! event is worth more than a dropped one.

use chrono::{DateTime, Duration, Utc};

/// Oldest accepted event age.
const MAX_AGE_DAYS: i64 = 7;
/// Clock-skew allowance for timestamps slightly ahead of the server.
const MAX_FUTURE_SECS: i64 = 60;

/// Clamp `event_time` to the acceptance window around `now`, returning Unix
/// seconds ready for the wire.
pub fn normalize(event_time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let oldest = now - Duration::days(MAX_AGE_DAYS);
    let newest = now + Duration::seconds(MAX_FUTURE_SECS);
    if event_time < oldest || event_time > newest {
        now.timestamp()
    } else {
        event_time.timestamp()
    }
}

/// [`normalize`] against the current wall clock.
pub fn normalize_now(event_time: DateTime<Utc>) -> i64 {
    normalize(event_time, Utc::now())
}
