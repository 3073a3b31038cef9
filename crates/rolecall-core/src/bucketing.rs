//! Timezone-aware day/month bucket keys
//!
//! Buckets are civil dates in the user's IANA zone, derived with chrono-tz so
//! historical offsets and DST transitions come out right. Names are validated
//! at the profile-write boundary with [`parse_timezone`]; stored names go
//! through [`resolve_timezone`], which never fails.

use crate::error::CoreError;
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Parse an IANA zone name, rejecting unknown names
pub fn parse_timezone(name: &str) -> Result<Tz, CoreError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CoreError::InvalidTimezone {
            name: name.to_string(),
        })
}

/// Zone for a stored name; unknown names fall back to UTC
pub fn resolve_timezone(name: &str) -> Tz {
    match parse_timezone(name) {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = name, "Unknown stored timezone, using UTC");
            Tz::UTC
        }
    }
}

/// Civil date of `instant` in `tz` as `YYYY-MM-DD`
pub fn day_key(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%Y-%m-%d").to_string()
}

/// Civil month of `instant` in `tz` as `YYYY-MM`
pub fn month_key(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%Y-%m").to_string()
}

/// Instant at which the next local day starts.
///
/// Zones that skip midnight on a DST change start the day at the first valid
/// local time after 00:00; ambiguous midnights use the earlier instant.
pub fn next_day_start(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_date = instant.with_timezone(&tz).date_naive();
    let Some(midnight) = local_date
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return instant + Duration::days(1);
    };

    for hours in 0..=3 {
        if let Some(start) = earliest_local(tz, midnight + Duration::hours(hours)) {
            return start;
        }
    }

    instant + Duration::days(1)
}

fn earliest_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Label shown next to the remaining allowance, e.g. `2026-10-20 00:00 Europe/Paris`
pub fn next_daily_reset_label(instant: DateTime<Utc>, tz: Tz) -> String {
    let reset = next_day_start(instant, tz).with_timezone(&tz);
    format!("{} {}", reset.format("%Y-%m-%d %H:%M"), tz.name())
}
