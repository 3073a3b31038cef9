//! Anchor-preserving renewal clock
//!
//! Every renewal instant is `anchor + k * period` months, always computed from
//! the anchor itself. Month addition keeps the anchor's time of day and clamps
//! the day to the target month's last day, so an anchor on the 31st lands on
//! the 30th in a 30-day month and is back on the 31st the month after.

use chrono::{DateTime, Datelike, Months, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

impl BillingPeriod {
    pub fn months(self) -> u32 {
        match self {
            BillingPeriod::Monthly => 1,
            BillingPeriod::Annual => 12,
        }
    }
}

/// Current billing period around an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodBounds {
    pub period_start_at: DateTime<Utc>,
    pub period_end_at: DateTime<Utc>,
    pub next_renewal_at: DateTime<Utc>,
}

/// `anchor` shifted by `months` calendar months (negative = backwards).
///
/// Saturates at chrono's representable range.
pub fn shift_months(anchor: DateTime<Utc>, months: i64) -> DateTime<Utc> {
    let magnitude = u32::try_from(months.unsigned_abs()).unwrap_or(u32::MAX);
    let shifted = if months >= 0 {
        anchor.checked_add_months(Months::new(magnitude))
    } else {
        anchor.checked_sub_months(Months::new(magnitude))
    };
    shifted.unwrap_or(if months >= 0 {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// Index `k` of the first `anchor + k*period` strictly after `now`.
///
/// Negative when the anchor is still more than one period ahead of `now`.
fn renewal_index(anchor: DateTime<Utc>, now: DateTime<Utc>, period_months: u32) -> i64 {
    let period = i64::from(period_months.max(1));
    let month_diff = i64::from(now.year() - anchor.year()) * 12
        + i64::from(now.month()) - i64::from(anchor.month());

    // Start one period below the estimate, then settle on the last k <= now
    let mut k = month_diff.div_euclid(period) - 1;
    while shift_months(anchor, k * period) > now {
        k -= 1;
    }
    while shift_months(anchor, k * period) <= now {
        k += 1;
    }
    k
}

/// First `anchor + k*period` (k >= 0) strictly after `now`
pub fn next_renewal(anchor: DateTime<Utc>, now: DateTime<Utc>, period_months: u32) -> DateTime<Utc> {
    let k = renewal_index(anchor, now, period_months).max(0);
    shift_months(anchor, k * i64::from(period_months.max(1)))
}

/// Billing period containing `now` for an arbitrary period length.
///
/// `period_start_at <= now < period_end_at` holds for every anchor. A plan
/// whose anchor is still ahead gets the anchor's cadence projected backwards,
/// and its `next_renewal_at` is the anchor itself.
pub fn period_bounds(anchor: DateTime<Utc>, now: DateTime<Utc>, period_months: u32) -> PeriodBounds {
    let period = i64::from(period_months.max(1));
    let k = renewal_index(anchor, now, period_months);
    PeriodBounds {
        period_start_at: shift_months(anchor, (k - 1) * period),
        period_end_at: shift_months(anchor, k * period),
        next_renewal_at: shift_months(anchor, k.max(0) * period),
    }
}

pub fn annual_period_bounds(anchor: DateTime<Utc>, now: DateTime<Utc>) -> PeriodBounds {
    period_bounds(anchor, now, BillingPeriod::Annual.months())
}

pub fn monthly_period_bounds(anchor: DateTime<Utc>, now: DateTime<Utc>) -> PeriodBounds {
    period_bounds(anchor, now, BillingPeriod::Monthly.months())
}
