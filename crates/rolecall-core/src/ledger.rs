//! Usage ledger: raw session seconds → billed, bucketed usage
//!
//! Billing always rounds down to the increment. Today/month aggregates are
//! rounded after summation, so many short sessions still add up; the
//! per-session history keeps each session's own rounded value, so past
//! totals never change retroactively.

use crate::bucketing::{day_key, month_key};
use crate::models::{UsageSession, UsageSummary};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Default billing granularity in seconds
pub const DEFAULT_BILLING_INCREMENT_SECONDS: i64 = 60;

/// Billing rules for one increment size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageLedger {
    increment_seconds: i64,
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new(DEFAULT_BILLING_INCREMENT_SECONDS)
    }
}

/// One row of a user's session history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BilledSession {
    pub session_id: String,
    pub ended_at: DateTime<Utc>,
    pub raw_seconds: i64,
    pub billed_seconds: i64,
}

/// Per-session history plus its display total
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    pub sessions: Vec<BilledSession>,
    /// Sum of per-session billed values
    pub total_billed_seconds: i64,
}

impl UsageLedger {
    /// Increments below one second are raised to one
    pub fn new(increment_seconds: i64) -> Self {
        Self {
            increment_seconds: increment_seconds.max(1),
        }
    }

    pub fn increment_seconds(&self) -> i64 {
        self.increment_seconds
    }

    /// `floor(max(0, raw) / increment) * increment`
    pub fn billed_seconds(&self, raw_seconds: i64) -> i64 {
        let raw = raw_seconds.max(0);
        (raw / self.increment_seconds) * self.increment_seconds
    }

    /// Sum of clamped raw seconds
    pub fn aggregate_raw_seconds<'a, I>(&self, sessions: I) -> i64
    where
        I: IntoIterator<Item = &'a UsageSession>,
    {
        sessions
            .into_iter()
            .map(UsageSession::clamped_raw_seconds)
            .fold(0i64, |acc, s| acc.saturating_add(s))
    }

    /// Today/month usage for a user, bucketed on each session's `ended_at`
    pub fn usage_for_user(
        &self,
        sessions: &[UsageSession],
        user_id: &str,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> UsageSummary {
        self.summarize(sessions.iter().filter(|s| s.user_id == user_id), now, tz)
    }

    /// Org-wide billed seconds for the current day, billed on the aggregate
    pub fn org_billed_today(
        &self,
        sessions: &[UsageSession],
        org_id: &str,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> i64 {
        let today = day_key(now, tz);
        let raw = self.aggregate_raw_seconds(
            sessions
                .iter()
                .filter(|s| s.org_id.as_deref() == Some(org_id))
                .filter(|s| day_key(s.ended_at, tz) == today),
        );
        self.billed_seconds(raw)
    }

    /// A user's sessions, newest first, each billed on its own
    pub fn session_history(&self, sessions: &[UsageSession], user_id: &str) -> SessionHistory {
        let mut rows: Vec<BilledSession> = sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| {
                let raw_seconds = s.clamped_raw_seconds();
                BilledSession {
                    session_id: s.id.clone(),
                    ended_at: s.ended_at,
                    raw_seconds,
                    billed_seconds: self.billed_seconds(raw_seconds),
                }
            })
            .collect();
        rows.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));

        let total_billed_seconds = rows.iter().map(|r| r.billed_seconds).sum();
        SessionHistory {
            sessions: rows,
            total_billed_seconds,
        }
    }

    fn summarize<'a, I>(&self, sessions: I, now: DateTime<Utc>, tz: Tz) -> UsageSummary
    where
        I: Iterator<Item = &'a UsageSession>,
    {
        let today = day_key(now, tz);
        let this_month = month_key(now, tz);

        let mut raw_today = 0i64;
        let mut raw_month = 0i64;
        for session in sessions {
            // day keys share the month prefix, so a day match implies a month match
            let session_month = month_key(session.ended_at, tz);
            if session_month != this_month {
                continue;
            }
            let raw = session.clamped_raw_seconds();
            raw_month = raw_month.saturating_add(raw);
            if day_key(session.ended_at, tz) == today {
                raw_today = raw_today.saturating_add(raw);
            }
        }

        UsageSummary {
            raw_today,
            billed_today: self.billed_seconds(raw_today),
            raw_month,
            billed_month: self.billed_seconds(raw_month),
            day_key: today,
            month_key: this_month,
        }
    }
}
