//! Usage session records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed roleplay session, as recorded by the session endpoint.
///
/// Sessions are append-only: never mutated, never deleted by this crate.
/// `raw_duration_seconds` is kept as a JSON number so corrupt historical
/// input (negative, fractional) still loads; the ledger clamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSession {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub raw_duration_seconds: f64,
}

impl UsageSession {
    /// Raw seconds with corrupt values (negative, fractional, NaN) clamped
    pub fn clamped_raw_seconds(&self) -> i64 {
        clamp_raw_seconds(self.raw_duration_seconds)
    }
}

/// `max(0, floor(raw))`, non-finite input counts as zero
pub fn clamp_raw_seconds(raw: f64) -> i64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }
    raw.floor() as i64
}

/// Input accepted by the session-recording endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUsageSession {
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Defaults to `ended_at - started_at` when omitted
    #[serde(default)]
    pub raw_duration_seconds: Option<f64>,
}
