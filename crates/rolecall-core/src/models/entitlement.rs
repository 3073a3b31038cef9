//! Derived entitlement and update payload types (never persisted)

use super::config::ScopedConfig;
use super::user::UserView;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Why a user may not start a new simulation.
///
/// Variants are listed in precedence order; the resolver returns the first
/// one that applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    UserDisabled,
    EnterpriseInactive,
    OrgQuotaReached,
    UserQuotaReached,
    DailyPlanLimitReached,
}

impl LockReason {
    /// Human-readable message shown by the clients
    pub fn message(self) -> &'static str {
        match self {
            LockReason::UserDisabled => "User account is disabled.",
            LockReason::EnterpriseInactive => "Enterprise account is not currently active.",
            LockReason::OrgQuotaReached => "Organization daily quota reached.",
            LockReason::UserQuotaReached => "User daily quota reached.",
            LockReason::DailyPlanLimitReached => "Daily plan limit reached.",
        }
    }
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl Serialize for LockReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message())
    }
}

/// Usage aggregates for a user's current day and month buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub raw_today: i64,
    pub billed_today: i64,
    pub raw_month: i64,
    pub billed_month: i64,
    pub day_key: String,
    pub month_key: String,
}

/// Output of the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementDecision {
    pub daily_seconds_limit: Option<i64>,
    pub org_daily_seconds_quota: Option<i64>,
    pub per_user_daily_seconds_cap: Option<i64>,
    /// None = unlimited
    pub daily_seconds_remaining: Option<i64>,
    pub lock_reason: Option<LockReason>,
    pub can_start_simulation: bool,
}

/// `usage` block of the entitlement response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub raw_seconds_today: i64,
    pub billed_seconds_today: i64,
    pub raw_seconds_this_month: i64,
    pub billed_seconds_this_month: i64,
    pub day_key: String,
    pub month_key: String,
    pub daily_seconds_remaining: Option<i64>,
    pub timezone_used: String,
    pub next_daily_reset_label: String,
    pub next_renewal_at: DateTime<Utc>,
}

/// `GET /entitlements` response body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSnapshot {
    pub daily_seconds_limit: Option<i64>,
    pub org_daily_seconds_quota: Option<i64>,
    pub per_user_daily_seconds_cap: Option<i64>,
    pub manual_bonus_seconds: i64,
    pub billing_increment_seconds: i64,
    pub usage: UsageSnapshot,
    pub can_start_simulation: bool,
    pub lock_reason: Option<LockReason>,
}

/// Everything a client needs after a change: profile, scoped config, entitlements
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub user: UserView,
    pub config: ScopedConfig,
    pub entitlements: EntitlementSnapshot,
    pub generated_at: DateTime<Utc>,
}
