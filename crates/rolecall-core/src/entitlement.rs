//! Entitlement resolution
//!
//! Combines tier, enterprise org quota, manual bonus pools and the usage
//! ledger into one decision. Lock reasons are checked in a fixed order and the
//! first applicable one wins:
//!
//! 1. user disabled
//! 2. enterprise org missing or disabled
//! 3. enterprise quota exhausted (org pool before per-user cap)
//! 4. individual tier limit reached
//!
//! Resolution is pure and never fails: dangling org ids and corrupt negative
//! quotas degrade to a locked or clamped result.

use crate::bucketing::{next_daily_reset_label, resolve_timezone};
use crate::ledger::UsageLedger;
use crate::models::{
    EnterpriseOrg, EntitlementDecision, EntitlementSnapshot, LockReason, TierDefinition,
    UsageSession, UsageSnapshot, UsageSummary, UserProfile,
};
use crate::renewal::{next_renewal, period_bounds, BillingPeriod, PeriodBounds};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

/// Apply a due pending-timezone change.
///
/// Returns the updated profile and whether anything changed. The caller is
/// responsible for persisting the result through a commit; this is the only
/// place a timezone change takes effect. Applying it twice is a no-op.
pub fn materialize(user: &UserProfile, now: DateTime<Utc>) -> (UserProfile, bool) {
    let mut next = user.clone();
    match (&user.pending_timezone, user.pending_timezone_effective_at) {
        (Some(pending), effective_at) if effective_at.is_none_or(|at| at <= now) => {
            if crate::bucketing::parse_timezone(pending).is_ok() {
                next.timezone = pending.clone();
            } else {
                warn!(user_id = %user.id, timezone = %pending, "Dropping invalid pending timezone");
            }
            next.pending_timezone = None;
            next.pending_timezone_effective_at = None;
            (next, true)
        }
        (None, Some(_)) => {
            next.pending_timezone_effective_at = None;
            (next, true)
        }
        _ => (next, false),
    }
}

/// Negative quotas from corrupt records count as zero
fn clamp_quota(seconds: i64) -> i64 {
    seconds.max(0)
}

/// Records the resolver reads for one user
#[derive(Debug, Clone, Copy)]
pub struct EntitlementInput<'a> {
    /// Already materialized
    pub user: &'a UserProfile,
    pub org: Option<&'a EnterpriseOrg>,
    pub tier: &'a TierDefinition,
    pub sessions: &'a [UsageSession],
    pub now: DateTime<Utc>,
}

/// Decision plus the intermediate values the snapshot reports
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: EntitlementDecision,
    pub usage: UsageSummary,
    pub timezone: Tz,
}

/// Resolver bound to one billing increment
#[derive(Debug, Clone, Copy, Default)]
pub struct EntitlementResolver {
    ledger: UsageLedger,
}

impl EntitlementResolver {
    pub fn new(ledger: UsageLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Pure quota math once billed usage is known
    pub fn decide(
        user: &UserProfile,
        org: Option<&EnterpriseOrg>,
        tier: &TierDefinition,
        user_billed_today: i64,
        org_billed_today: i64,
    ) -> EntitlementDecision {
        let mut decision = if user.is_enterprise() {
            Self::enterprise_decision(user, org, user_billed_today, org_billed_today)
        } else {
            Self::individual_decision(user, tier, user_billed_today)
        };

        if !user.status.is_active() {
            decision.daily_seconds_remaining = Some(0);
            decision.lock_reason = Some(LockReason::UserDisabled);
        }
        decision.can_start_simulation = user.status.is_active() && decision.lock_reason.is_none();
        decision
    }

    fn enterprise_decision(
        user: &UserProfile,
        org: Option<&EnterpriseOrg>,
        user_billed_today: i64,
        org_billed_today: i64,
    ) -> EntitlementDecision {
        let Some(org) = org.filter(|o| o.status.is_active()) else {
            return EntitlementDecision {
                daily_seconds_limit: None,
                org_daily_seconds_quota: None,
                per_user_daily_seconds_cap: None,
                daily_seconds_remaining: Some(0),
                lock_reason: Some(LockReason::EnterpriseInactive),
                can_start_simulation: false,
            };
        };

        let org_quota = clamp_quota(org.daily_seconds_quota)
            .saturating_add(clamp_quota(org.manual_bonus_seconds));
        let per_user_cap = clamp_quota(org.per_user_daily_seconds_cap)
            .saturating_add(clamp_quota(user.manual_bonus_seconds));

        let org_remaining = (org_quota - org_billed_today.max(0)).max(0);
        let user_remaining = (per_user_cap - user_billed_today.max(0)).max(0);
        let remaining = org_remaining.min(user_remaining);

        let lock_reason = if remaining > 0 {
            None
        } else if org_remaining == 0 {
            Some(LockReason::OrgQuotaReached)
        } else {
            Some(LockReason::UserQuotaReached)
        };

        EntitlementDecision {
            daily_seconds_limit: Some(per_user_cap),
            org_daily_seconds_quota: Some(org_quota),
            per_user_daily_seconds_cap: Some(per_user_cap),
            daily_seconds_remaining: Some(remaining),
            lock_reason,
            can_start_simulation: false,
        }
    }

    fn individual_decision(
        user: &UserProfile,
        tier: &TierDefinition,
        user_billed_today: i64,
    ) -> EntitlementDecision {
        let Some(tier_limit) = tier.daily_seconds_limit else {
            return EntitlementDecision {
                daily_seconds_limit: None,
                org_daily_seconds_quota: None,
                per_user_daily_seconds_cap: None,
                daily_seconds_remaining: None,
                lock_reason: None,
                can_start_simulation: false,
            };
        };

        let limit = clamp_quota(tier_limit).saturating_add(clamp_quota(user.manual_bonus_seconds));
        let remaining = (limit - user_billed_today.max(0)).max(0);

        EntitlementDecision {
            daily_seconds_limit: Some(limit),
            org_daily_seconds_quota: None,
            per_user_daily_seconds_cap: None,
            daily_seconds_remaining: Some(remaining),
            lock_reason: (remaining == 0).then_some(LockReason::DailyPlanLimitReached),
            can_start_simulation: false,
        }
    }

    /// Bucket usage in the user's zone and decide
    pub fn evaluate(&self, input: EntitlementInput<'_>) -> Evaluation {
        let timezone = resolve_timezone(&input.user.timezone);
        let usage = self
            .ledger
            .usage_for_user(input.sessions, &input.user.id, input.now, timezone);

        let org_billed_today = input
            .org
            .map(|org| {
                self.ledger
                    .org_billed_today(input.sessions, &org.id, input.now, timezone)
            })
            .unwrap_or(0);

        let decision = Self::decide(
            input.user,
            input.org,
            input.tier,
            usage.billed_today,
            org_billed_today,
        );

        debug!(
            user_id = %input.user.id,
            billed_today = usage.billed_today,
            org_billed_today,
            remaining = ?decision.daily_seconds_remaining,
            lock = ?decision.lock_reason,
            "Entitlement resolved"
        );

        Evaluation {
            decision,
            usage,
            timezone,
        }
    }

    pub fn resolve(&self, input: EntitlementInput<'_>) -> EntitlementDecision {
        self.evaluate(input).decision
    }

    /// Full `GET /entitlements` body
    pub fn snapshot(&self, input: EntitlementInput<'_>) -> EntitlementSnapshot {
        let Evaluation {
            decision,
            usage,
            timezone,
        } = self.evaluate(input);
        let (_, bounds) = renewal_bounds(input.user, input.org, input.now);

        EntitlementSnapshot {
            daily_seconds_limit: decision.daily_seconds_limit,
            org_daily_seconds_quota: decision.org_daily_seconds_quota,
            per_user_daily_seconds_cap: decision.per_user_daily_seconds_cap,
            manual_bonus_seconds: clamp_quota(input.user.manual_bonus_seconds),
            billing_increment_seconds: self.ledger.increment_seconds(),
            usage: UsageSnapshot {
                raw_seconds_today: usage.raw_today,
                billed_seconds_today: usage.billed_today,
                raw_seconds_this_month: usage.raw_month,
                billed_seconds_this_month: usage.billed_month,
                day_key: usage.day_key,
                month_key: usage.month_key,
                daily_seconds_remaining: decision.daily_seconds_remaining,
                timezone_used: timezone.name().to_string(),
                next_daily_reset_label: next_daily_reset_label(input.now, timezone),
                next_renewal_at: bounds.next_renewal_at,
            },
            can_start_simulation: decision.can_start_simulation,
            lock_reason: decision.lock_reason,
        }
    }
}

/// Renewal cadence for a user: enterprise members renew annually from the
/// org's creation, everyone else monthly from their own plan anchor.
pub fn renewal_bounds(
    user: &UserProfile,
    org: Option<&EnterpriseOrg>,
    now: DateTime<Utc>,
) -> (BillingPeriod, PeriodBounds) {
    match org.filter(|_| user.is_enterprise()) {
        Some(org) => {
            let period = BillingPeriod::Annual;
            (period, period_bounds(org.created_at, now, period.months()))
        }
        None => {
            let period = BillingPeriod::Monthly;
            (period, period_bounds(user.plan_anchor_at, now, period.months()))
        }
    }
}

/// Next renewal instant for a user, see [`renewal_bounds`]
pub fn next_renewal_for(
    user: &UserProfile,
    org: Option<&EnterpriseOrg>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match org.filter(|_| user.is_enterprise()) {
        Some(org) => next_renewal(org.created_at, now, BillingPeriod::Annual.months()),
        None => next_renewal(user.plan_anchor_at, now, BillingPeriod::Monthly.months()),
    }
}
