//! Metering service
//!
//! Owns the store, the update bus and the resolver, and is shared by `Arc`
//! with every request handler. All writes go through
//! [`TransactionalStore::commit_with`]; notifications are published from the
//! committed state while the write slot is still held, so a user's cursor
//! order always matches commit order.

use crate::bucketing::{next_day_start, parse_timezone, resolve_timezone};
use crate::config::MeterConfig;
use crate::entitlement::{materialize, renewal_bounds, EntitlementInput, EntitlementResolver};
use crate::error::{CoreError, CoreResult};
use crate::ledger::{SessionHistory, UsageLedger};
use crate::models::{
    AccountType, ConfigPatch, Database, EnterpriseOrg, EntitlementSnapshot, GlobalConfig,
    NewUsageSession, OrgPatch, OrgSummary, ScopedConfig, TierDefinition, UpdatePayload,
    UsageSession, UserPatch, UserProfile, UserView,
};
use crate::renewal::BillingPeriod;
use crate::store::{JsonFilePersistence, TransactionalStore};
use crate::update_bus::UpdateBus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Notification reasons carried by the update bus
pub mod reasons {
    pub const TIMEZONE_APPLIED: &str = "timezone_applied";
    pub const USAGE_RECORDED: &str = "usage_recorded";
    pub const ORG_UPDATED: &str = "org_updated";
    pub const PROFILE_UPDATED: &str = "profile_updated";
    pub const CONFIG_UPDATED: &str = "config_updated";
}

/// Response to a recorded session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReceipt {
    pub session: UsageSession,
    /// This session billed on its own
    pub billed_seconds: i64,
    /// Remaining allowance before the session was recorded (None = unlimited)
    pub previous_remaining: Option<i64>,
    pub entitlements: EntitlementSnapshot,
    pub cursor: u64,
}

/// Long-poll response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub cursor: u64,
    pub changed: bool,
    pub reason: Option<String>,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ScopedConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlements: Option<EntitlementSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalInfo {
    pub user_id: String,
    pub period: BillingPeriod,
    pub period_start_at: DateTime<Utc>,
    pub period_end_at: DateTime<Utc>,
    pub next_renewal_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub users: usize,
    pub orgs: usize,
    pub sessions: usize,
    pub waiting_polls: usize,
}

pub struct MeterService {
    store: TransactionalStore,
    bus: UpdateBus<UpdatePayload>,
    resolver: EntitlementResolver,
    config: MeterConfig,
}

impl MeterService {
    pub fn new(store: TransactionalStore, config: MeterConfig) -> Self {
        let resolver =
            EntitlementResolver::new(UsageLedger::new(config.billing_increment_seconds));
        Self {
            store,
            bus: UpdateBus::new(config.long_poll.clone()),
            resolver,
            config,
        }
    }

    /// Open the JSON document at `config.data_path`
    pub fn open(config: MeterConfig) -> CoreResult<Self> {
        config.validate()?;
        let store = TransactionalStore::open(JsonFilePersistence::new(&config.data_path))?;
        info!(path = %config.data_path.display(), "Metering service ready");
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> &TransactionalStore {
        &self.store
    }

    pub fn bus(&self) -> &UpdateBus<UpdatePayload> {
        &self.bus
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    // ===================
    // Reads
    // ===================

    /// Current entitlements, applying a due timezone change first
    pub async fn entitlements(&self, user_id: &str, now: DateTime<Utc>) -> CoreResult<EntitlementSnapshot> {
        let db = self.store.snapshot();
        let user = db.user(user_id).ok_or_else(|| user_not_found(user_id))?;

        let (_, due) = materialize(user, now);
        if !due {
            return Ok(self.payload_for(&db, user, now).entitlements);
        }

        let entitlements = self
            .store
            .commit_with(
                |draft| {
                    let user = draft
                        .users
                        .get_mut(user_id)
                        .ok_or_else(|| user_not_found(user_id))?;
                    let (next, changed) = materialize(user, now);
                    *user = next;
                    Ok(changed)
                },
                |db, applied| {
                    let user = db.user(user_id)?;
                    let payload = self.payload_for(db, user, now);
                    let entitlements = payload.entitlements.clone();
                    if applied {
                        info!(user_id, timezone = %user.timezone, "Pending timezone applied");
                        self.bus.notify(user_id, reasons::TIMEZONE_APPLIED, payload);
                    }
                    Some(entitlements)
                },
            )
            .await?;

        entitlements.ok_or_else(|| user_not_found(user_id))
    }

    /// Per-session billed history, newest first
    pub fn usage_history(&self, user_id: &str) -> CoreResult<SessionHistory> {
        let db = self.store.snapshot();
        db.user(user_id).ok_or_else(|| user_not_found(user_id))?;
        Ok(self.resolver.ledger().session_history(&db.sessions, user_id))
    }

    pub fn renewal(&self, user_id: &str, now: DateTime<Utc>) -> CoreResult<RenewalInfo> {
        let db = self.store.snapshot();
        let user = db.user(user_id).ok_or_else(|| user_not_found(user_id))?;
        let (period, bounds) = renewal_bounds(user, db.org_for(user), now);
        Ok(RenewalInfo {
            user_id: user.id.clone(),
            period,
            period_start_at: bounds.period_start_at,
            period_end_at: bounds.period_end_at,
            next_renewal_at: bounds.next_renewal_at,
        })
    }

    pub fn health(&self) -> HealthStatus {
        let db = self.store.snapshot();
        HealthStatus {
            status: "healthy",
            users: db.users.len(),
            orgs: db.orgs.len(),
            sessions: db.sessions.len(),
            waiting_polls: self.bus.total_waiters(),
        }
    }

    // ===================
    // Writes
    // ===================

    /// Append a finished session and push fresh entitlements to the user and,
    /// for enterprise members, to the rest of the org.
    ///
    /// Sessions are recorded even when the user is already locked.
    pub async fn record_session(&self, input: NewUsageSession, now: DateTime<Utc>) -> CoreResult<SessionReceipt> {
        let raw_duration_seconds = validate_session(&input)?;
        let resolver = self.resolver;

        let (session, previous_remaining, published) = self
            .store
            .commit_with(
                |draft| {
                    let user = draft
                        .users
                        .get(&input.user_id)
                        .ok_or_else(|| user_not_found(&input.user_id))?;
                    let (user, changed) = materialize(user, now);
                    let tier = tier_for(draft, &user);
                    let previous = resolver
                        .resolve(EntitlementInput {
                            user: &user,
                            org: draft.org_for(&user),
                            tier: &tier,
                            sessions: &draft.sessions,
                            now,
                        })
                        .daily_seconds_remaining;

                    let org_id = user.enterprise_org_id().map(str::to_string);
                    let org_members = org_id
                        .as_deref()
                        .map(|id| draft.org_member_ids(id))
                        .unwrap_or_default();

                    let session = UsageSession {
                        id: uuid::Uuid::new_v4().to_string(),
                        user_id: user.id.clone(),
                        org_id,
                        started_at: input.started_at,
                        ended_at: input.ended_at,
                        raw_duration_seconds,
                    };
                    draft.sessions.push(session.clone());
                    if changed {
                        draft.users.insert(user.id.clone(), user);
                    }
                    Ok((session, previous, org_members))
                },
                |db, (session, previous, org_members)| {
                    let published = self.notify_user(db, &session.user_id, reasons::USAGE_RECORDED, now);

                    // org billed-today moved for every other member too
                    let others: Vec<String> = org_members
                        .into_iter()
                        .filter(|id| *id != session.user_id)
                        .collect();
                    self.fan_out(db, &others, reasons::USAGE_RECORDED, now);
                    (session, previous, published)
                },
            )
            .await?;
        let (cursor, entitlements) =
            published.ok_or_else(|| user_not_found(&session.user_id))?;

        let billed_seconds = self
            .resolver
            .ledger()
            .billed_seconds(session.clamped_raw_seconds());
        info!(
            user_id = %session.user_id,
            session_id = %session.id,
            raw = session.clamped_raw_seconds(),
            billed = billed_seconds,
            "Usage session recorded"
        );

        Ok(SessionReceipt {
            session,
            billed_seconds,
            previous_remaining,
            entitlements,
            cursor,
        })
    }

    pub async fn update_org(&self, org_id: &str, patch: OrgPatch, now: DateTime<Utc>) -> CoreResult<EnterpriseOrg> {
        for (field, value) in [
            ("dailySecondsQuota", patch.daily_seconds_quota),
            ("perUserDailySecondsCap", patch.per_user_daily_seconds_cap),
            ("manualBonusSeconds", patch.manual_bonus_seconds),
        ] {
            if value.is_some_and(|v| v < 0) {
                return Err(CoreError::invalid_field(field, "must not be negative"));
            }
        }

        let (org, members) = self
            .store
            .commit_with(
                |draft| {
                    let org = draft.orgs.get_mut(org_id).ok_or_else(|| CoreError::OrgNotFound {
                        org_id: org_id.to_string(),
                    })?;
                    if let Some(name) = patch.name {
                        org.name = name;
                    }
                    if let Some(status) = patch.status {
                        org.status = status;
                    }
                    if let Some(quota) = patch.daily_seconds_quota {
                        org.daily_seconds_quota = quota;
                    }
                    if let Some(cap) = patch.per_user_daily_seconds_cap {
                        org.per_user_daily_seconds_cap = cap;
                    }
                    if let Some(bonus) = patch.manual_bonus_seconds {
                        org.manual_bonus_seconds = bonus;
                    }
                    let org = org.clone();
                    Ok((org, draft.org_member_ids(org_id)))
                },
                |db, (org, members)| {
                    self.fan_out(db, &members, reasons::ORG_UPDATED, now);
                    (org, members)
                },
            )
            .await?;

        info!(org_id, members = members.len(), "Organization updated");
        Ok(org)
    }

    /// Admin edit of a user.
    ///
    /// Keeps `org_id` set exactly when the account is enterprise: switching to
    /// individual drops the link, switching to enterprise needs an existing org.
    pub async fn update_user(&self, user_id: &str, patch: UserPatch, now: DateTime<Utc>) -> CoreResult<UserProfile> {
        if patch.manual_bonus_seconds.is_some_and(|v| v < 0) {
            return Err(CoreError::invalid_field("manualBonusSeconds", "must not be negative"));
        }

        let user = self
            .store
            .commit_with(
                |draft| {
                    if let Some(tier) = patch.tier.as_deref() {
                        if draft.config.tier(tier).is_none() {
                            return Err(CoreError::UnknownTier {
                                tier: tier.to_string(),
                            });
                        }
                    }

                    let current = draft
                        .users
                        .get(user_id)
                        .ok_or_else(|| user_not_found(user_id))?;
                    let (mut user, _) = materialize(current, now);

                    let account_type = patch.account_type.unwrap_or(user.account_type);
                    user.org_id = match account_type {
                        AccountType::Individual => {
                            if patch.org_id.is_some() {
                                return Err(CoreError::invalid_field(
                                    "orgId",
                                    "individual accounts cannot belong to an organization",
                                ));
                            }
                            None
                        }
                        AccountType::Enterprise => {
                            let org_id = patch.org_id.clone().or(user.org_id.take()).ok_or_else(|| {
                                CoreError::invalid_field("orgId", "enterprise accounts require an organization")
                            })?;
                            if draft.org(&org_id).is_none() {
                                return Err(CoreError::OrgNotFound { org_id });
                            }
                            Some(org_id)
                        }
                    };
                    user.account_type = account_type;

                    if let Some(name) = patch.display_name {
                        user.display_name = name;
                    }
                    if let Some(tier) = patch.tier {
                        user.tier = tier;
                    }
                    if let Some(status) = patch.status {
                        user.status = status;
                    }
                    if let Some(bonus) = patch.manual_bonus_seconds {
                        user.manual_bonus_seconds = bonus;
                    }
                    if let Some(anchor) = patch.plan_anchor_at {
                        user.plan_anchor_at = anchor;
                    }

                    draft.users.insert(user.id.clone(), user.clone());
                    Ok(user)
                },
                |db, user| {
                    self.notify_user(db, user_id, reasons::PROFILE_UPDATED, now);
                    user
                },
            )
            .await?;

        info!(user_id, tier = %user.tier, status = ?user.status, "User updated");
        Ok(user)
    }

    /// Schedule a timezone change for the next local midnight of the zone the
    /// user is in now, so the current day's bucket is never split.
    ///
    /// Requesting the zone already in effect cancels a pending change.
    pub async fn request_timezone_change(
        &self,
        user_id: &str,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<UserProfile> {
        let requested = parse_timezone(timezone)?;

        let user = self
            .store
            .commit_with(
                |draft| {
                    let current = draft
                        .users
                        .get(user_id)
                        .ok_or_else(|| user_not_found(user_id))?;
                    let (mut user, _) = materialize(current, now);
                    let active = resolve_timezone(&user.timezone);

                    if active == requested {
                        user.pending_timezone = None;
                        user.pending_timezone_effective_at = None;
                    } else {
                        user.pending_timezone = Some(requested.name().to_string());
                        user.pending_timezone_effective_at = Some(next_day_start(now, active));
                    }
                    draft.users.insert(user.id.clone(), user.clone());
                    Ok(user)
                },
                |db, user| {
                    self.notify_user(db, user_id, reasons::PROFILE_UPDATED, now);
                    user
                },
            )
            .await?;

        info!(
            user_id,
            pending = ?user.pending_timezone,
            effective_at = ?user.pending_timezone_effective_at,
            "Timezone change scheduled"
        );
        Ok(user)
    }

    /// Edit the global config and push it to every user
    pub async fn update_config(&self, patch: ConfigPatch, now: DateTime<Utc>) -> CoreResult<GlobalConfig> {
        if let Some(tiers) = &patch.tiers {
            validate_tiers(tiers)?;
        }

        let (config, users) = self
            .store
            .commit_with(
                |draft| {
                    if let Some(tiers) = patch.tiers {
                        draft.config.tiers = tiers;
                    }
                    if let Some(email) = patch.support_email {
                        draft.config.support_email = Some(email).filter(|e| !e.is_empty());
                    }
                    if let Some(text) = patch.announcement {
                        draft.config.announcement = Some(text).filter(|t| !t.is_empty());
                    }
                    Ok((draft.config.clone(), draft.user_ids()))
                },
                |db, (config, users)| {
                    self.fan_out(db, &users, reasons::CONFIG_UPDATED, now);
                    (config, users)
                },
            )
            .await?;

        info!(users = users.len(), tiers = config.tiers.len(), "Global config updated");
        Ok(config)
    }

    // ===================
    // Long-poll
    // ===================

    /// Wait for a change after `since`; never holds the store's write slot.
    pub async fn poll_updates(
        &self,
        user_id: &str,
        since: u64,
        timeout_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> CoreResult<UpdateResponse> {
        self.store
            .snapshot()
            .user(user_id)
            .ok_or_else(|| user_not_found(user_id))?;

        let timeout = self.bus.clamp_timeout(timeout_ms);
        let event = self.bus.poll(user_id, since, timeout).await;

        let payload = match (event.changed, event.payload) {
            (true, Some(payload)) => Some(UpdatePayload::clone(&payload)),
            // resync before anything was published since startup
            (true, None) => {
                let db = self.store.snapshot();
                db.user(user_id).map(|user| {
                    let (user, _) = materialize(user, now);
                    self.payload_for(&db, &user, now)
                })
            }
            (false, _) => None,
        };

        debug!(user_id, since, cursor = event.cursor, changed = event.changed, "Poll answered");
        Ok(match payload {
            Some(payload) => UpdateResponse {
                cursor: event.cursor,
                changed: event.changed,
                reason: event.reason,
                generated_at: payload.generated_at,
                user: Some(payload.user),
                config: Some(payload.config),
                entitlements: Some(payload.entitlements),
            },
            None => UpdateResponse {
                cursor: event.cursor,
                changed: event.changed,
                reason: event.reason,
                generated_at: now,
                user: None,
                config: None,
                entitlements: None,
            },
        })
    }

    // ===================
    // Helpers
    // ===================

    fn payload_for(&self, db: &Database, user: &UserProfile, now: DateTime<Utc>) -> UpdatePayload {
        let org = db.org_for(user);
        let tier = tier_for(db, user);
        let entitlements = self.resolver.snapshot(EntitlementInput {
            user,
            org,
            tier: &tier,
            sessions: &db.sessions,
            now,
        });

        UpdatePayload {
            user: UserView::from(user),
            config: ScopedConfig {
                tier,
                org: org.map(OrgSummary::from),
                support_email: db.config.support_email.clone(),
                announcement: db.config.announcement.clone(),
                billing_increment_seconds: self.resolver.ledger().increment_seconds(),
            },
            entitlements,
            generated_at: now,
        }
    }

    /// Notify one user with a payload built from `db`; returns the new
    /// cursor and the entitlements that were sent.
    ///
    /// Payloads use the materialized profile; persisting a due timezone is
    /// left to that user's next entitlements read. Only call this from a
    /// commit hook so notifications follow commit order.
    fn notify_user(
        &self,
        db: &Database,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<(u64, EntitlementSnapshot)> {
        let (user, _) = materialize(db.user(user_id)?, now);
        let payload = self.payload_for(db, &user, now);
        let entitlements = payload.entitlements.clone();
        Some((self.bus.notify(&user.id, reason, payload), entitlements))
    }

    fn fan_out(&self, db: &Database, user_ids: &[String], reason: &str, now: DateTime<Utc>) {
        for id in user_ids {
            self.notify_user(db, id, reason, now);
        }
    }
}

fn user_not_found(user_id: &str) -> CoreError {
    CoreError::UserNotFound {
        user_id: user_id.to_string(),
    }
}

/// Tier record for a user; unknown ids get a zero-limit tier
fn tier_for(db: &Database, user: &UserProfile) -> TierDefinition {
    match db.config.tier(&user.tier) {
        Some(tier) => tier.clone(),
        None => {
            if !user.is_enterprise() {
                warn!(user_id = %user.id, tier = %user.tier, "Unknown tier, locking");
            }
            TierDefinition::fallback(&user.tier)
        }
    }
}

/// Check a new session and return its raw duration
fn validate_session(input: &NewUsageSession) -> CoreResult<f64> {
    if input.user_id.trim().is_empty() {
        return Err(CoreError::invalid_field("userId", "must not be empty"));
    }
    if input.ended_at < input.started_at {
        return Err(CoreError::InvalidSession {
            reason: "endedAt is before startedAt".to_string(),
        });
    }

    let raw = input.raw_duration_seconds.unwrap_or_else(|| {
        (input.ended_at - input.started_at).num_milliseconds() as f64 / 1000.0
    });
    if !raw.is_finite() || raw < 0.0 {
        return Err(CoreError::InvalidSession {
            reason: format!("rawDurationSeconds must be a non-negative number, got {raw}"),
        });
    }
    Ok(raw)
}

fn validate_tiers(tiers: &[TierDefinition]) -> CoreResult<()> {
    let mut seen = HashSet::new();
    for tier in tiers {
        if tier.id.trim().is_empty() {
            return Err(CoreError::invalid_field("tiers", "tier id must not be empty"));
        }
        if !seen.insert(tier.id.as_str()) {
            return Err(CoreError::invalid_field("tiers", format!("duplicate tier id {}", tier.id)));
        }
        if tier.daily_seconds_limit.is_some_and(|limit| limit < 0) {
            return Err(CoreError::invalid_field(
                "tiers",
                format!("tier {} has a negative daily limit", tier.id),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountStatus, LockReason};
    use crate::store::MemoryPersistence;
    use crate::update_bus::RESYNC_REASON;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap()
    }

    fn user(id: &str, tier: &str, org: Option<&str>) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            account_type: if org.is_some() {
                AccountType::Enterprise
            } else {
                AccountType::Individual
            },
            tier: tier.to_string(),
            org_id: org.map(String::from),
            timezone: "UTC".to_string(),
            pending_timezone: None,
            pending_timezone_effective_at: None,
            plan_anchor_at: Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap(),
            manual_bonus_seconds: 0,
            status: AccountStatus::Active,
        }
    }

    fn session(id: &str, user_id: &str, org: Option<&str>, raw: f64) -> UsageSession {
        UsageSession {
            id: id.to_string(),
            user_id: user_id.to_string(),
            org_id: org.map(String::from),
            started_at: now() - Duration::hours(2),
            ended_at: now() - Duration::hours(1),
            raw_duration_seconds: raw,
        }
    }

    fn seeded() -> Database {
        let mut db = Database::default();
        let mut ada = user("ada", "pro", None);
        ada.manual_bonus_seconds = 300;
        for u in [ada, user("bob", "enterprise", Some("acme")), user("cy", "enterprise", Some("acme"))] {
            db.users.insert(u.id.clone(), u);
        }
        db.orgs.insert(
            "acme".to_string(),
            EnterpriseOrg {
                id: "acme".to_string(),
                name: "Acme".to_string(),
                status: AccountStatus::Active,
                daily_seconds_quota: 28_800,
                per_user_daily_seconds_cap: 3_600,
                manual_bonus_seconds: 0,
                created_at: Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap(),
            },
        );
        db.sessions.push(session("s-0", "ada", None, 1_500.0));
        db
    }

    fn service_with(db: Database) -> (MeterService, Arc<MemoryPersistence>) {
        let persistence = Arc::new(MemoryPersistence::new(db));
        let store = TransactionalStore::open(Arc::clone(&persistence)).unwrap();
        (MeterService::new(store, MeterConfig::default()), persistence)
    }

    fn new_session(user_id: &str, seconds: i64) -> NewUsageSession {
        NewUsageSession {
            user_id: user_id.to_string(),
            started_at: now() - Duration::seconds(seconds),
            ended_at: now(),
            raw_duration_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_entitlements_bonus_scenario() {
        let (service, _) = service_with(seeded());
        let snapshot = service.entitlements("ada", now()).await.unwrap();
        assert_eq!(snapshot.daily_seconds_limit, Some(2_100));
        assert_eq!(snapshot.usage.daily_seconds_remaining, Some(600));
        assert!(snapshot.can_start_simulation);
    }

    #[tokio::test]
    async fn test_entitlements_unknown_user() {
        let (service, _) = service_with(seeded());
        let err = service.entitlements("ghost", now()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_record_session_returns_delta() {
        let (service, persistence) = service_with(seeded());
        let receipt = service.record_session(new_session("ada", 90), now()).await.unwrap();

        assert_eq!(receipt.billed_seconds, 60);
        assert_eq!(receipt.previous_remaining, Some(600));
        // 1500 + 90 raw, billed on the aggregate
        assert_eq!(receipt.entitlements.usage.billed_seconds_today, 1_560);
        assert_eq!(receipt.entitlements.usage.daily_seconds_remaining, Some(540));
        assert_eq!(receipt.cursor, 1);
        assert_eq!(persistence.saved().sessions.len(), 2);
        assert_eq!(service.bus().cursor("ada"), 1);
    }

    #[tokio::test]
    async fn test_record_session_rejects_bad_input() {
        let (service, persistence) = service_with(seeded());

        let mut backwards = new_session("ada", 60);
        backwards.ended_at = backwards.started_at - Duration::seconds(1);
        let err = service.record_session(backwards, now()).await.unwrap_err();
        assert!(err.is_validation());

        let mut negative = new_session("ada", 60);
        negative.raw_duration_seconds = Some(-5.0);
        assert!(service.record_session(negative, now()).await.unwrap_err().is_validation());

        let err = service.record_session(new_session("ghost", 60), now()).await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(persistence.save_count(), 0);
        assert_eq!(service.bus().cursor("ada"), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_does_not_notify() {
        let (service, persistence) = service_with(seeded());
        persistence.fail_next_save();

        let result = service.record_session(new_session("ada", 120), now()).await;
        assert!(matches!(result, Err(CoreError::PersistenceUnavailable(_))));
        assert_eq!(service.bus().cursor("ada"), 0);
        assert_eq!(service.store().snapshot().sessions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enterprise_usage_wakes_org_members() {
        let (service, _) = service_with(seeded());
        let service = Arc::new(service);

        let waiter = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.poll_updates("cy", 0, Some(25_000), now()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let receipt = service.record_session(new_session("bob", 600), now()).await.unwrap();
        assert_eq!(receipt.session.org_id.as_deref(), Some("acme"));

        let response = waiter.await.unwrap().unwrap();
        assert!(response.changed);
        assert_eq!(response.reason.as_deref(), Some(reasons::USAGE_RECORDED));
        let entitlements = response.entitlements.unwrap();
        // org pool moved, cy's own usage did not
        assert_eq!(entitlements.usage.billed_seconds_today, 0);
        assert_eq!(entitlements.usage.daily_seconds_remaining, Some(3_600));
        assert_eq!(service.bus().cursor("ada"), 0);
    }

    #[tokio::test]
    async fn test_org_quota_exhaustion_locks_members() {
        let mut db = seeded();
        for i in 0..8 {
            db.sessions.push(session(&format!("x-{i}"), "bob", Some("acme"), 3_600.0));
        }
        let (service, _) = service_with(db);

        let snapshot = service.entitlements("cy", now()).await.unwrap();
        assert!(!snapshot.can_start_simulation);
        assert_eq!(snapshot.lock_reason, Some(LockReason::OrgQuotaReached));

        let org = service
            .update_org(
                "acme",
                OrgPatch {
                    manual_bonus_seconds: Some(600),
                    ..OrgPatch::default()
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(org.manual_bonus_seconds, 600);
        assert_eq!(service.bus().cursor("cy"), 1);
        assert_eq!(service.bus().cursor("bob"), 1);

        let snapshot = service.entitlements("cy", now()).await.unwrap();
        assert!(snapshot.can_start_simulation);
        assert_eq!(snapshot.usage.daily_seconds_remaining, Some(600));
    }

    #[tokio::test]
    async fn test_update_org_validation() {
        let (service, _) = service_with(seeded());
        let err = service
            .update_org(
                "acme",
                OrgPatch {
                    daily_seconds_quota: Some(-1),
                    ..OrgPatch::default()
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = service.update_org("nope", OrgPatch::default(), now()).await.unwrap_err();
        assert!(matches!(err, CoreError::OrgNotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_user_keeps_org_invariant() {
        let (service, _) = service_with(seeded());

        let err = service
            .update_user(
                "ada",
                UserPatch {
                    account_type: Some(AccountType::Enterprise),
                    ..UserPatch::default()
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = service
            .update_user(
                "ada",
                UserPatch {
                    org_id: Some("acme".to_string()),
                    ..UserPatch::default()
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let bob = service
            .update_user(
                "bob",
                UserPatch {
                    account_type: Some(AccountType::Individual),
                    tier: Some("free".to_string()),
                    ..UserPatch::default()
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(bob.org_id, None);
        assert_eq!(service.bus().cursor("bob"), 1);

        let err = service
            .update_user(
                "ada",
                UserPatch {
                    tier: Some("platinum".to_string()),
                    ..UserPatch::default()
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownTier { .. }));
    }

    #[tokio::test]
    async fn test_disabling_user_locks_immediately() {
        let (service, _) = service_with(seeded());
        service
            .update_user(
                "ada",
                UserPatch {
                    status: Some(AccountStatus::Disabled),
                    ..UserPatch::default()
                },
                now(),
            )
            .await
            .unwrap();

        let payload = service.bus().latest_payload("ada").unwrap();
        assert_eq!(payload.entitlements.lock_reason, Some(LockReason::UserDisabled));
        assert_eq!(payload.entitlements.usage.daily_seconds_remaining, Some(0));
    }

    #[tokio::test]
    async fn test_timezone_change_applies_at_local_midnight() {
        let (service, persistence) = service_with(seeded());
        let user = service
            .request_timezone_change("ada", "Asia/Tokyo", now())
            .await
            .unwrap();
        assert_eq!(user.timezone, "UTC");
        assert_eq!(user.pending_timezone.as_deref(), Some("Asia/Tokyo"));
        assert_eq!(
            user.pending_timezone_effective_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 20, 0, 0, 0).unwrap())
        );

        // still UTC before midnight
        let snapshot = service.entitlements("ada", now()).await.unwrap();
        assert_eq!(snapshot.usage.timezone_used, "UTC");

        let later = Utc.with_ymd_and_hms(2026, 10, 20, 0, 30, 0).unwrap();
        let snapshot = service.entitlements("ada", later).await.unwrap();
        assert_eq!(snapshot.usage.timezone_used, "Asia/Tokyo");
        assert_eq!(snapshot.usage.day_key, "2026-10-20");

        let stored = persistence.saved();
        let ada = stored.user("ada").unwrap();
        assert_eq!(ada.timezone, "Asia/Tokyo");
        assert_eq!(ada.pending_timezone, None);

        let event = service.bus().poll("ada", 1, std::time::Duration::from_secs(1)).await;
        assert_eq!(event.reason.as_deref(), Some(reasons::TIMEZONE_APPLIED));
    }

    #[tokio::test]
    async fn test_invalid_timezone_rejected() {
        let (service, persistence) = service_with(seeded());
        let err = service
            .request_timezone_change("ada", "Mars/Olympus", now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimezone { .. }));
        assert_eq!(persistence.save_count(), 0);
    }

    #[tokio::test]
    async fn test_config_update_fans_out() {
        let (service, _) = service_with(seeded());
        let config = service
            .update_config(
                ConfigPatch {
                    announcement: Some("New scenarios available".to_string()),
                    ..ConfigPatch::default()
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(config.announcement.as_deref(), Some("New scenarios available"));

        for id in ["ada", "bob", "cy"] {
            assert_eq!(service.bus().cursor(id), 1);
            let payload = service.bus().latest_payload(id).unwrap();
            assert_eq!(payload.config.announcement.as_deref(), Some("New scenarios available"));
        }
    }

    #[tokio::test]
    async fn test_config_update_rejects_duplicate_tiers() {
        let (service, _) = service_with(seeded());
        let mut tiers = TierDefinition::defaults();
        tiers.push(TierDefinition::fallback("free"));
        let err = service
            .update_config(
                ConfigPatch {
                    tiers: Some(tiers),
                    ..ConfigPatch::default()
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_resync_after_restart_fills_payload() {
        let (service, _) = service_with(seeded());
        // client remembers a cursor from a previous process
        let response = service.poll_updates("ada", 7, Some(5_000), now()).await.unwrap();
        assert!(response.changed);
        assert_eq!(response.cursor, 0);
        assert_eq!(response.reason.as_deref(), Some(RESYNC_REASON));
        assert!(response.entitlements.is_some());
        assert_eq!(response.user.unwrap().id, "ada");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_is_not_an_error() {
        let (service, _) = service_with(seeded());
        let response = service.poll_updates("ada", 0, Some(2_000), now()).await.unwrap();
        assert!(!response.changed);
        assert_eq!(response.cursor, 0);
        assert!(response.entitlements.is_none());
    }

    #[tokio::test]
    async fn test_renewal_with_future_plan_anchor() {
        let (service, _) = service_with(seeded());
        let anchor = Utc.with_ymd_and_hms(2028, 6, 1, 0, 0, 0).unwrap();
        service
            .update_user(
                "ada",
                UserPatch {
                    plan_anchor_at: Some(anchor),
                    ..UserPatch::default()
                },
                now(),
            )
            .await
            .unwrap();

        let renewal = service.renewal("ada", now()).unwrap();
        assert!(renewal.period_start_at <= now());
        assert!(now() < renewal.period_end_at);
        assert_eq!(renewal.next_renewal_at, anchor);

        let snapshot = service.entitlements("ada", now()).await.unwrap();
        assert_eq!(snapshot.usage.next_renewal_at, anchor);
    }

    #[test]
    fn test_usage_history_and_renewal() {
        let (service, _) = service_with(seeded());
        let history = service.usage_history("ada").unwrap();
        assert_eq!(history.sessions.len(), 1);
        assert_eq!(history.total_billed_seconds, 1_500);

        let renewal = service.renewal("bob", now()).unwrap();
        assert_eq!(renewal.period, BillingPeriod::Annual);
        assert_eq!(
            renewal.next_renewal_at,
            Utc.with_ymd_and_hms(2027, 2, 28, 10, 0, 0).unwrap()
        );

        let renewal = service.renewal("ada", now()).unwrap();
        assert_eq!(renewal.period, BillingPeriod::Monthly);
        assert_eq!(
            renewal.next_renewal_at,
            Utc.with_ymd_and_hms(2026, 10, 31, 9, 0, 0).unwrap()
        );
    }
}
