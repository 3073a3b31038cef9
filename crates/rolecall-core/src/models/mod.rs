//! Data models for rolecall

pub mod config;
pub mod database;
pub mod entitlement;
pub mod org;
pub mod session;
pub mod tier;
pub mod user;

pub use config::{ConfigPatch, GlobalConfig, ScopedConfig};
pub use database::Database;
pub use entitlement::{
    EntitlementDecision, EntitlementSnapshot, LockReason, UpdatePayload, UsageSnapshot,
    UsageSummary,
};
pub use org::{AccountStatus, EnterpriseOrg, OrgPatch, OrgSummary};
pub use session::{clamp_raw_seconds, NewUsageSession, UsageSession};
pub use tier::TierDefinition;
pub use user::{AccountType, UserPatch, UserProfile, UserView};
