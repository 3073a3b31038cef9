//! User profile (fields the metering core depends on)

use super::org::AccountStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Individual,
    Enterprise,
}

/// Persisted user profile.
///
/// `org_id` is set iff `account_type == Enterprise`; the service enforces it
/// on every write. A pending timezone becomes the active timezone once
/// `pending_timezone_effective_at` has passed, via [`crate::entitlement::materialize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub account_type: AccountType,
    pub tier: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub pending_timezone: Option<String>,
    #[serde(default)]
    pub pending_timezone_effective_at: Option<DateTime<Utc>>,
    pub plan_anchor_at: DateTime<Utc>,
    #[serde(default)]
    pub manual_bonus_seconds: i64,
    #[serde(default)]
    pub status: AccountStatus,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl UserProfile {
    pub fn is_enterprise(&self) -> bool {
        self.account_type == AccountType::Enterprise
    }

    /// Org id, only for enterprise accounts
    pub fn enterprise_org_id(&self) -> Option<&str> {
        if self.is_enterprise() {
            self.org_id.as_deref()
        } else {
            None
        }
    }
}

/// Admin edit of a user; absent fields are left untouched.
///
/// Switching `account_type` to individual clears the org link; switching to
/// enterprise requires `org_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[serde(default)]
    pub manual_bonus_seconds: Option<i64>,
    #[serde(default)]
    pub account_type: Option<AccountType>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub plan_anchor_at: Option<DateTime<Utc>>,
}

/// Profile fields pushed to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub display_name: String,
    pub account_type: AccountType,
    pub tier: String,
    pub org_id: Option<String>,
    pub timezone: String,
    pub pending_timezone: Option<String>,
    pub pending_timezone_effective_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
}

impl From<&UserProfile> for UserView {
    fn from(user: &UserProfile) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            account_type: user.account_type,
            tier: user.tier.clone(),
            org_id: user.org_id.clone(),
            timezone: user.timezone.clone(),
            pending_timezone: user.pending_timezone.clone(),
            pending_timezone_effective_at: user.pending_timezone_effective_at,
            status: user.status,
        }
    }
}
