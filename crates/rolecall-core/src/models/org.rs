//! Enterprise organization records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Active/disabled flag shared by users and orgs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Disabled,
}

impl AccountStatus {
    pub fn is_active(self) -> bool {
        self == AccountStatus::Active
    }
}

/// Enterprise tenant with a shared daily pool and a per-member cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseOrg {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub daily_seconds_quota: i64,
    #[serde(default)]
    pub per_user_daily_seconds_cap: i64,
    #[serde(default)]
    pub manual_bonus_seconds: i64,
    /// Renewal anchor for the org's annual contract
    pub created_at: DateTime<Utc>,
}

/// Admin edit of an org; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[serde(default)]
    pub daily_seconds_quota: Option<i64>,
    #[serde(default)]
    pub per_user_daily_seconds_cap: Option<i64>,
    #[serde(default)]
    pub manual_bonus_seconds: Option<i64>,
}

/// Org fields a member's client is allowed to see
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgSummary {
    pub id: String,
    pub name: String,
    pub status: AccountStatus,
}

impl From<&EnterpriseOrg> for OrgSummary {
    fn from(org: &EnterpriseOrg) -> Self {
        Self {
            id: org.id.clone(),
            name: org.name.clone(),
            status: org.status,
        }
    }
}
