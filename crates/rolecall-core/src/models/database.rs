//! The persisted document: every record the core reads or writes

use super::config::GlobalConfig;
use super::org::EnterpriseOrg;
use super::session::UsageSession;
use super::user::UserProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whole-store snapshot, loaded once and replaced on every commit.
///
/// BTreeMaps keep the JSON file stable across writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub users: BTreeMap<String, UserProfile>,
    #[serde(default)]
    pub orgs: BTreeMap<String, EnterpriseOrg>,
    #[serde(default)]
    pub sessions: Vec<UsageSession>,
    #[serde(default)]
    pub config: GlobalConfig,
}

impl Database {
    pub fn user(&self, id: &str) -> Option<&UserProfile> {
        self.users.get(id)
    }

    pub fn org(&self, id: &str) -> Option<&EnterpriseOrg> {
        self.orgs.get(id)
    }

    /// Org of an enterprise user; None for individuals and dangling links
    pub fn org_for(&self, user: &UserProfile) -> Option<&EnterpriseOrg> {
        user.enterprise_org_id().and_then(|id| self.orgs.get(id))
    }

    /// Enterprise members of an org, in id order
    pub fn org_member_ids(&self, org_id: &str) -> Vec<String> {
        self.users
            .values()
            .filter(|u| u.enterprise_org_id() == Some(org_id))
            .map(|u| u.id.clone())
            .collect()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountStatus, AccountType};
    use chrono::{TimeZone, Utc};

    fn user(id: &str, org: Option<&str>) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            display_name: String::new(),
            account_type: if org.is_some() {
                AccountType::Enterprise
            } else {
                AccountType::Individual
            },
            tier: "free".to_string(),
            org_id: org.map(String::from),
            timezone: "UTC".to_string(),
            pending_timezone: None,
            pending_timezone_effective_at: None,
            plan_anchor_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            manual_bonus_seconds: 0,
            status: AccountStatus::Active,
        }
    }

    #[test]
    fn test_org_member_ids() {
        let mut db = Database::default();
        for u in [
            user("a", Some("org-1")),
            user("b", Some("org-2")),
            user("c", Some("org-1")),
            user("d", None),
        ] {
            db.users.insert(u.id.clone(), u);
        }

        assert_eq!(db.org_member_ids("org-1"), vec!["a", "c"]);
        assert!(db.org_member_ids("org-3").is_empty());
    }

    #[test]
    fn test_empty_document_loads_with_default_tiers() {
        let db: Database = serde_json::from_str("{}").unwrap();
        assert!(db.config.tier("free").is_some());
        assert!(db.users.is_empty());
    }
}
