//! Global product configuration stored alongside the records

use super::org::OrgSummary;
use super::tier::TierDefinition;
use serde::{Deserialize, Serialize};

/// Global configuration document; edits fan out to every user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default = "TierDefinition::defaults")]
    pub tiers: Vec<TierDefinition>,
    #[serde(default)]
    pub support_email: Option<String>,
    /// Banner text shown by the mobile client
    #[serde(default)]
    pub announcement: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            tiers: TierDefinition::defaults(),
            support_email: None,
            announcement: None,
        }
    }
}

impl GlobalConfig {
    pub fn tier(&self, id: &str) -> Option<&TierDefinition> {
        self.tiers.iter().find(|t| t.id == id)
    }
}

/// Admin edit of the global config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default)]
    pub tiers: Option<Vec<TierDefinition>>,
    #[serde(default)]
    pub support_email: Option<String>,
    #[serde(default)]
    pub announcement: Option<String>,
}

/// Configuration as seen by one user: their tier and their org
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedConfig {
    pub tier: TierDefinition,
    pub org: Option<OrgSummary>,
    pub support_email: Option<String>,
    pub announcement: Option<String>,
    pub billing_increment_seconds: i64,
}
