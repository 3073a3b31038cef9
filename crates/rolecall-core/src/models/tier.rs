//! Subscription tier reference data

use serde::{Deserialize, Serialize};

/// Subscription tier definition (read-only reference data)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Daily allowance in seconds (None = unlimited)
    #[serde(default)]
    pub daily_seconds_limit: Option<i64>,
    #[serde(default)]
    pub support_included: bool,
    #[serde(default)]
    pub can_create_custom_scenarios: bool,
}

impl TierDefinition {
    /// Stand-in for a tier id that no longer exists in the config.
    ///
    /// Grants nothing, so a stale reference locks the account instead of
    /// silently granting unlimited use.
    pub fn fallback(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "Unknown plan".to_string(),
            daily_seconds_limit: Some(0),
            support_included: false,
            can_create_custom_scenarios: false,
        }
    }

    /// Tiers shipped with a fresh database
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                id: "free".to_string(),
                name: "Free".to_string(),
                daily_seconds_limit: Some(600),
                support_included: false,
                can_create_custom_scenarios: false,
            },
            Self {
                id: "pro".to_string(),
                name: "Pro".to_string(),
                daily_seconds_limit: Some(1800),
                support_included: true,
                can_create_custom_scenarios: true,
            },
            Self {
                id: "unlimited".to_string(),
                name: "Unlimited".to_string(),
                daily_seconds_limit: None,
                support_included: true,
                can_create_custom_scenarios: true,
            },
            Self {
                id: "enterprise".to_string(),
                name: "Enterprise".to_string(),
                daily_seconds_limit: None,
                support_included: true,
                can_create_custom_scenarios: true,
            },
        ]
    }
}
