//! Error types for rolecall-core
//!
//! Validation failures are raised at the write boundary, before the core sees
//! the data. Consistency faults in already-stored records (dangling org ids,
//! negative quotas) are absorbed as locked entitlements and never show up here.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for rolecall operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // Persistence Errors
    // ===================
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON in {path}: {message}")]
    JsonParse {
        path: PathBuf,
        message: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize database: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Simulated persistence failure: {0}")]
    PersistenceUnavailable(String),

    // ===================
    // Lookup Errors
    // ===================
    #[error("User not found: {user_id}")]
    UserNotFound { user_id: String },

    #[error("Organization not found: {org_id}")]
    OrgNotFound { org_id: String },

    #[error("Unknown tier: {tier}")]
    UnknownTier { tier: String },

    // ===================
    // Validation Errors
    // ===================
    #[error("Invalid timezone: {name}")]
    InvalidTimezone { name: String },

    #[error("Invalid usage session: {reason}")]
    InvalidSession { reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    // ===================
    // Config Errors
    // ===================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl CoreError {
    /// True for errors caused by the caller's input rather than by the server
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidTimezone { .. }
                | CoreError::InvalidSession { .. }
                | CoreError::InvalidField { .. }
                | CoreError::UnknownTier { .. }
        )
    }

    /// True for lookups that found nothing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::UserNotFound { .. } | CoreError::OrgNotFound { .. }
        )
    }

    pub(crate) fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        CoreError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
