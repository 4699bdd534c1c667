//! Types for registration authority operations.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AuthorityRecord;

/// Errors that can occur talking to the registration authority.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Transport failure or transient authority-side failure.
    #[error("Authority unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout")]
    Timeout,

    /// The authority refused the record. Not retryable as-is.
    #[error("Authority rejected record: {0}")]
    Rejected(String),

    /// The authority answered with something outside its protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RegistrationError {
    /// Whether the same call may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RegistrationError::Rejected(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistrationError::Unavailable(_) => "unavailable",
            RegistrationError::Timeout => "timeout",
            RegistrationError::Rejected(_) => "rejected",
            RegistrationError::Protocol(_) => "protocol",
        }
    }
}

/// Authority-reported status, normalized from its native vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Identifier reserved, not released.
    Reserved,
    /// Still being processed by the authority.
    Pending,
    /// Registration completed.
    Registered,
    /// The authority failed the record.
    Error { message: String },
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Reserved => "reserved",
            RemoteStatus::Pending => "pending",
            RemoteStatus::Registered => "registered",
            RemoteStatus::Error { .. } => "error",
        }
    }
}

/// Map an authority-native status string into [`RemoteStatus`].
///
/// Matching is case-insensitive. Unrecognised strings are protocol errors.
pub fn normalize_status(
    native: &str,
    message: Option<&str>,
) -> Result<RemoteStatus, RegistrationError> {
    match native.trim().to_ascii_lowercase().as_str() {
        "reserved" => Ok(RemoteStatus::Reserved),
        "pending" | "submitted" => Ok(RemoteStatus::Pending),
        "completed" | "registered" | "findable" => Ok(RemoteStatus::Registered),
        "error" | "rejected" | "failure" => Ok(RemoteStatus::Error {
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or("authority reported an error without a message")
                .to_string(),
        }),
        other => Err(RegistrationError::Protocol(format!(
            "unknown authority status: {}",
            other
        ))),
    }
}

static DOI_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^10\.\d{4,9}/\S+$").unwrap());

/// Whether a string looks like a DOI (`10.<registrant>/<suffix>`).
pub fn is_valid_doi(candidate: &str) -> bool {
    DOI_PATTERN.is_match(candidate)
}

/// Result of a reserve or submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityReceipt {
    /// Identifier the authority holds for the record, if it issued one.
    pub external_id: Option<String>,
    pub status: RemoteStatus,
}

/// Trait for registration authority implementations.
///
/// Every outbound record carries the stable internal key, so repeating a
/// call for the same key updates the authority's record instead of creating
/// a duplicate.
#[async_trait]
pub trait RegistrationAuthority: Send + Sync {
    /// Returns the authority name (e.g., "osti").
    fn name(&self) -> &str;

    /// Reserve an identifier for a record without releasing it.
    async fn reserve(&self, record: &AuthorityRecord) -> Result<AuthorityReceipt, RegistrationError>;

    /// Submit a record for registration.
    async fn submit(&self, record: &AuthorityRecord) -> Result<AuthorityReceipt, RegistrationError>;

    /// Query the current status of an issued identifier.
    async fn query_status(&self, external_id: &str) -> Result<RemoteStatus, RegistrationError>;
}
