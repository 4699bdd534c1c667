//! Core identifier record data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an identifier request.
///
/// A key with no transactions has no state; that "unknown" state is
/// represented as `Option::<DoiState>::None` throughout the crate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoiState {
    /// Local record only, never sent to the authority.
    Draft,
    /// Identifier reserved with the authority, not yet released.
    Reserved,
    /// Submitted for registration, waiting on the authority.
    PendingRegistration,
    /// Authority confirmed the registration.
    Registered,
    /// Last attempt failed terminally. Can be retried.
    Error,
}

impl DoiState {
    pub const ALL: [DoiState; 5] = [
        DoiState::Draft,
        DoiState::Reserved,
        DoiState::PendingRegistration,
        DoiState::Registered,
        DoiState::Error,
    ];

    /// Get the state as a string (for storage and metrics labels).
    pub fn as_str(&self) -> &'static str {
        match self {
            DoiState::Draft => "draft",
            DoiState::Reserved => "reserved",
            DoiState::PendingRegistration => "pending_registration",
            DoiState::Registered => "registered",
            DoiState::Error => "error",
        }
    }

    /// States the reconciler sweeps: the authority may still change them.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DoiState::Reserved | DoiState::PendingRegistration)
    }

    /// States entered only on a confirmed authority response.
    pub fn requires_authority(&self) -> bool {
        matches!(
            self,
            DoiState::Reserved | DoiState::PendingRegistration | DoiState::Registered
        )
    }

    /// States an `error` record can be retried back into.
    pub fn is_retry_target(&self) -> bool {
        matches!(
            self,
            DoiState::Draft | DoiState::Reserved | DoiState::Registered
        )
    }
}

impl fmt::Display for DoiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoiState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DoiState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown state: {}", s))
    }
}

/// Label for an optional state, "unknown" when absent.
pub fn state_label(state: Option<DoiState>) -> &'static str {
    state.map(|s| s.as_str()).unwrap_or("unknown")
}

/// Bibliographic fields a caller can change on an existing record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    Title,
    Node,
    Contributors,
    PublicationDate,
    LandingPage,
    Description,
    Keywords,
}

impl RecordField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::Title => "title",
            RecordField::Node => "node",
            RecordField::Contributors => "contributors",
            RecordField::PublicationDate => "publication_date",
            RecordField::LandingPage => "landing_page",
            RecordField::Description => "description",
            RecordField::Keywords => "keywords",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identifier request as supplied by a caller.
///
/// Missing bibliographic fields deserialize to empty values so they surface
/// as validation violations rather than parse failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoiRequest {
    /// Stable internal key (product or dataset identifier, e.g. a LIDVID).
    pub key: String,

    /// Authority-issued identifier, if the caller already holds one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(default)]
    pub title: String,

    /// Submitting discipline node id.
    #[serde(default)]
    pub node: String,

    /// Contributor names as supplied.
    #[serde(default)]
    pub contributors: Vec<String>,

    /// Publication date, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing_page: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl DoiRequest {
    pub fn new(key: impl Into<String>, title: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            external_id: None,
            title: title.into(),
            node: node.into(),
            contributors: Vec::new(),
            publication_date: None,
            landing_page: None,
            description: None,
            keywords: Vec::new(),
        }
    }

    pub fn with_contributor(mut self, name: impl Into<String>) -> Self {
        self.contributors.push(name.into());
        self
    }

    pub fn with_publication_date(mut self, date: impl Into<String>) -> Self {
        self.publication_date = Some(date.into());
        self
    }

    pub fn with_landing_page(mut self, url: impl Into<String>) -> Self {
        self.landing_page = Some(url.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Bibliographic fields that differ between `self` and `other`.
    pub fn changed_fields(&self, other: &DoiRequest) -> Vec<RecordField> {
        let mut changed = Vec::new();
        if self.title != other.title {
            changed.push(RecordField::Title);
        }
        if !self.node.eq_ignore_ascii_case(&other.node) {
            changed.push(RecordField::Node);
        }
        if self.contributors != other.contributors {
            changed.push(RecordField::Contributors);
        }
        if self.publication_date != other.publication_date {
            changed.push(RecordField::PublicationDate);
        }
        if self.landing_page != other.landing_page {
            changed.push(RecordField::LandingPage);
        }
        if self.description != other.description {
            changed.push(RecordField::Description);
        }
        if self.keywords != other.keywords {
            changed.push(RecordField::Keywords);
        }
        changed
    }
}

/// Projected view of one identifier request, derived from the latest
/// transaction for its key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifierRecord {
    pub key: String,
    pub state: DoiState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub title: String,
    pub node: String,
    pub contributors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub publisher: String,
    /// Last exchange document built for the authority, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Actor that wrote the latest transaction.
    pub submitter: String,
    /// Reason attached to the latest transaction (error message, retry note).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl IdentifierRecord {
    /// The caller-facing request this record was built from.
    pub fn to_request(&self) -> DoiRequest {
        DoiRequest {
            key: self.key.clone(),
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            node: self.node.clone(),
            contributors: self.contributors.clone(),
            publication_date: self.publication_date.clone(),
            landing_page: self.landing_page.clone(),
            description: self.description.clone(),
            keywords: self.keywords.clone(),
        }
    }
}
