use serde::{Deserialize, Serialize};

use crate::record::{node_long_name, Contributor, DoiRequest, RecordField};

const KEYWORD_SEPARATOR: &str = "; ";

/// The authority's JSON exchange document for one record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorityRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// The stable internal key. The authority deduplicates on this field.
    pub accession_number: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<Contributor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    #[serde(default)]
    pub contributor_organization: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Keywords joined with "; ".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keywords: String,
    /// Native status, set by the authority on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthorityRecord {
    /// Build the outbound document for a request.
    ///
    /// The node's long name becomes the contributing organisation and is
    /// appended to the keywords when not already present.
    pub fn from_request(request: &DoiRequest, publisher: &str) -> Self {
        let organization = node_long_name(&request.node)
            .map(str::to_string)
            .unwrap_or_else(|| request.node.trim().to_string());

        Self {
            doi: request.external_id.clone(),
            accession_number: request.key.clone(),
            title: request.title.clone(),
            authors: request
                .contributors
                .iter()
                .map(|name| Contributor::parse(name))
                .collect(),
            publication_date: request.publication_date.clone(),
            site_url: request.landing_page.clone(),
            contributor_organization: organization.clone(),
            publisher: publisher.to_string(),
            description: request.description.clone(),
            keywords: expected_keywords(request, &organization).join(KEYWORD_SEPARATOR),
            status: None,
            message: None,
        }
    }

    /// Keywords as the authority will read them back.
    pub fn keyword_list(&self) -> Vec<String> {
        if self.keywords.is_empty() {
            return Vec::new();
        }
        self.keywords
            .split(';')
            .map(|k| k.trim().to_string())
            .collect()
    }

    /// Fields of `request` that do not survive a trip through the exchange
    /// document: serialize, parse back, and compare what the authority would
    /// store against what the caller supplied.
    pub fn lossy_fields(&self, request: &DoiRequest) -> Result<Vec<RecordField>, serde_json::Error> {
        let wire = serde_json::to_string(self)?;
        let parsed: AuthorityRecord = serde_json::from_str(&wire)?;

        let mut lossy = Vec::new();
        if parsed.title != request.title {
            lossy.push(RecordField::Title);
        }

        let authors: Vec<&str> = parsed.authors.iter().map(|a| a.full_name.as_str()).collect();
        let supplied: Vec<&str> = request.contributors.iter().map(|c| c.trim()).collect();
        if authors != supplied {
            lossy.push(RecordField::Contributors);
        }

        if parsed.publication_date != request.publication_date {
            lossy.push(RecordField::PublicationDate);
        }
        if parsed.site_url != request.landing_page {
            lossy.push(RecordField::LandingPage);
        }
        if parsed.description != request.description {
            lossy.push(RecordField::Description);
        }
        if parsed.keyword_list() != expected_keywords(request, &parsed.contributor_organization) {
            lossy.push(RecordField::Keywords);
        }

        Ok(lossy)
    }
}

fn expected_keywords(request: &DoiRequest, organization: &str) -> Vec<String> {
    let mut keywords = request.keywords.clone();
    if !organization.is_empty() && !keywords.iter().any(|k| k == organization) {
        keywords.push(organization.to_string());
    }
    keywords
}
