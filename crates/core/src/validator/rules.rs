use chrono::NaiveDate;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::authority::{is_valid_doi, AuthorityRecord};
use crate::config::ValidatorConfig;
use crate::metrics;
use crate::record::{is_known_node, DoiRequest};

use super::{LandingPageProbe, ProbeError};

/// Which rules a request is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSet {
    /// Title, node and at least one contributor.
    Minimal,
    /// Minimal plus publication date, a live landing page and a lossless
    /// exchange document.
    Full,
}

impl RuleSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSet::Minimal => "minimal",
            RuleSet::Full => "full",
        }
    }
}

/// A single failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub rule: String,
    pub message: String,
}

impl Violation {
    fn new(field: &str, rule: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Metadata validator.
pub struct Validator {
    probe: Arc<dyn LandingPageProbe>,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(probe: Arc<dyn LandingPageProbe>, config: ValidatorConfig) -> Self {
        Self { probe, config }
    }

    /// Check a request. An empty result means it passed.
    pub async fn validate(&self, request: &DoiRequest, rules: RuleSet) -> Vec<Violation> {
        let mut violations = check_minimal(request);

        if rules == RuleSet::Full {
            violations.extend(check_publication_date(request));
            violations.extend(self.check_landing_page(request).await);
            violations.extend(check_lossless(request));
        }

        for violation in &violations {
            metrics::VALIDATION_VIOLATIONS
                .with_label_values(&[rules.as_str(), violation.rule.as_str()])
                .inc();
        }
        if !violations.is_empty() {
            debug!(
                key = %request.key,
                rule_set = rules.as_str(),
                count = violations.len(),
                "Validation failed"
            );
        }

        violations
    }

    async fn check_landing_page(&self, request: &DoiRequest) -> Option<Violation> {
        let raw = match request.landing_page.as_deref().map(str::trim) {
            None | Some("") => {
                return Some(Violation::new(
                    "landing_page",
                    "required",
                    "landing page URL is required",
                ))
            }
            Some(raw) => raw,
        };

        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            _ => {
                return Some(Violation::new(
                    "landing_page",
                    "url_format",
                    format!("{} is not an http(s) URL", raw),
                ))
            }
        }

        if !self.config.check_landing_page {
            return None;
        }

        let outcome =
            match tokio::time::timeout(self.config.probe_timeout(), self.probe.probe(raw)).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout),
            };

        outcome.err().map(|e| {
            Violation::new(
                "landing_page",
                "reachable",
                format!("{} failed liveness probe: {}", raw, e),
            )
        })
    }
}

fn check_minimal(request: &DoiRequest) -> Vec<Violation> {
    let mut violations = Vec::new();

    if request.key.trim().is_empty() {
        violations.push(Violation::new("key", "required", "record key is required"));
    }

    if request.title.trim().is_empty() {
        violations.push(Violation::new("title", "required", "title is required"));
    }

    let node = request.node.trim();
    if node.is_empty() {
        violations.push(Violation::new("node", "required", "submitting node is required"));
    } else if !is_known_node(node) {
        violations.push(Violation::new(
            "node",
            "known_node",
            format!("unknown node: {}", node),
        ));
    }

    if !request.contributors.iter().any(|c| !c.trim().is_empty()) {
        violations.push(Violation::new(
            "contributors",
            "required",
            "at least one contributor is required",
        ));
    } else if request.contributors.iter().any(|c| c.trim().is_empty()) {
        violations.push(Violation::new(
            "contributors",
            "non_empty",
            "contributor names cannot be blank",
        ));
    }

    if let Some(external_id) = request.external_id.as_deref() {
        if !is_valid_doi(external_id) {
            violations.push(Violation::new(
                "external_id",
                "doi_format",
                format!("{} is not a DOI", external_id),
            ));
        }
    }

    violations
}

fn check_publication_date(request: &DoiRequest) -> Option<Violation> {
    match request.publication_date.as_deref().map(str::trim) {
        None | Some("") => Some(Violation::new(
            "publication_date",
            "required",
            "publication date is required",
        )),
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d").err().map(|_| {
            Violation::new(
                "publication_date",
                "date_format",
                format!("{} is not a YYYY-MM-DD date", date),
            )
        }),
    }
}

fn check_lossless(request: &DoiRequest) -> Vec<Violation> {
    let record = AuthorityRecord::from_request(request, "");
    match record.lossy_fields(request) {
        Ok(fields) => fields
            .into_iter()
            .map(|field| {
                Violation::new(
                    field.as_str(),
                    "lossless",
                    format!("{} does not survive the authority exchange format", field),
                )
            })
            .collect(),
        Err(e) => vec![Violation::new(
            "record",
            "lossless",
            format!("record does not serialize: {}", e),
        )],
    }
}
