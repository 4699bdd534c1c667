//! HTTP client for the registration authority's JSON API.
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /reserve`: reserve an identifier, body and response are an
//!   [`AuthorityRecord`]
//! - `POST /records`: submit a record for registration
//! - `GET /records?doi=<id>`: current record for an identifier

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, warn};

use crate::config::AuthorityConfig;

use super::{
    is_valid_doi, normalize_status, AuthorityReceipt, AuthorityRecord, RegistrationAuthority,
    RegistrationError, RemoteStatus,
};

/// Registration authority client over HTTP.
pub struct HttpRegistrationClient {
    client: Client,
    config: AuthorityConfig,
}

impl HttpRegistrationClient {
    /// Create a new client with the configured request timeout.
    pub fn new(config: AuthorityConfig) -> Result<Self, RegistrationError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                RegistrationError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.config.username, Some(&self.config.password))
        }
    }

    /// Send a request and decode the authority's record from the response.
    async fn exchange(&self, request: RequestBuilder) -> Result<AuthorityRecord, RegistrationError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RegistrationError::Timeout
                } else {
                    RegistrationError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                RegistrationError::Timeout
            } else {
                RegistrationError::Unavailable(format!("Failed to read response: {}", e))
            }
        })?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| RegistrationError::Protocol(format!("Failed to parse response: {}", e)))
    }
}

/// Map a non-success HTTP status to an error.
///
/// Server errors, throttling, request timeouts and credential failures are
/// transient from the caller's point of view; any other client error is the
/// authority refusing the record.
fn classify_failure(status: StatusCode, body: &str) -> RegistrationError {
    let detail = format!(
        "HTTP {}: {}",
        status,
        body.chars().take(200).collect::<String>()
    );
    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN => RegistrationError::Unavailable(detail),
        s if s.is_server_error() => RegistrationError::Unavailable(detail),
        _ => RegistrationError::Rejected(detail),
    }
}

fn remote_status(record: &AuthorityRecord) -> Result<RemoteStatus, RegistrationError> {
    let native = record.status.as_deref().ok_or_else(|| {
        RegistrationError::Protocol(format!(
            "response for {} carries no status",
            record.accession_number
        ))
    })?;
    normalize_status(native, record.message.as_deref())
}

fn checked_doi(record: &AuthorityRecord) -> Result<Option<String>, RegistrationError> {
    match record.doi.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(doi) if is_valid_doi(doi) => Ok(Some(doi.to_string())),
        Some(doi) => Err(RegistrationError::Protocol(format!(
            "authority returned a malformed identifier: {}",
            doi
        ))),
    }
}

fn receipt(record: &AuthorityRecord) -> Result<AuthorityReceipt, RegistrationError> {
    Ok(AuthorityReceipt {
        external_id: checked_doi(record)?,
        status: remote_status(record)?,
    })
}

#[async_trait]
impl RegistrationAuthority for HttpRegistrationClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn reserve(&self, record: &AuthorityRecord) -> Result<AuthorityReceipt, RegistrationError> {
        let url = format!("{}/reserve", self.base_url());
        debug!(key = %record.accession_number, "Reserving identifier");

        let response = self.exchange(self.client.post(&url).json(record)).await?;
        receipt(&response)
    }

    async fn submit(&self, record: &AuthorityRecord) -> Result<AuthorityReceipt, RegistrationError> {
        let url = format!("{}/records", self.base_url());
        debug!(key = %record.accession_number, doi = ?record.doi, "Submitting record");

        let response = self.exchange(self.client.post(&url).json(record)).await?;
        receipt(&response)
    }

    async fn query_status(&self, external_id: &str) -> Result<RemoteStatus, RegistrationError> {
        let url = format!(
            "{}/records?doi={}",
            self.base_url(),
            urlencoding::encode(external_id)
        );
        debug!(doi = %external_id, "Querying identifier status");

        let response = self.exchange(self.client.get(&url)).await?;

        if let Some(doi) = checked_doi(&response)? {
            if doi != external_id {
                warn!(requested = %external_id, returned = %doi, "Authority answered for a different identifier");
                return Err(RegistrationError::Protocol(format!(
                    "queried {} but authority answered for {}",
                    external_id, doi
                )));
            }
        }

        remote_status(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::record::DoiRequest;

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(url: String) -> HttpRegistrationClient {
        HttpRegistrationClient::new(AuthorityConfig {
            url,
            username: "svc".to_string(),
            password: "secret".to_string(),
            timeout_secs: 2,
        })
        .unwrap()
    }

    fn outbound() -> AuthorityRecord {
        let request = DoiRequest::new("urn:x:1", "Dataset 1", "eng").with_contributor("J. Doe");
        AuthorityRecord::from_request(&request, "Test Publisher")
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(StatusCode::SERVICE_UNAVAILABLE, ""),
            RegistrationError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            RegistrationError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, ""),
            RegistrationError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNPROCESSABLE_ENTITY, "bad title"),
            RegistrationError::Rejected(msg) if msg.contains("bad title")
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, ""),
            RegistrationError::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_reserve_returns_identifier() {
        let router = Router::new().route(
            "/reserve",
            post(|headers: HeaderMap, Json(mut body): Json<AuthorityRecord>| async move {
                assert!(headers.contains_key("authorization"));
                body.doi = Some("10.17189/100001".to_string());
                body.status = Some("Reserved".to_string());
                Json(body)
            }),
        );
        let client = client_for(spawn_stub(router).await);

        let receipt = client.reserve(&outbound()).await.unwrap();
        assert_eq!(receipt.external_id.as_deref(), Some("10.17189/100001"));
        assert_eq!(receipt.status, RemoteStatus::Reserved);
    }

    #[tokio::test]
    async fn test_submit_pending_and_error_statuses() {
        let router = Router::new().route(
            "/records",
            post(|Json(mut body): Json<AuthorityRecord>| async move {
                if body.title.is_empty() {
                    body.status = Some("error".to_string());
                    body.message = Some("title required".to_string());
                } else {
                    body.doi = Some("10.17189/100002".to_string());
                    body.status = Some("pending".to_string());
                }
                Json(body)
            }),
        );
        let client = client_for(spawn_stub(router).await);

        let receipt = client.submit(&outbound()).await.unwrap();
        assert_eq!(receipt.status, RemoteStatus::Pending);
        assert_eq!(receipt.external_id.as_deref(), Some("10.17189/100002"));

        let mut untitled = outbound();
        untitled.title.clear();
        let receipt = client.submit(&untitled).await.unwrap();
        assert_eq!(
            receipt.status,
            RemoteStatus::Error {
                message: "title required".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_query_status() {
        let router = Router::new().route(
            "/records",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let doi = params.get("doi").cloned().unwrap_or_default();
                Json(json!({
                    "doi": doi,
                    "accession_number": "urn:x:1",
                    "title": "Dataset 1",
                    "status": "Completed"
                }))
            }),
        );
        let client = client_for(spawn_stub(router).await);

        let status = client.query_status("10.17189/100003").await.unwrap();
        assert_eq!(status, RemoteStatus::Registered);
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let router = Router::new().route(
            "/records",
            post(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }),
        );
        let client = client_for(spawn_stub(router).await);

        let err = client.submit(&outbound()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_is_rejected() {
        let router = Router::new().route(
            "/records",
            post(|| async { (AxumStatus::UNPROCESSABLE_ENTITY, "schema violation") }),
        );
        let client = client_for(spawn_stub(router).await);

        let err = client.submit(&outbound()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unparsable_body_is_protocol_error() {
        let router = Router::new().route("/reserve", post(|| async { "<html>oops</html>" }));
        let client = client_for(spawn_stub(router).await);

        let err = client.reserve(&outbound()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_malformed_identifier_is_protocol_error() {
        let router = Router::new().route(
            "/reserve",
            post(|Json(mut body): Json<AuthorityRecord>| async move {
                body.doi = Some("not-a-doi".to_string());
                body.status = Some("reserved".to_string());
                Json(body)
            }),
        );
        let client = client_for(spawn_stub(router).await);

        let err = client.reserve(&outbound()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_slow_authority_times_out() {
        let router = Router::new().route(
            "/records",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let client = HttpRegistrationClient::new(AuthorityConfig {
            url: spawn_stub(router).await,
            username: String::new(),
            password: String::new(),
            timeout_secs: 1,
        })
        .unwrap();

        let err = client.submit(&outbound()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Timeout));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client_for(url).query_status("10.17189/1").await.unwrap_err();
        assert!(matches!(err, RegistrationError::Unavailable(_)));
    }
}
