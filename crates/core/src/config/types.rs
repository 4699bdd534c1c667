use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::record::RecordField;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("registrar.db")
}

/// Registration authority endpoint and credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorityConfig {
    /// Base URL of the authority API (e.g., "https://www.osti.gov/iad2/api")
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_authority_timeout")]
    pub timeout_secs: u64,
}

fn default_authority_timeout() -> u64 {
    30
}

impl AuthorityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Metadata validator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidatorConfig {
    /// Landing page probe timeout in seconds (default: 10)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Whether the full rule set probes the landing page (default: true)
    #[serde(default = "default_true")]
    pub check_landing_page: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
            check_landing_page: true,
        }
    }
}

impl ValidatorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Lifecycle manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Publisher sent with every outbound record
    #[serde(default = "default_publisher")]
    pub publisher: String,
    /// Upper bound on any single external call, in seconds (default: 60)
    #[serde(default = "default_external_call_timeout")]
    pub external_call_timeout_secs: u64,
    /// Fields that may change when updating an already registered record
    #[serde(default = "default_update_allowed_fields")]
    pub update_allowed_fields: Vec<RecordField>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            publisher: default_publisher(),
            external_call_timeout_secs: default_external_call_timeout(),
            update_allowed_fields: default_update_allowed_fields(),
        }
    }
}

impl LifecycleConfig {
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }
}

fn default_publisher() -> String {
    "NASA Planetary Data System".to_string()
}

fn default_external_call_timeout() -> u64 {
    60
}

fn default_update_allowed_fields() -> Vec<RecordField> {
    vec![
        RecordField::Title,
        RecordField::Contributors,
        RecordField::PublicationDate,
        RecordField::LandingPage,
        RecordField::Description,
        RecordField::Keywords,
    ]
}

/// Batch processor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Records processed concurrently within one batch (default: 4)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

/// Pending reconciler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between scheduled sweeps (default: 300)
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    /// Status queries in flight at once during a sweep (default: 8)
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval(),
            max_concurrent_queries: default_max_concurrent_queries(),
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_max_concurrent_queries() -> usize {
    8
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub authority: SanitizedAuthorityConfig,
    pub validator: ValidatorConfig,
    pub lifecycle: LifecycleConfig,
    pub batch: BatchConfig,
    pub reconciler: ReconcilerConfig,
}

/// Sanitized authority config (password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthorityConfig {
    pub url: String,
    pub username: String,
    pub password_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            authority: SanitizedAuthorityConfig {
                url: config.authority.url.clone(),
                username: config.authority.username.clone(),
                password_configured: !config.authority.password.is_empty(),
                timeout_secs: config.authority.timeout_secs,
            },
            validator: config.validator.clone(),
            lifecycle: config.lifecycle.clone(),
            batch: config.batch.clone(),
            reconciler: config.reconciler.clone(),
        }
    }
}
