//! Testing utilities and mock implementations.
//!
//! Mocks for the registration authority and the landing page probe let the
//! lifecycle run end to end without network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use registrar_core::testing::{fixtures, MockLandingPageProbe, MockRegistrationAuthority};
//!
//! let authority = Arc::new(MockRegistrationAuthority::new());
//! let probe = Arc::new(MockLandingPageProbe::new());
//!
//! authority.set_submit_status(RemoteStatus::Pending).await;
//! let request = fixtures::doi_request("urn:nasa:pds:bundle::1.0");
//! ```

mod failing_log;
mod mock_authority;
mod mock_probe;

pub use failing_log::FailingTransactionLog;
pub use mock_authority::{MockRegistrationAuthority, RecordedCall};
pub use mock_probe::MockLandingPageProbe;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use crate::authority::RegistrationAuthority;
    use crate::config::{LifecycleConfig, ValidatorConfig};
    use crate::ledger::TransactionLog;
    use crate::lifecycle::LifecycleManager;
    use crate::record::DoiRequest;
    use crate::validator::{LandingPageProbe, Validator};

    /// A request that passes the full rule set against the mock probe.
    pub fn doi_request(key: &str) -> DoiRequest {
        DoiRequest::new(key, format!("Dataset {}", key), "eng")
            .with_contributor("J. Doe")
            .with_publication_date("2024-01-15")
            .with_landing_page(format!("https://valid.example/{}", key))
            .with_description("Calibrated observations")
    }

    /// Wire a lifecycle manager from the given parts with default config.
    pub fn lifecycle_manager(
        log: Arc<dyn TransactionLog>,
        authority: Arc<dyn RegistrationAuthority>,
        probe: Arc<dyn LandingPageProbe>,
    ) -> LifecycleManager {
        LifecycleManager::new(
            LifecycleConfig::default(),
            log,
            authority,
            Arc::new(Validator::new(probe, ValidatorConfig::default())),
        )
    }
}
