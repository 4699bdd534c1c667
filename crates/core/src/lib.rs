pub mod authority;
pub mod batch;
pub mod config;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod reconciler;
pub mod record;
pub mod testing;
pub mod validator;

pub use authority::{
    HttpRegistrationClient, RegistrationAuthority, RegistrationError, RemoteStatus,
};
pub use batch::{BatchJob, BatchOutcome, BatchProcessor, RecordOutcome};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use ledger::{LedgerError, RecordFilter, SqliteTransactionLog, Transaction, TransactionLog};
pub use lifecycle::{LifecycleError, LifecycleManager, SubmitMode};
pub use reconciler::{PendingReconciler, ReconcileReport};
pub use record::{DoiRequest, DoiState, IdentifierRecord};
pub use validator::{HttpLandingPageProbe, RuleSet, Validator, Violation};
