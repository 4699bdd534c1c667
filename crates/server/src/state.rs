use std::sync::Arc;

use registrar_core::{
    authority::RegistrationAuthority,
    validator::LandingPageProbe,
    BatchProcessor, Config, LifecycleManager, PendingReconciler, SanitizedConfig, TransactionLog,
    Validator,
};

/// Shared application state
pub struct AppState {
    config: Config,
    manager: Arc<LifecycleManager>,
    batch: BatchProcessor,
    reconciler: Arc<PendingReconciler>,
}

impl AppState {
    /// Wire the lifecycle engine from its collaborators.
    pub fn new(
        config: Config,
        log: Arc<dyn TransactionLog>,
        authority: Arc<dyn RegistrationAuthority>,
        probe: Arc<dyn LandingPageProbe>,
    ) -> Self {
        let validator = Arc::new(Validator::new(probe, config.validator.clone()));
        let manager = Arc::new(LifecycleManager::new(
            config.lifecycle.clone(),
            log,
            authority,
            validator,
        ));
        let batch = BatchProcessor::new(Arc::clone(&manager), config.batch.clone());
        let reconciler = Arc::new(PendingReconciler::new(
            Arc::clone(&manager),
            config.reconciler.clone(),
        ));

        Self {
            config,
            manager,
            batch,
            reconciler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn manager(&self) -> &LifecycleManager {
        self.manager.as_ref()
    }

    pub fn batch(&self) -> &BatchProcessor {
        &self.batch
    }

    pub fn reconciler(&self) -> &Arc<PendingReconciler> {
        &self.reconciler
    }
}
