use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Authority endpoint is set
/// - Timeouts and parallelism limits are non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let url = config.authority.url.trim();
    if url.is_empty() {
        return Err(ConfigError::ValidationError(
            "authority.url cannot be empty".to_string(),
        ));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "authority.url must be an http(s) URL, got {}",
            url
        )));
    }

    if config.authority.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "authority.timeout_secs cannot be 0".to_string(),
        ));
    }
    if config.validator.probe_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "validator.probe_timeout_secs cannot be 0".to_string(),
        ));
    }
    if config.lifecycle.external_call_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "lifecycle.external_call_timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.batch.max_parallel == 0 {
        return Err(ConfigError::ValidationError(
            "batch.max_parallel cannot be 0".to_string(),
        ));
    }
    if config.reconciler.max_concurrent_queries == 0 {
        return Err(ConfigError::ValidationError(
            "reconciler.max_concurrent_queries cannot be 0".to_string(),
        ));
    }
    if config.reconciler.enabled && config.reconciler.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reconciler.interval_secs cannot be 0 when the reconciler is enabled".to_string(),
        ));
    }

    Ok(())
}
