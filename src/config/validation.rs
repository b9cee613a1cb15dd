use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_client_auth(config)?;
    validate_kiro_config(config)?;
    validate_streaming_config(config)?;
    validate_models_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.max_request_body_bytes == 0 {
        return Err(validation_err(
            "server.max_request_body_bytes must be greater than 0",
        ));
    }
    if server.runtime_worker_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_worker_threads must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_client_auth(config: &AppConfig) -> Result<(), ConfigError> {
    let key = &config.client_authentication.proxy_api_key;
    if key.trim().is_empty() {
        return Err(validation_err(
            "client_authentication.proxy_api_key cannot be empty",
        ));
    }
    if key.contains(':') {
        return Err(validation_err(
            "client_authentication.proxy_api_key must not contain ':'",
        ));
    }
    Ok(())
}

fn validate_kiro_config(config: &AppConfig) -> Result<(), ConfigError> {
    let kiro = &config.kiro;
    let has_token = kiro
        .refresh_token
        .as_deref()
        .is_some_and(|token| !token.trim().is_empty());
    let has_creds_file = kiro
        .creds_file
        .as_deref()
        .is_some_and(|path| !path.trim().is_empty());
    if !has_token && !has_creds_file {
        return Err(validation_err(
            "kiro.refresh_token or kiro.creds_file must be set",
        ));
    }
    if kiro.region.trim().is_empty() {
        return Err(validation_err("kiro.region cannot be empty"));
    }
    if kiro.max_retries == 0 {
        return Err(validation_err("kiro.max_retries must be greater than 0"));
    }
    validate_http_url("kiro.api_base_url", kiro.api_base_url.as_deref())?;
    validate_http_url("kiro.refresh_url", kiro.refresh_url.as_deref())?;
    Ok(())
}

fn validate_http_url(field_name: &str, value: Option<&str>) -> Result<(), ConfigError> {
    let Some(value) = value.map(str::trim) else {
        return Ok(());
    };
    let parsed = url::Url::parse(value)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_streaming_config(config: &AppConfig) -> Result<(), ConfigError> {
    let streaming = &config.streaming;
    if !is_positive_secs(streaming.first_token_timeout_secs) {
        return Err(validation_err(
            "streaming.first_token_timeout_secs must be greater than 0",
        ));
    }
    if !is_positive_secs(streaming.stream_read_timeout_secs) {
        return Err(validation_err(
            "streaming.stream_read_timeout_secs must be greater than 0",
        ));
    }
    if streaming.first_token_max_retries == 0 {
        return Err(validation_err(
            "streaming.first_token_max_retries must be greater than 0",
        ));
    }
    if !streaming.slow_model_timeout_multiplier.is_finite()
        || streaming.slow_model_timeout_multiplier < 1.0
    {
        return Err(validation_err(
            "streaming.slow_model_timeout_multiplier must be at least 1.0",
        ));
    }
    if config.auth_cache.max_size == 0 {
        return Err(validation_err("auth_cache.max_size must be greater than 0"));
    }
    Ok(())
}

fn is_positive_secs(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn validate_models_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.models.default_max_input_tokens == 0 {
        return Err(validation_err(
            "models.default_max_input_tokens must be greater than 0",
        ));
    }
    for (model, tokens) in &config.models.max_input_tokens {
        if *tokens == 0 {
            return Err(validation_err(format!(
                "models.max_input_tokens['{model}'] must be greater than 0"
            )));
        }
    }
    for (alias, target) in &config.models.aliases {
        if alias.trim().is_empty() || target.trim().is_empty() {
            return Err(validation_err(format!(
                "Invalid alias '{alias}' -> '{target}'. Both parts must not be empty."
            )));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "TRACE", "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED",
    ];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
