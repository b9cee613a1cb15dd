pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Overall timeout for non-streaming upstream calls (token refresh).
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_max_request_body_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            base_path: String::new(),
            http_use_env_proxy: false,
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

/// Upstream (Kiro) credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiroConfig {
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub profile_arn: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// JSON credentials file; its values override the inline ones.
    #[serde(default)]
    pub creds_file: Option<String>,
    /// Override for `https://codewhisperer.{region}.amazonaws.com`.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Override for `https://prod.{region}.auth.desktop.kiro.dev/refreshToken`.
    #[serde(default)]
    pub refresh_url: Option<String>,
    #[serde(default = "default_token_refresh_threshold_secs")]
    pub token_refresh_threshold_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_token_refresh_threshold_secs() -> u64 {
    600
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_retry_delay_ms() -> u64 {
    1000
}

impl Default for KiroConfig {
    fn default() -> Self {
        Self {
            refresh_token: None,
            profile_arn: None,
            region: default_region(),
            creds_file: None,
            api_base_url: None,
            refresh_url: None,
            token_refresh_threshold_secs: default_token_refresh_threshold_secs(),
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
        }
    }
}

/// Client authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    pub proxy_api_key: String,
    /// Accept `PROXY_API_KEY:REFRESH_TOKEN` keys that carry their own credentials.
    #[serde(default = "default_true")]
    pub multi_tenant: bool,
}

/// First-token and per-chunk timeout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_first_token_timeout_secs")]
    pub first_token_timeout_secs: f64,
    #[serde(default = "default_first_token_max_retries")]
    pub first_token_max_retries: u32,
    #[serde(default = "default_stream_read_timeout_secs")]
    pub stream_read_timeout_secs: f64,
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,
    #[serde(default = "default_slow_model_patterns")]
    pub slow_model_patterns: Vec<String>,
    #[serde(default = "default_slow_model_timeout_multiplier")]
    pub slow_model_timeout_multiplier: f64,
}

fn default_first_token_timeout_secs() -> f64 {
    15.0
}
fn default_first_token_max_retries() -> u32 {
    3
}
fn default_stream_read_timeout_secs() -> f64 {
    300.0
}
fn default_max_consecutive_timeouts() -> u32 {
    3
}
fn default_slow_model_patterns() -> Vec<String> {
    vec!["opus".to_string()]
}
fn default_slow_model_timeout_multiplier() -> f64 {
    3.0
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            first_token_timeout_secs: default_first_token_timeout_secs(),
            first_token_max_retries: default_first_token_max_retries(),
            stream_read_timeout_secs: default_stream_read_timeout_secs(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
            slow_model_patterns: default_slow_model_patterns(),
            slow_model_timeout_multiplier: default_slow_model_timeout_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCacheConfig {
    #[serde(default = "default_auth_cache_max_size")]
    pub max_size: usize,
}

fn default_auth_cache_max_size() -> usize {
    100
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_auth_cache_max_size(),
        }
    }
}

/// Model metadata and naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_max_input_tokens")]
    pub default_max_input_tokens: u64,
    /// Per-model context window overrides, keyed by public or internal id.
    #[serde(default)]
    pub max_input_tokens: BTreeMap<String, u64>,
    /// Extra public name -> internal id mappings.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

fn default_max_input_tokens() -> u64 {
    200_000
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_max_input_tokens: default_max_input_tokens(),
            max_input_tokens: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Longer tool descriptions move into the system prompt. 0 disables.
    #[serde(default = "default_tool_description_max_length")]
    pub tool_description_max_length: usize,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_tool_description_max_length() -> usize {
    4000
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tool_description_max_length: default_tool_description_max_length(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub kiro: KiroConfig,
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub auth_cache: AuthCacheConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// A config with defaults everywhere, for embedding and tests.
    #[must_use]
    pub fn with_credentials(proxy_api_key: &str, refresh_token: &str) -> Self {
        Self {
            server: ServerConfig::default(),
            kiro: KiroConfig {
                refresh_token: Some(refresh_token.to_string()),
                ..KiroConfig::default()
            },
            client_authentication: ClientAuthConfig {
                proxy_api_key: proxy_api_key.to_string(),
                multi_tenant: true,
            },
            streaming: StreamingConfig::default(),
            auth_cache: AuthCacheConfig::default(),
            models: ModelsConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.kiro.region, "us-east-1");
        assert!(config.client_authentication.multi_tenant);
        assert_eq!(config.streaming.first_token_max_retries, 3);
        assert_eq!(config.auth_cache.max_size, 100);
        assert_eq!(config.models.default_max_input_tokens, 200_000);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = "kiro:\n  refresh_token: rt\nclient_authentication:\n  proxy_api_key: secret\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.streaming.first_token_timeout_secs, 15.0);
        assert_eq!(config.streaming.stream_read_timeout_secs, 300.0);
        assert_eq!(config.streaming.max_consecutive_timeouts, 3);
        assert_eq!(config.streaming.slow_model_patterns, vec!["opus"]);
        assert_eq!(config.kiro.token_refresh_threshold_secs, 600);
        assert_eq!(config.features.tool_description_max_length, 4000);
        assert!(validate_config(&config).is_ok());
    }
}
