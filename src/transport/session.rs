use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::KiroConfig;
use crate::error::{upstream_error_message, GatewayError};
use crate::util::mask_credential;

use super::retry_policy::{should_retry_upstream_status, RetryPolicy};
use super::HttpTransport;

const GENERATE_PATH: &str = "/generateAssistantResponse";
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
const EXPIRY_SAFETY_MARGIN_SECS: u64 = 60;

const X_AMZ_USER_AGENT: HeaderName = HeaderName::from_static("x-amz-user-agent");
const X_CODEWHISPERER_OPTOUT: HeaderName = HeaderName::from_static("x-amzn-codewhisperer-optout");
const X_KIRO_AGENT_MODE: HeaderName = HeaderName::from_static("x-amzn-kiro-agent-mode");
const AMZ_SDK_INVOCATION_ID: HeaderName = HeaderName::from_static("amz-sdk-invocation-id");
const AMZ_SDK_REQUEST: HeaderName = HeaderName::from_static("amz-sdk-request");

#[must_use]
pub fn default_refresh_url(region: &str) -> String {
    format!("https://prod.{region}.auth.desktop.kiro.dev/refreshToken")
}

#[must_use]
pub fn default_api_base_url(region: &str) -> String {
    format!("https://codewhisperer.{region}.amazonaws.com")
}

/// Stable per-host identifier sent in user agents.
#[must_use]
pub fn machine_fingerprint() -> String {
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string());
    let digest = Sha256::digest(format!("{hostname}-kiro-gateway").as_bytes());
    hex::encode(digest)
}

/// Contents of an optional JSON credentials file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    refresh_token: Option<String>,
    access_token: Option<String>,
    profile_arn: Option<String>,
    region: Option<String>,
    expires_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    profile_arn: Option<String>,
    expires_in: Option<u64>,
}

struct Credentials {
    refresh_token: String,
    access_token: Option<String>,
    expires_at: Option<SystemTime>,
    profile_arn: Option<String>,
}

/// One authenticated upstream identity: a refresh token, the access token
/// minted from it and the endpoints it talks to.
///
/// Refreshes are single-flight: the credentials lock is held across the
/// refresh call so concurrent requests wait for one refresh.
pub struct KiroSession {
    transport: Arc<HttpTransport>,
    api_url: String,
    refresh_url: String,
    refresh_threshold: Duration,
    retry: RetryPolicy,
    fingerprint: Arc<str>,
    credentials: tokio::sync::Mutex<Credentials>,
}

impl KiroSession {
    /// Build the global session from the `kiro` config section, reading the
    /// credentials file when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the credentials file cannot be
    /// read or parsed, or when no refresh token is available.
    pub fn from_config(
        transport: Arc<HttpTransport>,
        config: &KiroConfig,
        fingerprint: Arc<str>,
    ) -> Result<Self, GatewayError> {
        let file = match config.creds_file.as_deref() {
            Some(path) => load_credentials_file(path)?,
            None => CredentialsFile::default(),
        };

        let refresh_token = file
            .refresh_token
            .or_else(|| config.refresh_token.clone())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GatewayError::Config("no Kiro refresh token configured".into()))?;
        let region = file.region.unwrap_or_else(|| config.region.clone());
        let expires_at = file.expires_at.as_deref().and_then(parse_expires_at);

        let mut session = Self::new(
            transport,
            config,
            &region,
            refresh_token,
            file.profile_arn.or_else(|| config.profile_arn.clone()),
            fingerprint,
        );
        if let Some(access_token) = file.access_token {
            let credentials = session.credentials.get_mut();
            credentials.access_token = Some(access_token);
            credentials.expires_at = expires_at;
        }
        Ok(session)
    }

    /// Build a session for a client-supplied refresh token.
    #[must_use]
    pub fn for_tenant(
        transport: Arc<HttpTransport>,
        config: &KiroConfig,
        refresh_token: String,
        fingerprint: Arc<str>,
    ) -> Self {
        Self::new(
            transport,
            config,
            &config.region,
            refresh_token,
            config.profile_arn.clone(),
            fingerprint,
        )
    }

    fn new(
        transport: Arc<HttpTransport>,
        config: &KiroConfig,
        region: &str,
        refresh_token: String,
        profile_arn: Option<String>,
        fingerprint: Arc<str>,
    ) -> Self {
        let api_base = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| default_api_base_url(region));
        let refresh_url = config
            .refresh_url
            .clone()
            .unwrap_or_else(|| default_refresh_url(region));
        Self {
            transport,
            api_url: format!("{}{GENERATE_PATH}", api_base.trim_end_matches('/')),
            refresh_url,
            refresh_threshold: Duration::from_secs(config.token_refresh_threshold_secs),
            retry: RetryPolicy::from_config(config),
            fingerprint,
            credentials: tokio::sync::Mutex::new(Credentials {
                refresh_token,
                access_token: None,
                expires_at: None,
                profile_arn: profile_arn.filter(|arn| !arn.is_empty()),
            }),
        }
    }

    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub async fn profile_arn(&self) -> Option<String> {
        self.credentials.lock().await.profile_arn.clone()
    }

    /// A valid access token, refreshing first when none is cached or the
    /// cached one expires within the refresh threshold.
    ///
    /// # Errors
    ///
    /// Returns the refresh error when a refresh was needed and failed.
    pub async fn access_token(&self) -> Result<String, GatewayError> {
        let mut credentials = self.credentials.lock().await;
        if let Some(token) = credentials.access_token.as_ref() {
            if !self.expiring_soon(credentials.expires_at) {
                return Ok(token.clone());
            }
        }
        self.refresh_locked(&mut credentials).await
    }

    /// Whether a cached access token exists and is outside the refresh window.
    pub async fn has_valid_token(&self) -> bool {
        let credentials = self.credentials.lock().await;
        credentials.access_token.is_some() && !self.expiring_soon(credentials.expires_at)
    }

    /// Refresh unconditionally, e.g. after the upstream rejected a token.
    ///
    /// # Errors
    ///
    /// Returns the refresh error.
    pub async fn force_refresh(&self) -> Result<String, GatewayError> {
        let mut credentials = self.credentials.lock().await;
        self.refresh_locked(&mut credentials).await
    }

    fn expiring_soon(&self, expires_at: Option<SystemTime>) -> bool {
        let Some(expires_at) = expires_at else {
            return true;
        };
        let threshold = SystemTime::now() + self.refresh_threshold;
        expires_at <= threshold
    }

    async fn refresh_locked(&self, credentials: &mut Credentials) -> Result<String, GatewayError> {
        tracing::info!(
            refresh_token = %mask_credential(&credentials.refresh_token),
            "refreshing Kiro access token"
        );
        let body = serde_json::to_vec(&serde_json::json!({
            "refreshToken": credentials.refresh_token,
        }))
        .map_err(|err| GatewayError::Internal(err.to_string()))?;
        let body = bytes::Bytes::from(body);

        let mut attempt = 0;
        let response = loop {
            let mut headers = http::HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(
                USER_AGENT,
                header_value(&format!("KiroGateway-{}", self.fingerprint_prefix(16))),
            );

            match self
                .transport
                .post_json(&self.refresh_url, headers, body.clone())
                .await
            {
                Ok(response) if response.status().is_success() => break response,
                Ok(response) => {
                    let status = response.status();
                    let retryable = should_retry_upstream_status(status);
                    if retryable && self.retry.has_attempt_after(attempt) {
                        let delay = self.retry.delay_for_response(response.headers(), attempt);
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            max_attempts = self.retry.max_attempts,
                            delay_ms = delay.as_millis(),
                            "token refresh failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    tracing::error!(status = status.as_u16(), "token refresh failed: {text}");
                    return Err(GatewayError::Auth(format!(
                        "Token refresh failed: HTTP {}: {}",
                        status.as_u16(),
                        upstream_error_message(&text)
                    )));
                }
                Err(err) => {
                    if !self.retry.has_attempt_after(attempt) {
                        tracing::error!(attempts = attempt + 1, "token refresh failed: {err}");
                        return Err(err);
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        "token refresh failed: {err}, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Auth(format!("Token refresh returned invalid JSON: {err}")))?;
        let Some(access_token) = refreshed.access_token.filter(|token| !token.is_empty()) else {
            return Err(GatewayError::Auth(
                "Token refresh response does not contain accessToken".into(),
            ));
        };

        if let Some(refresh_token) = refreshed.refresh_token.filter(|token| !token.is_empty()) {
            credentials.refresh_token = refresh_token;
        }
        if let Some(profile_arn) = refreshed.profile_arn.filter(|arn| !arn.is_empty()) {
            credentials.profile_arn = Some(profile_arn);
        }
        let expires_in = refreshed
            .expires_in
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .saturating_sub(EXPIRY_SAFETY_MARGIN_SECS);
        credentials.expires_at = Some(SystemTime::now() + Duration::from_secs(expires_in));
        credentials.access_token = Some(access_token.clone());
        tracing::info!(expires_in_secs = expires_in, "Kiro access token refreshed");
        Ok(access_token)
    }

    /// Headers for a `generateAssistantResponse` call.
    #[must_use]
    pub fn request_headers(&self, access_token: &str) -> http::HeaderMap {
        let fingerprint = self.fingerprint_prefix(32);
        let mut headers = http::HeaderMap::with_capacity(8);
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {access_token}")),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            header_value(&format!(
                "aws-sdk-js/1.0.27 ua/2.1 os/linux lang/rust KiroGateway-{fingerprint}"
            )),
        );
        headers.insert(
            X_AMZ_USER_AGENT,
            header_value(&format!("aws-sdk-js/1.0.27 KiroGateway-{fingerprint}")),
        );
        headers.insert(X_CODEWHISPERER_OPTOUT, HeaderValue::from_static("true"));
        headers.insert(X_KIRO_AGENT_MODE, HeaderValue::from_static("vibe"));
        headers.insert(
            AMZ_SDK_INVOCATION_ID,
            header_value(&random_uuid().to_string()),
        );
        headers.insert(AMZ_SDK_REQUEST, HeaderValue::from_static("attempt=1; max=3"));
        headers
    }

    /// POST a payload to `generateAssistantResponse`.
    ///
    /// A 403 forces a token refresh; 429 and 5xx back off. Both consume an
    /// attempt of `kiro.max_retries`. Any other status, or the last
    /// attempt's status, is returned to the caller unread.
    ///
    /// # Errors
    ///
    /// Returns token refresh errors, and [`GatewayError::Transport`] when the
    /// last attempt fails without a response.
    pub async fn send_generate(&self, body: bytes::Bytes) -> Result<reqwest::Response, GatewayError> {
        let mut attempt = 0;
        loop {
            let token = self.access_token().await?;
            let headers = self.request_headers(&token);
            match self.transport.post_json(&self.api_url, headers, body.clone()).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || !self.retry.has_attempt_after(attempt) {
                        return Ok(response);
                    }
                    if status == http::StatusCode::FORBIDDEN {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_attempts = self.retry.max_attempts,
                            "upstream returned 403, refreshing token"
                        );
                        drop(response);
                        self.force_refresh().await?;
                    } else if should_retry_upstream_status(status) {
                        let delay = self.retry.delay_for_response(response.headers(), attempt);
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            max_attempts = self.retry.max_attempts,
                            delay_ms = delay.as_millis(),
                            "upstream returned retriable status"
                        );
                        drop(response);
                        tokio::time::sleep(delay).await;
                    } else {
                        return Ok(response);
                    }
                }
                Err(err) => {
                    if !self.retry.has_attempt_after(attempt) {
                        return Err(err);
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        "upstream request failed: {err}, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }

    fn fingerprint_prefix(&self, len: usize) -> &str {
        self.fingerprint.get(..len).unwrap_or(&self.fingerprint)
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| {
        tracing::warn!("dropping header value with invalid characters");
        HeaderValue::from_static("")
    })
}

fn load_credentials_file(path: &str) -> Result<CredentialsFile, GatewayError> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        GatewayError::Config(format!("failed to read credentials file {path}: {err}"))
    })?;
    let file: CredentialsFile = serde_json::from_str(&content).map_err(|err| {
        GatewayError::Config(format!("failed to parse credentials file {path}: {err}"))
    })?;
    tracing::info!(path, "credentials loaded from file");
    Ok(file)
}

fn parse_expires_at(raw: &str) -> Option<SystemTime> {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(at) => Some(SystemTime::from(at.with_timezone(&chrono::Utc))),
        Err(err) => {
            tracing::warn!("ignoring unparsable expiresAt {raw:?}: {err}");
            None
        }
    }
}

fn random_uuid() -> uuid::Uuid {
    let mut bytes = [0u8; 16];
    fastrand::fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}
