use http::header::{HeaderName, AUTHORIZATION};

use crate::config::ClientAuthConfig;
use crate::error::GatewayError;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
const INVALID_KEY_MESSAGE: &str = "Invalid or missing API Key";

/// Which upstream identity a client key resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCredential<'a> {
    /// The bare proxy key: use the configured global session.
    Global,
    /// `PROXY_KEY:REFRESH_TOKEN`: use the caller's own refresh token.
    Tenant { refresh_token: &'a str },
}

/// Extract the client key: `x-api-key` first, then `Authorization: Bearer`.
#[must_use]
pub fn extract_api_key(headers: &http::HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(X_API_KEY).and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Resolve request headers to a credential.
///
/// # Errors
///
/// Returns [`GatewayError::Auth`] when the key is missing, does not match
/// the proxy key, or carries a refresh token while multi-tenant mode is off.
pub fn authenticate<'a>(
    headers: &'a http::HeaderMap,
    config: &ClientAuthConfig,
) -> Result<ClientCredential<'a>, GatewayError> {
    let Some(key) = extract_api_key(headers) else {
        return Err(invalid_key());
    };

    if key == config.proxy_api_key {
        return Ok(ClientCredential::Global);
    }

    match key.split_once(':') {
        Some((proxy_key, refresh_token))
            if config.multi_tenant
                && proxy_key == config.proxy_api_key
                && !refresh_token.is_empty() =>
        {
            Ok(ClientCredential::Tenant { refresh_token })
        }
        _ => Err(invalid_key()),
    }
}

fn invalid_key() -> GatewayError {
    GatewayError::Auth(INVALID_KEY_MESSAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(multi_tenant: bool) -> ClientAuthConfig {
        ClientAuthConfig {
            proxy_api_key: "secret".into(),
            multi_tenant,
        }
    }

    fn headers(name: &str, value: &str) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_bearer_proxy_key_is_global() {
        let headers = headers("authorization", "Bearer secret");
        assert_eq!(
            authenticate(&headers, &config(true)).unwrap(),
            ClientCredential::Global
        );
    }

    #[test]
    fn test_x_api_key_takes_precedence() {
        let mut headers = headers("x-api-key", "secret");
        headers.insert(AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert_eq!(extract_api_key(&headers), Some("secret"));
        assert!(authenticate(&headers, &config(true)).is_ok());
    }

    #[test]
    fn test_tenant_key_carries_refresh_token() {
        let headers = headers("x-api-key", "secret:my-refresh:token");
        assert_eq!(
            authenticate(&headers, &config(true)).unwrap(),
            ClientCredential::Tenant {
                refresh_token: "my-refresh:token"
            }
        );
    }

    #[test]
    fn test_tenant_key_rejected_when_multi_tenant_off() {
        let headers = headers("x-api-key", "secret:my-refresh");
        let err = authenticate(&headers, &config(false)).unwrap_err();
        assert!(matches!(err, GatewayError::Auth(ref msg) if msg == INVALID_KEY_MESSAGE));
    }

    #[test]
    fn test_wrong_or_missing_key_rejected() {
        assert!(authenticate(&headers("authorization", "Bearer nope"), &config(true)).is_err());
        assert!(authenticate(&headers("x-api-key", "other:rt"), &config(true)).is_err());
        assert!(authenticate(&headers("x-api-key", "secret:"), &config(true)).is_err());
        assert!(authenticate(&http::HeaderMap::new(), &config(true)).is_err());
    }
}
