use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::GatewayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    use_env_proxy: bool,
) -> Result<reqwest::Client, GatewayError> {
    // No overall timeout: streaming bodies are bounded by the orchestrator.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client shared by every upstream session.
pub struct HttpTransport {
    client: reqwest::Client,
    response_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with connection pooling from the given server config.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };

        let client = match build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            config.http_use_env_proxy,
        ) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(error = %err, "failed to build configured reqwest client, falling back to default client");
                reqwest::Client::new()
            }
        };

        Self {
            client,
            response_timeout: Duration::from_secs(config.timeout.max(1)),
        }
    }

    /// POST a JSON body once and wait for the response head.
    ///
    /// The body is left unread so callers can stream it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the request fails or no
    /// response head arrives within `server.timeout`.
    pub async fn post_json(
        &self,
        url: &str,
        headers: http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, GatewayError> {
        let request = self.client.post(url).headers(headers).body(body);
        match tokio::time::timeout(self.response_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(GatewayError::Transport(err.to_string())),
            Err(_) => Err(GatewayError::Transport(format!(
                "no response from {url} within {}s",
                self.response_timeout.as_secs()
            ))),
        }
    }
}
