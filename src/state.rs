mod auth_cache;
mod request_id;

use std::sync::Arc;

use crate::auth::{authenticate, ClientCredential};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::observability::metrics::{MetricsSink, TracingMetricsSink};
use crate::protocol::kiro::models::ModelCatalog;
use crate::transport::{machine_fingerprint, HttpTransport, KiroSession};

use auth_cache::AuthCache;
use request_id::ConversationIdGenerator;

/// The session a request runs on.
pub struct SessionHandle<'a> {
    pub session: Arc<KiroSession>,
    /// Set for multi-tenant keys; the tenant's cache key.
    pub tenant: Option<&'a str>,
}

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub models: ModelCatalog,
    transport: Arc<HttpTransport>,
    fingerprint: Arc<str>,
    global_session: Arc<KiroSession>,
    tenant_sessions: AuthCache<KiroSession>,
    metrics: Arc<dyn MetricsSink>,
    conversation_ids: ConversationIdGenerator,
}

impl AppState {
    /// Build state with the default tracing metrics sink.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the global session cannot be
    /// built from the `kiro` section.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        Self::with_metrics_sink(config, Arc::new(TracingMetricsSink))
    }

    /// # Errors
    ///
    /// Same as [`AppState::new`].
    pub fn with_metrics_sink(
        config: AppConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, GatewayError> {
        let transport = Arc::new(HttpTransport::new(&config.server));
        let fingerprint: Arc<str> = Arc::from(machine_fingerprint());
        let global_session = Arc::new(KiroSession::from_config(
            Arc::clone(&transport),
            &config.kiro,
            Arc::clone(&fingerprint),
        )?);
        Ok(Self {
            models: ModelCatalog::new(&config.models),
            tenant_sessions: AuthCache::new(config.auth_cache.max_size),
            config,
            transport,
            fingerprint,
            global_session,
            metrics,
            conversation_ids: ConversationIdGenerator::new(),
        })
    }

    /// Authenticate a request and pick the session it runs on.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Auth`] when the client key is invalid.
    pub fn authenticate<'h>(
        &self,
        headers: &'h http::HeaderMap,
    ) -> Result<SessionHandle<'h>, GatewayError> {
        match authenticate(headers, &self.config.client_authentication)? {
            ClientCredential::Global => Ok(SessionHandle {
                session: Arc::clone(&self.global_session),
                tenant: None,
            }),
            ClientCredential::Tenant { refresh_token } => Ok(SessionHandle {
                session: self.tenant_session(refresh_token),
                tenant: Some(refresh_token),
            }),
        }
    }

    pub async fn global_token_valid(&self) -> bool {
        self.global_session.has_valid_token().await
    }

    /// Session for a client-supplied refresh token, created on first use.
    #[must_use]
    pub fn tenant_session(&self, refresh_token: &str) -> Arc<KiroSession> {
        self.tenant_sessions.get_or_create_with(refresh_token, || {
            KiroSession::for_tenant(
                Arc::clone(&self.transport),
                &self.config.kiro,
                refresh_token.to_string(),
                Arc::clone(&self.fingerprint),
            )
        })
    }

    /// Drop a cached tenant session, e.g. after its refresh token was rejected.
    pub fn evict_tenant_session(&self, refresh_token: &str) -> bool {
        self.tenant_sessions.remove(refresh_token)
    }

    pub fn clear_tenant_sessions(&self) {
        self.tenant_sessions.clear();
    }

    #[must_use]
    pub fn tenant_session_count(&self) -> usize {
        self.tenant_sessions.len()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.metrics)
    }

    #[must_use]
    pub fn next_conversation_id(&self) -> String {
        self.conversation_ids.next_id().to_string()
    }
}
