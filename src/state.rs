//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every websocket actor.
//!
//! ## What lives here:
//! - **Configuration and secrets**: read-only after startup, so a plain `Arc` is enough
//! - **Service handles**: the authentication gate and the query dispatcher, built once
//!   in `main` and injected as trait objects so tests can swap them out
//! - **Metrics**: counters updated by the middleware and by relay sessions
//!
//! ## Arc<RwLock<T>> Pattern
//! Metrics are written by many sessions at once, so they sit behind
//! `Arc<RwLock<AppMetrics>>`:
//! - **Arc**: every worker thread holds a reference to the same counters
//! - **RwLock**: many readers (health checks) or one writer (a session update)
//!
//! A poisoned lock only means another thread panicked mid-update; the counters are
//! still usable, so the guard is recovered instead of propagating the panic.

use crate::auth::credentials::ServiceAccount;
use crate::auth::firebase::FirebaseTokenVerifier;
use crate::auth::{AuthGate, StaticTokenVerifier, TokenVerifier};
use crate::completion::OpenAiCompletionClient;
use crate::config::{AppConfig, Secrets, VerifierKind};
use crate::dispatch::intent::RegexExpertiseExtractor;
use crate::dispatch::QueryDispatcher;
use crate::relay::session::RelayStats;
use crate::store::build_store;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::info;

/// External-service handles shared by all sessions.
#[derive(Clone)]
pub struct Services {
    pub auth: AuthGate,
    pub dispatcher: QueryDispatcher,
    /// Backend name reported by the health endpoint
    pub store_backend: &'static str,
}

impl Services {
    /// Wire up the production collaborators from configuration.
    pub async fn build(config: &AppConfig, secrets: &Secrets) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("voice-relay-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let verifier: Arc<dyn TokenVerifier> = match config.auth.verifier {
            VerifierKind::Firebase => {
                let raw = secrets.firebase_credentials.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("FIREBASE_CREDENTIALS is required for the Firebase verifier")
                })?;
                let account = ServiceAccount::load(raw)?;
                Arc::new(FirebaseTokenVerifier::new(
                    client.clone(),
                    config.auth.jwks_url.clone(),
                    account.project_id,
                ))
            }
            VerifierKind::Static => Arc::new(StaticTokenVerifier::new(&config.auth.static_tokens)),
        };
        let auth = AuthGate::new(verifier, Duration::from_millis(config.auth.verify_timeout_ms));

        let store = build_store(
            &config.store,
            secrets.firebase_credentials.as_deref(),
            client.clone(),
        )
        .await?;
        let store_backend = store.name();

        let completion = Arc::new(OpenAiCompletionClient::new(
            client,
            secrets.openai_api_key.clone(),
            &config.completion,
        ));
        let dispatcher = QueryDispatcher::new(
            completion,
            store,
            Arc::new(RegexExpertiseExtractor::new()),
            config.store.collection.clone(),
            config.completion.fallback_message.clone(),
        );

        info!(
            verifier = auth.verifier_name(),
            store = store_backend,
            model = %config.completion.model,
            "Services initialized"
        );

        Ok(Self {
            auth,
            dispatcher,
            store_backend,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub secrets: Arc<Secrets>,
    pub services: Services,
    pub metrics: Arc<RwLock<AppMetrics>>,
    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// Counters collected since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed
    pub request_count: u64,

    /// Requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Relay sessions currently open
    pub active_sessions: u32,

    /// Relay sessions accepted since start
    pub sessions_opened: u64,

    /// Connection attempts closed with "Authentication failed"
    pub auth_failures: u64,

    /// Upgrades refused because the session limit was reached
    pub sessions_rejected: u64,

    /// Websocket handshakes answered with 101
    pub upgrades_accepted: u64,

    /// Websocket handshakes answered with anything else
    pub upgrades_refused: u64,

    pub chat_queries: u64,

    pub frames_client_to_upstream: u64,
    pub frames_upstream_to_client: u64,
    pub frames_dropped: u64,

    /// Per-endpoint statistics, keyed by e.g. "GET /health"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, secrets: Secrets, services: Services) -> Self {
        Self {
            config: Arc::new(config),
            secrets: Arc::new(secrets),
            services,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.as_ref().clone()
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record one finished request for `endpoint` (e.g. "GET /health").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Reserve a slot for a new relay session. Returns `false` when the configured
    /// limit is already reached; check and increment happen under one lock.
    pub fn try_open_session(&self) -> bool {
        let limit = self.config.performance.max_concurrent_sessions;
        let mut metrics = self.metrics_mut();

        if metrics.active_sessions as usize >= limit {
            metrics.sessions_rejected += 1;
            return false;
        }

        metrics.active_sessions += 1;
        metrics.sessions_opened += 1;
        true
    }

    /// Release a session slot and fold its frame counters into the totals.
    pub fn close_session(&self, stats: RelayStats) {
        let mut metrics = self.metrics_mut();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
        metrics.frames_client_to_upstream += stats.client_to_upstream;
        metrics.frames_upstream_to_client += stats.upstream_to_client;
        metrics.frames_dropped += stats.dropped;
    }

    pub fn record_upgrade(&self, accepted: bool) {
        let mut metrics = self.metrics_mut();
        if accepted {
            metrics.upgrades_accepted += 1;
        } else {
            metrics.upgrades_refused += 1;
        }
    }

    pub fn record_auth_failure(&self) {
        self.metrics_mut().auth_failures += 1;
    }

    pub fn record_chat_query(&self) {
        self.metrics_mut().chat_queries += 1;
    }

    /// Consistent copy of all counters, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::StaticTokenVerifier;
    use crate::completion::CompletionService;
    use crate::config::{StaticToken, StoreBackend, VerifierKind};
    use crate::dispatch::intent::RegexExpertiseExtractor;
    use crate::error::CompletionError;
    use crate::store::memory::InMemoryPartnerStore;
    use async_trait::async_trait;
    use std::time::Duration;

    pub struct CannedCompletion(pub String);

    #[async_trait]
    impl CompletionService for CannedCompletion {
        async fn complete(&self, _query: &str) -> Result<String, CompletionError> {
            Ok(self.0.clone())
        }
    }

    /// State with a static verifier accepting `good-token`, an empty in-memory store
    /// and a completion service that always answers "ok".
    pub fn test_state(max_sessions: usize) -> AppState {
        let mut config = AppConfig::default();
        config.auth.verifier = VerifierKind::Static;
        config.auth.static_tokens = vec![StaticToken {
            token: "good-token".to_string(),
            subject: "tester".to_string(),
        }];
        config.store.backend = StoreBackend::Memory;
        config.performance.max_concurrent_sessions = max_sessions;

        let verifier = Arc::new(StaticTokenVerifier::new(&config.auth.static_tokens));
        let dispatcher = QueryDispatcher::new(
            Arc::new(CannedCompletion("ok".to_string())),
            Arc::new(InMemoryPartnerStore::new()),
            Arc::new(RegexExpertiseExtractor::new()),
            config.store.collection.clone(),
            config.completion.fallback_message.clone(),
        );
        let services = Services {
            auth: AuthGate::new(verifier, Duration::from_secs(1)),
            dispatcher,
            store_backend: "memory",
        };
        let secrets = Secrets {
            openai_api_key: "sk-test".to_string(),
            firebase_credentials: None,
        };

        AppState::new(config, secrets, services)
    }
}
