//! # Authentication Gate
//!
//! Every websocket upgrade carries a `token` query parameter. Before a session may
//! relay anything the token is checked by a [`TokenVerifier`]; any failure closes the
//! client with code 1008 and no upstream connection is ever opened.
//!
//! ## Verifiers:
//! - [`firebase::FirebaseTokenVerifier`]: Firebase ID tokens (RS256, Google key set)
//! - [`StaticTokenVerifier`]: fixed tokens from configuration, for local runs
//!
//! A missing or empty token fails fast without calling the verifier at all.

pub mod credentials;
pub mod firebase;

use crate::config::StaticToken;
use crate::error::AuthError;
use actix_web::web::Query;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Who the token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;

    fn name(&self) -> &'static str;
}

/// Pull the `token` parameter out of a request query string.
pub fn extract_token(query: &str) -> Option<String> {
    Query::<HashMap<String, String>>::from_query(query)
        .ok()
        .and_then(|params| params.into_inner().remove("token"))
        .filter(|token| !token.trim().is_empty())
}

/// Accepts only the tokens listed in configuration.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: &[StaticToken]) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|t| (t.token.clone(), t.subject.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .map(|subject| Identity {
                subject: subject.clone(),
            })
            .ok_or_else(|| AuthError::Rejected("unknown token".to_string()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// The check run once per connection attempt.
#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn TokenVerifier>,
    timeout: Duration,
}

impl AuthGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>, timeout: Duration) -> Self {
        Self { verifier, timeout }
    }

    pub fn verifier_name(&self) -> &'static str {
        self.verifier.name()
    }

    /// Verify the token found on the upgrade request. A verifier that does not answer
    /// within the timeout counts as a failure.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = match token.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AuthError::MissingToken),
        };

        debug!(verifier = self.verifier.name(), "Verifying client token");
        match tokio::time::timeout(self.timeout, self.verifier.verify(token)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Service(format!(
                "verification timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingVerifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenVerifier for CountingVerifier {
        async fn verify(&self, _token: &str) -> Result<Identity, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Identity {
                subject: "someone".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct SlowVerifier;

    #[async_trait]
    impl TokenVerifier for SlowVerifier {
        async fn verify(&self, _token: &str) -> Result<Identity, AuthError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Identity {
                subject: "late".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn static_verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new(&[StaticToken {
            token: "dev-token".to_string(),
            subject: "dev-user".to_string(),
        }])
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token("token=abc.def"), Some("abc.def".to_string()));
        assert_eq!(extract_token("mode=chat&token=a%2Bb"), Some("a+b".to_string()));
        assert_eq!(extract_token("token="), None);
        assert_eq!(extract_token("mode=chat"), None);
        assert_eq!(extract_token(""), None);
    }

    #[tokio::test]
    async fn test_missing_token_skips_verifier() {
        let verifier = Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(verifier.clone(), Duration::from_secs(1));

        assert!(matches!(gate.authenticate(None).await, Err(AuthError::MissingToken)));
        assert!(matches!(gate.authenticate(Some("  ")).await, Err(AuthError::MissingToken)));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);

        let identity = gate.authenticate(Some("anything")).await.unwrap();
        assert_eq!(identity.subject, "someone");
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let gate = AuthGate::new(Arc::new(static_verifier()), Duration::from_secs(1));

        let identity = gate.authenticate(Some("dev-token")).await.unwrap();
        assert_eq!(identity.subject, "dev-user");

        let err = gate.authenticate(Some("forged")).await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_slow_verifier_times_out() {
        let gate = AuthGate::new(Arc::new(SlowVerifier), Duration::from_millis(20));
        let err = gate.authenticate(Some("token")).await.unwrap_err();
        assert!(matches!(err, AuthError::Service(_)));
    }
}
