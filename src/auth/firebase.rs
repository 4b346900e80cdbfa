//! Firebase ID token verification.
//!
//! A token is accepted when:
//! - its header names `RS256` and a `kid` present in Google's published key set
//! - the signature verifies against that key
//! - `aud` is the project id and `iss` is `https://securetoken.google.com/<project id>`
//! - it has not expired and `sub` is non-empty
//!
//! The key set is cached for an hour. An unknown `kid` triggers at most one refresh
//! per minute, which covers Google's key rotation.

use super::{Identity, TokenVerifier};
use crate::error::AuthError;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

const KEY_SET_TTL: Duration = Duration::from_secs(3600);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

pub struct FirebaseTokenVerifier {
    client: reqwest::Client,
    jwks_url: String,
    project_id: String,
    keys: RwLock<Option<CachedKeys>>,
}

impl FirebaseTokenVerifier {
    pub fn new(client: reqwest::Client, jwks_url: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            client,
            jwks_url: jwks_url.into(),
            project_id: project_id.into(),
            keys: RwLock::new(None),
        }
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        let response = self.client.get(&self.jwks_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Service(format!("key set endpoint returned {}", status)));
        }

        let set: JwkSet = response.json().await?;
        info!(keys = set.keys.len(), "Fetched token signing keys");
        Ok(set)
    }

    /// Decoding key for `kid`, refreshing the cached set when it is stale or does not
    /// know the key yet. Concurrent misses share one refresh.
    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(answer) = cached_key(self.keys.read().await.as_ref(), kid) {
            return answer;
        }

        let mut cached = self.keys.write().await;
        // Another verification may have refreshed while this one waited for the lock
        if let Some(answer) = cached_key(cached.as_ref(), kid) {
            return answer;
        }

        let set = self.fetch_keys().await?;
        let key = match set.find(kid) {
            Some(jwk) => DecodingKey::from_jwk(jwk).map_err(|e| AuthError::Service(e.to_string())),
            None => Err(AuthError::Rejected(format!("unknown signing key {}", kid))),
        };
        *cached = Some(CachedKeys {
            set,
            fetched_at: Instant::now(),
        });
        key
    }
}

/// Answer from the cache, or `None` when a refresh is due.
fn cached_key(cached: Option<&CachedKeys>, kid: &str) -> Option<Result<DecodingKey, AuthError>> {
    let cached = cached?;
    let age = cached.fetched_at.elapsed();
    if age >= KEY_SET_TTL {
        return None;
    }
    match cached.set.find(kid) {
        Some(jwk) => Some(DecodingKey::from_jwk(jwk).map_err(|e| AuthError::Service(e.to_string()))),
        None if age < MIN_REFRESH_INTERVAL => {
            Some(Err(AuthError::Rejected(format!("unknown signing key {}", kid))))
        }
        None => None,
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::MalformedToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedToken("missing kid".to_string()))?;

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[self.issuer()]);

        let data = decode::<FirebaseClaims>(token, &key, &validation)
            .map_err(|e| AuthError::Rejected(e.to_string()))?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::Rejected("empty subject".to_string()));
        }

        debug!(subject = %data.claims.sub, "Firebase token verified");
        Ok(Identity {
            subject: data.claims.sub,
        })
    }

    fn name(&self) -> &'static str {
        "firebase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unsigned_token(header: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(header.to_string());
        let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": "user-1" }).to_string());
        format!("{}.{}.c2lnbmF0dXJl", header, payload)
    }

    async fn key_server(expected_fetches: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [] })))
            .expect(expected_fetches)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed_without_fetching_keys() {
        let server = key_server(0).await;
        let verifier = FirebaseTokenVerifier::new(
            reqwest::Client::new(),
            format!("{}/keys", server.uri()),
            "demo",
        );

        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn test_symmetric_algorithm_is_refused() {
        let server = key_server(0).await;
        let verifier = FirebaseTokenVerifier::new(
            reqwest::Client::new(),
            format!("{}/keys", server.uri()),
            "demo",
        );

        let token = unsigned_token(json!({ "alg": "HS256", "typ": "JWT", "kid": "k1" }));
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn test_unknown_key_rejected_and_key_set_cached() {
        let server = key_server(1).await;
        let verifier = FirebaseTokenVerifier::new(
            reqwest::Client::new(),
            format!("{}/keys", server.uri()),
            "demo",
        );
        let token = unsigned_token(json!({ "alg": "RS256", "typ": "JWT", "kid": "rotated" }));

        for _ in 0..2 {
            let err = verifier.verify(&token).await.unwrap_err();
            assert!(matches!(err, AuthError::Rejected(_)));
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": [] }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let verifier = FirebaseTokenVerifier::new(
            reqwest::Client::new(),
            format!("{}/keys", server.uri()),
            "demo",
        );
        let token = unsigned_token(json!({ "alg": "RS256", "typ": "JWT", "kid": "rotated" }));

        let results = futures_util::future::join_all((0..8).map(|_| verifier.verify(&token))).await;

        assert!(results
            .iter()
            .all(|result| matches!(result, Err(AuthError::Rejected(_)))));
    }

    #[tokio::test]
    async fn test_key_endpoint_failure_is_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let verifier = FirebaseTokenVerifier::new(
            reqwest::Client::new(),
            format!("{}/keys", server.uri()),
            "demo",
        );
        let token = unsigned_token(json!({ "alg": "RS256", "typ": "JWT", "kid": "k1" }));

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Service(_)));
    }
}
