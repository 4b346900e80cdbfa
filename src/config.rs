//! # Configuration Management
//!
//! This module handles loading the relay configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! Secrets are kept out of [`AppConfig`] on purpose: the upstream API key and the
//! service-account bundle live in [`Secrets`], which is read once from the process
//! environment and never serialized or printed.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_RELAY__DECODE_AUDIO_IN`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Main application configuration that contains all non-secret settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub completion: CompletionConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    pub relay: RelayConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where the audio relay connects for each session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Realtime websocket endpoint of the conversational AI service
    pub url: String,

    /// Value of the `OpenAI-Beta` header sent on the upgrade request (omitted when empty)
    pub beta_header: String,
}

/// Text completion service used by chat sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub fallback_message: String,
}

/// Which token verifier the gate uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierKind {
    /// Firebase ID tokens checked against Google's public key set
    Firebase,
    /// Fixed token list from configuration (local development only)
    Static,
}

/// A development credential accepted by the static verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticToken {
    pub token: String,
    pub subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub verifier: VerifierKind,
    pub jwks_url: String,
    pub static_tokens: Vec<StaticToken>,
    /// Give up on a verification that takes longer than this
    pub verify_timeout_ms: u64,
}

/// Which partner store backend is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Firestore,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub collection: String,
    pub firestore_base_url: String,
    /// Seed the in-memory store with the default partner set at startup
    pub seed_memory: bool,
}

/// Relay behavior toggles.
///
/// ## Fields:
/// - `decode_audio_in`: forward `audio_in` payloads upstream as decoded binary frames
///   instead of the original text frame
/// - `wrap_upstream_text`: wrap upstream text frames in a `transcript` envelope instead
///   of forwarding them unmodified
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub decode_audio_in: bool,
    pub wrap_upstream_text: bool,
}

/// Capture settings used by the relay client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub chunk_duration_ms: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            upstream: UpstreamConfig {
                url: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string(),
                beta_header: "realtime=v1".to_string(),
            },
            completion: CompletionConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-3.5-turbo".to_string(),
                system_prompt: "You are a helpful assistant for finding professional partners."
                    .to_string(),
                fallback_message: "Sorry, I am having trouble connecting to the AI service."
                    .to_string(),
            },
            auth: AuthConfig {
                verifier: VerifierKind::Firebase,
                jwks_url:
                    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"
                        .to_string(),
                static_tokens: Vec::new(),
                verify_timeout_ms: 5000,
            },
            store: StoreConfig {
                backend: StoreBackend::Firestore,
                collection: "Partners".to_string(),
                firestore_base_url: "https://firestore.googleapis.com/v1".to_string(),
                seed_memory: true,
            },
            relay: RelayConfig {
                decode_audio_in: false,
                wrap_upstream_text: false,
            },
            audio: AudioConfig {
                chunk_duration_ms: 500,
                sample_rate: 16000,
                channels: 1,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 100,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_STORE__BACKEND=memory`: Use the in-process partner store
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense together with the secrets
    /// that were found in the environment.
    pub fn validate(&self, secrets: &Secrets) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.upstream.url.trim().is_empty() {
            return Err(anyhow::anyhow!("Upstream URL cannot be empty"));
        }

        if self.audio.chunk_duration_ms == 0 {
            return Err(anyhow::anyhow!("Audio chunk duration must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.auth.verify_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Token verification timeout must be greater than 0"));
        }

        if secrets.openai_api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("OPENAI_API_KEY is not set"));
        }

        let needs_credentials = self.auth.verifier == VerifierKind::Firebase
            || self.store.backend == StoreBackend::Firestore;
        if needs_credentials && secrets.firebase_credentials.is_none() {
            return Err(anyhow::anyhow!(
                "FIREBASE_CREDENTIALS is not set but the Firebase verifier or Firestore store is enabled"
            ));
        }

        if self.auth.verifier == VerifierKind::Static && self.auth.static_tokens.is_empty() {
            return Err(anyhow::anyhow!("Static verifier selected without any static_tokens"));
        }

        Ok(())
    }
}

/// Credentials read from the environment once at process start.
///
/// Does not derive Debug; the manual impl only reports which secrets are present.
#[derive(Clone)]
pub struct Secrets {
    /// API key for the upstream realtime service and the completion service
    pub openai_api_key: String,

    /// Service-account JSON bundle for token verification and the document store
    pub firebase_credentials: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            firebase_credentials: env::var("FIREBASE_CREDENTIALS")
                .ok()
                .filter(|value| !value.trim().is_empty()),
        }
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("openai_api_key", &(!self.openai_api_key.is_empty()))
            .field("firebase_credentials", &self.firebase_credentials.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> Secrets {
        Secrets {
            openai_api_key: "sk-test".to_string(),
            firebase_credentials: Some("{}".to_string()),
        }
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.audio.chunk_duration_ms, 500);
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert!(config.validate(&secrets()).is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate(&secrets()).is_err());
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let config = AppConfig::default();
        let secrets = Secrets {
            openai_api_key: String::new(),
            firebase_credentials: Some("{}".to_string()),
        };
        assert!(config.validate(&secrets).is_err());
    }

    #[test]
    fn test_memory_store_with_static_tokens_needs_no_credentials() {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.auth.verifier = VerifierKind::Static;
        config.auth.static_tokens = vec![StaticToken {
            token: "dev-token".to_string(),
            subject: "dev-user".to_string(),
        }];
        let secrets = Secrets {
            openai_api_key: "sk-test".to_string(),
            firebase_credentials: None,
        };
        assert!(config.validate(&secrets).is_ok());
    }

    #[test]
    fn test_secrets_debug_hides_values() {
        let printed = format!("{:?}", secrets());
        assert!(!printed.contains("sk-test"));
    }
}
