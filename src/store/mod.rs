//! # Partner Store
//!
//! Keyed-query access to partner records. The relay only reads from the store; the
//! one write path is the one-time seeding used by the `seed-partners` binary.
//!
//! ## Backends:
//! - **Firestore** ([`firestore::FirestorePartnerStore`]): the production document store,
//!   spoken to over its REST API
//! - **Memory** ([`memory::InMemoryPartnerStore`]): in-process, for local development
//!   and tests
//!
//! Both return records in the store's own order; callers never re-sort.

pub mod firestore;
pub mod memory;

use crate::auth::credentials::{ServiceAccount, ServiceAccountTokenProvider};
use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Field holding the normalized expertise tag.
pub const EXPERTISE_KEY_FIELD: &str = "expertise_lowercase";

/// A partner as stored, including its document id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRecord {
    pub id: String,
    pub name: String,
    pub expertise: String,
    pub expertise_lowercase: String,
}

/// A partner to be written by the seeding operation. The normalized field is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPartner {
    pub name: String,
    pub expertise: String,
}

impl NewPartner {
    pub fn new(name: impl Into<String>, expertise: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expertise: expertise.into(),
        }
    }

    pub fn expertise_lowercase(&self) -> String {
        self.expertise.to_lowercase()
    }

    pub fn into_record(self, id: String) -> PartnerRecord {
        let expertise_lowercase = self.expertise_lowercase();
        PartnerRecord {
            id,
            name: self.name,
            expertise: self.expertise,
            expertise_lowercase,
        }
    }
}

/// The fixed partner set written by `seed-partners`.
pub fn default_partners() -> Vec<NewPartner> {
    vec![
        NewPartner::new("Partner A", "Cloud Solutions"),
        NewPartner::new("Partner B", "AI and Machine Learning"),
        NewPartner::new("Partner C", "Cybersecurity"),
        NewPartner::new("Partner D", "Data Analytics"),
        NewPartner::new("Partner E", "Web Development"),
    ]
}

/// Build the configured backend.
///
/// Firestore needs the service-account bundle (inline JSON or a file path); the memory
/// backend is pre-filled with [`default_partners`] when `seed_memory` is set.
pub async fn build_store(
    config: &StoreConfig,
    credentials: Option<&str>,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn PartnerStore>> {
    match config.backend {
        StoreBackend::Firestore => {
            let raw = credentials.ok_or_else(|| {
                anyhow::anyhow!("FIREBASE_CREDENTIALS is required for the Firestore store")
            })?;
            let account = ServiceAccount::load(raw)?;
            let project_id = account.project_id.clone();
            let tokens = Arc::new(ServiceAccountTokenProvider::new(account, client.clone()));

            info!(project_id = %project_id, "Using Firestore partner store");
            Ok(Arc::new(firestore::FirestorePartnerStore::new(
                client,
                config.firestore_base_url.clone(),
                project_id,
                tokens,
            )))
        }
        StoreBackend::Memory => {
            let store = if config.seed_memory {
                memory::InMemoryPartnerStore::seeded(&config.collection, &default_partners()).await
            } else {
                memory::InMemoryPartnerStore::new()
            };

            info!(seeded = config.seed_memory, "Using in-memory partner store");
            Ok(Arc::new(store))
        }
    }
}

#[async_trait]
pub trait PartnerStore: Send + Sync {
    /// Records of `collection` whose `field` equals `value` exactly, in store order.
    /// No match is an empty list, not an error.
    async fn query_by_exact_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<PartnerRecord>, StoreError>;

    /// Write `partners` into `collection` with generated ids. Returns the stored records.
    async fn seed(
        &self,
        collection: &str,
        partners: &[NewPartner],
    ) -> Result<Vec<PartnerRecord>, StoreError>;

    /// Backend name for logs and the health endpoint.
    fn name(&self) -> &'static str;
}
