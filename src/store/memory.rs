//! In-process partner store. Records keep insertion order, which is the order queries
//! return them in.

use super::{NewPartner, PartnerRecord, PartnerStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryPartnerStore {
    collections: Arc<RwLock<HashMap<String, Vec<PartnerRecord>>>>,
}

impl InMemoryPartnerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already seeded with `partners` in `collection`.
    pub async fn seeded(collection: &str, partners: &[NewPartner]) -> Self {
        let store = Self::new();
        // Seeding the in-memory backend never fails
        let _ = store.seed(collection, partners).await;
        store
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|records| records.len())
            .unwrap_or(0)
    }
}

fn field_value<'a>(record: &'a PartnerRecord, field: &str) -> Option<&'a str> {
    match field {
        "id" => Some(&record.id),
        "name" => Some(&record.name),
        "expertise" => Some(&record.expertise),
        "expertise_lowercase" => Some(&record.expertise_lowercase),
        _ => None,
    }
}

#[async_trait]
impl PartnerStore for InMemoryPartnerStore {
    async fn query_by_exact_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<PartnerRecord>, StoreError> {
        let collections = self.collections.read().await;
        let matches = collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| field_value(record, field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(matches)
    }

    async fn seed(
        &self,
        collection: &str,
        partners: &[NewPartner],
    ) -> Result<Vec<PartnerRecord>, StoreError> {
        let records: Vec<PartnerRecord> = partners
            .iter()
            .cloned()
            .map(|partner| partner.into_record(Uuid::new_v4().simple().to_string()))
            .collect();

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .extend(records.iter().cloned());

        Ok(records)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
