//! # Firestore Partner Store
//!
//! Talks to Cloud Firestore through its REST API:
//! - queries use `documents:runQuery` with a single `EQUAL` field filter
//! - seeding uses one `documents:commit` call, so the whole batch is atomic
//!
//! Requests carry a bearer token from an [`AccessTokenProvider`].

use super::{NewPartner, PartnerRecord, PartnerStore};
use crate::auth::credentials::AccessTokenProvider;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct FirestorePartnerStore {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

/// One element of a `runQuery` response stream. Elements without a document only
/// carry read metadata.
#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

impl Document {
    fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    fn string_field(&self, field: &str) -> Result<String, StoreError> {
        self.fields
            .get(field)
            .and_then(|value| value.get("stringValue"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                StoreError::Decode(format!("document {} has no string field {}", self.name, field))
            })
    }

    fn into_record(self) -> Result<PartnerRecord, StoreError> {
        Ok(PartnerRecord {
            id: self.id().to_string(),
            name: self.string_field("name")?,
            expertise: self.string_field("expertise")?,
            expertise_lowercase: self.string_field("expertise_lowercase")?,
        })
    }
}

impl FirestorePartnerStore {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            tokens,
        }
    }

    fn database_path(&self) -> String {
        format!("projects/{}/databases/(default)", self.project_id)
    }

    fn documents_url(&self, action: &str) -> String {
        format!("{}/{}/documents:{}", self.base_url, self.database_path(), action)
    }

    async fn post(&self, url: String, body: Value) -> Result<reqwest::Response, StoreError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| StoreError::Credentials(e.to_string()))?;

        let response = self.client.post(url).bearer_auth(token).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl PartnerStore for FirestorePartnerStore {
    async fn query_by_exact_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<PartnerRecord>, StoreError> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": { "stringValue": value }
                    }
                }
            }
        });

        let response = self.post(self.documents_url("runQuery"), body).await?;
        let items: Vec<RunQueryItem> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        let records = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(Document::into_record)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(collection, field, value, matches = records.len(), "Firestore query complete");
        Ok(records)
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

        let writes: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "update": {
                        "name": format!("{}/documents/{}/{}", self.database_path(), collection, record.id),
                        "fields": {
                            "name": { "stringValue": record.name },
                            "expertise": { "stringValue": record.expertise },
                            "expertise_lowercase": { "stringValue": record.expertise_lowercase }
                        }
                    }
                })
            })
            .collect();

        self.post(self.documents_url("commit"), json!({ "writes": writes }))
            .await?;

        info!(collection, count = records.len(), "Seeded partners into Firestore");
        Ok(records)
    }

    fn name(&self) -> &'static str {
        "firestore"
    }
}
