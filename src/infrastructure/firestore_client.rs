use crate::infrastructure::document_store::{
    BatchWrite, Direction, Document, DocumentStore, Fields, Query,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::firestore_codec::{
    FirestoreDocument, decode_document, encode_fields, encode_value,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

const FIRESTORE_API_BASE: &str = "https://firestore.googleapis.com/v1/";
pub const DEFAULT_DATABASE_ID: &str = "(default)";

/// Supplies the bearer token sent with every Firestore request.
#[async_trait]
pub trait IdTokenSource: Send + Sync {
    async fn id_token(&self) -> Result<String, InfraError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database_id: String,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: DEFAULT_DATABASE_ID.to_string(),
        }
    }
}

pub struct FirestoreDocumentStore {
    client: Client,
    base_url: String,
    config: FirestoreConfig,
    token_source: Arc<dyn IdTokenSource>,
}

#[derive(Debug, serde::Deserialize)]
struct RunQueryItem {
    document: Option<FirestoreDocument>,
}

impl FirestoreDocumentStore {
    pub fn new(config: FirestoreConfig, token_source: Arc<dyn IdTokenSource>) -> Self {
        Self {
            client: Client::new(),
            base_url: FIRESTORE_API_BASE.to_string(),
            config,
            token_source,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidInput(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.config.project_id, self.config.database_id
        )
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.documents_root())
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid firestore base url: {error}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("firestore base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.extend([
                "projects",
                self.config.project_id.as_str(),
                "databases",
                self.config.database_id.as_str(),
            ]);
            segments.extend(tail);
        }
        Ok(url)
    }

    fn store_http_error(status: StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("firestore api error: http {}", status.as_u16())
        } else {
            format!("firestore api error: http {}; body={body}", status.as_u16())
        };
        InfraError::Store(message)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<String, InfraError> {
        let token = self.token_source.id_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading response while {action}: {error}")))?;

        if status == StatusCode::NOT_FOUND {
            return Err(InfraError::NotFound(format!("{action}: {body}")));
        }
        if !status.is_success() {
            return Err(Self::store_http_error(status, &body));
        }
        Ok(body)
    }

    fn structured_query(query: &Query) -> Value {
        let filters: Vec<Value> = query
            .filters
            .iter()
            .map(|filter| {
                json!({
                    "fieldFilter": {
                        "field": { "fieldPath": filter.field },
                        "op": "EQUAL",
                        "value": encode_value(&filter.value),
                    }
                })
            })
            .collect();

        let mut structured = json!({
            "from": [{ "collectionId": query.collection }],
        });
        match filters.len() {
            0 => {}
            1 => structured["where"] = filters[0].clone(),
            _ => {
                structured["where"] = json!({
                    "compositeFilter": { "op": "AND", "filters": filters }
                })
            }
        }
        if let Some(order_by) = &query.order_by {
            let direction = match order_by.direction {
                Direction::Ascending => "ASCENDING",
                Direction::Descending => "DESCENDING",
            };
            structured["orderBy"] = json!([{
                "field": { "fieldPath": order_by.field },
                "direction": direction,
            }]);
        }
        json!({ "structuredQuery": structured })
    }

    fn encode_write(&self, write: &BatchWrite) -> Value {
        match write {
            BatchWrite::Update {
                collection,
                id,
                fields,
            } => json!({
                "update": {
                    "name": self.document_name(collection, id),
                    "fields": encode_fields(fields),
                },
                "updateMask": { "fieldPaths": fields.keys().collect::<Vec<_>>() },
                "currentDocument": { "exists": true },
            }),
            BatchWrite::Delete { collection, id } => json!({
                "delete": self.document_name(collection, id),
            }),
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreDocumentStore {
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, InfraError> {
        Self::ensure_non_empty(&query.collection, "collection")?;

        let endpoint = self.endpoint(&["documents:runQuery"])?;
        let body = self
            .send(
                self.client.post(endpoint).json(&Self::structured_query(query)),
                "running query",
            )
            .await?;

        let items: Vec<RunQueryItem> = serde_json::from_str(&body).map_err(|error| {
            InfraError::Store(format!("invalid runQuery payload: {error}; body={body}"))
        })?;
        items
            .into_iter()
            .filter_map(|item| item.document)
            .map(|document| decode_document(&document))
            .collect()
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<Document, InfraError> {
        Self::ensure_non_empty(collection, "collection")?;

        let endpoint = self.endpoint(&["documents", collection])?;
        let body = self
            .send(
                self.client
                    .post(endpoint)
                    .json(&json!({ "fields": encode_fields(&fields) })),
                "creating document",
            )
            .await?;

        let created: FirestoreDocument = serde_json::from_str(&body).map_err(|error| {
            InfraError::Store(format!("invalid document create payload: {error}; body={body}"))
        })?;
        decode_document(&created)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), InfraError> {
        Self::ensure_non_empty(collection, "collection")?;
        Self::ensure_non_empty(id, "document id")?;

        let endpoint = self.endpoint(&["documents", collection, id])?;
        let mut mask: Vec<(&str, &str)> = fields
            .keys()
            .map(|key| ("updateMask.fieldPaths", key.as_str()))
            .collect();
        mask.push(("currentDocument.exists", "true"));

        self.send(
            self.client
                .patch(endpoint)
                .query(&mask)
                .json(&json!({ "fields": encode_fields(&fields) })),
            "updating document",
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), InfraError> {
        Self::ensure_non_empty(collection, "collection")?;
        Self::ensure_non_empty(id, "document id")?;

        let endpoint = self.endpoint(&["documents", collection, id])?;
        self.send(self.client.delete(endpoint), "deleting document")
            .await?;
        Ok(())
    }

    async fn commit(&self, writes: Vec<BatchWrite>) -> Result<(), InfraError> {
        if writes.is_empty() {
            return Ok(());
        }

        let endpoint = self.endpoint(&["documents:commit"])?;
        let encoded: Vec<Value> = writes.iter().map(|write| self.encode_write(write)).collect();
        self.send(
            self.client
                .post(endpoint)
                .json(&json!({ "writes": encoded })),
            "committing batch",
        )
        .await?;
        Ok(())
    }
}
