use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub type Fields = serde_json::Map<String, Value>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_document_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Decodes into an entity whose `id` field is taken from the document name.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, InfraError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|error| {
            InfraError::Store(format!("invalid document '{}': {error}", self.id))
        })
    }
}

/// Serializes an entity into stored fields; the `id` never lives inside a document body.
pub fn encode_fields<T: Serialize>(entity: &T) -> Result<Fields, InfraError> {
    match serde_json::to_value(entity)? {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(fields)
        }
        other => Err(InfraError::Store(format!(
            "entity must serialize to an object, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Equality-filtered query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters
            .iter()
            .all(|filter| fields.get(&filter.field).is_some_and(|value| values_equal(value, &filter.value)))
    }

    /// Filters and orders documents the way a remote store would.
    pub fn apply(&self, documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|document| self.matches(&document.fields))
            .collect();
        if let Some(order_by) = &self.order_by {
            matched.sort_by(|left, right| {
                let ordering = compare_values(
                    left.fields.get(&order_by.field),
                    right.fields.get(&order_by.field),
                );
                match order_by.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }
        matched
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchWrite {
    /// Merges `fields` into an existing document; fails the batch when it is missing.
    Update {
        collection: String,
        id: String,
        fields: Fields,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl BatchWrite {
    pub fn update(collection: impl Into<String>, id: impl Into<String>, fields: Fields) -> Self {
        Self::Update {
            collection: collection.into(),
            id: id.into(),
            fields,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Delete {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, InfraError>;

    async fn create(&self, collection: &str, fields: Fields) -> Result<Document, InfraError>;

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), InfraError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), InfraError>;

    /// Applies every write or none of them.
    async fn commit(&self, writes: Vec<BatchWrite>) -> Result<(), InfraError>;
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => match (left.as_i64(), right.as_i64()) {
            (Some(left), Some(right)) => left == right,
            _ => left.as_f64() == right.as_f64(),
        },
        _ => left == right,
    }
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> CmpOrdering {
    match (left, right) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(Value::Number(left)), Some(Value::Number(right))) => {
            match (left.as_i64(), right.as_i64()) {
                (Some(left), Some(right)) => left.cmp(&right),
                _ => left
                    .as_f64()
                    .partial_cmp(&right.as_f64())
                    .unwrap_or(CmpOrdering::Equal),
            }
        }
        (Some(Value::String(left)), Some(Value::String(right))) => left.cmp(right),
        (Some(Value::Bool(left)), Some(Value::Bool(right))) => left.cmp(right),
        (Some(left), Some(right)) => type_rank(left).cmp(&type_rank(right)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Fields>>>,
}

impl InMemoryDocumentStore {
    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Fields>>>, InfraError> {
        self.collections
            .lock()
            .map_err(|error| InfraError::Store(format!("in-memory store lock poisoned: {error}")))
    }

    pub fn insert(&self, collection: &str, document: Document) -> Result<(), InfraError> {
        let mut collections = self.lock()?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(document.id, document.fields);
        Ok(())
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, InfraError> {
        let collections = self.lock()?;
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, InfraError> {
        let collections = self.lock()?;
        let documents = collections
            .get(&query.collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(query.apply(documents))
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<Document, InfraError> {
        let document = Document::new(next_document_id(collection), fields);
        self.insert(collection, document.clone())?;
        Ok(document)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), InfraError> {
        self.commit(vec![BatchWrite::update(collection, id, fields)])
            .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), InfraError> {
        let mut collections = self.lock()?;
        if let Some(documents) = collections.get_mut(collection) {
            documents.remove(id);
        }
        Ok(())
    }

    async fn commit(&self, writes: Vec<BatchWrite>) -> Result<(), InfraError> {
        let mut collections = self.lock()?;
        for write in &writes {
            if let BatchWrite::Update { collection, id, .. } = write {
                let exists = collections
                    .get(collection)
                    .is_some_and(|documents| documents.contains_key(id));
                if !exists {
                    return Err(InfraError::NotFound(format!("{collection}/{id}")));
                }
            }
        }

        for write in writes {
            match write {
                BatchWrite::Update {
                    collection,
                    id,
                    fields,
                } => {
                    if let Some(existing) = collections
                        .get_mut(&collection)
                        .and_then(|documents| documents.get_mut(&id))
                    {
                        existing.extend(fields);
                    }
                }
                BatchWrite::Delete { collection, id } => {
                    if let Some(documents) = collections.get_mut(&collection) {
                        documents.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
