use crate::infrastructure::document_store::{
    BatchWrite, Document, DocumentStore, Fields, Query, next_document_id,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::{Path, PathBuf};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Offline document store: one JSON row per document, batches run in a transaction.
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    db_path: PathBuf,
}

impl SqliteDocumentStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    fn parse_fields(raw: &str, collection: &str, id: &str) -> Result<Fields, InfraError> {
        serde_json::from_str(raw).map_err(|error| {
            InfraError::Store(format!("invalid stored document {collection}/{id}: {error}"))
        })
    }

    fn load_fields(
        transaction: &Transaction<'_>,
        collection: &str,
        id: &str,
    ) -> Result<Option<Fields>, InfraError> {
        let raw: Option<String> = transaction
            .query_row(
                "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| Self::parse_fields(&raw, collection, id))
            .transpose()
    }

    fn apply_write(transaction: &Transaction<'_>, write: BatchWrite) -> Result<(), InfraError> {
        match write {
            BatchWrite::Update {
                collection,
                id,
                fields,
            } => {
                let Some(mut existing) = Self::load_fields(transaction, &collection, &id)? else {
                    return Err(InfraError::NotFound(format!("{collection}/{id}")));
                };
                existing.extend(fields);
                transaction.execute(
                    "UPDATE documents SET fields = ?3, updated_at = ?4
                     WHERE collection = ?1 AND id = ?2",
                    params![
                        collection,
                        id,
                        serde_json::to_string(&existing)?,
                        Utc::now().to_rfc3339()
                    ],
                )?;
            }
            BatchWrite::Delete { collection, id } => {
                transaction.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                )?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, InfraError> {
        let connection = self.connect()?;
        let mut statement =
            connection.prepare("SELECT id, fields FROM documents WHERE collection = ?1")?;
        let rows = statement.query_map(params![query.collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            let fields = Self::parse_fields(&raw, &query.collection, &id)?;
            documents.push(Document::new(id, fields));
        }
        Ok(query.apply(documents))
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<Document, InfraError> {
        let connection = self.connect()?;
        let id = next_document_id(collection);
        connection.execute(
            "INSERT INTO documents (collection, id, fields, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                collection,
                id,
                serde_json::to_string(&fields)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(Document::new(id, fields))
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), InfraError> {
        self.commit(vec![BatchWrite::update(collection, id, fields)])
            .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(())
    }

    async fn commit(&self, writes: Vec<BatchWrite>) -> Result<(), InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        for write in writes {
            Self::apply_write(&transaction, write)?;
        }
        transaction.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::document_store::Direction;
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        dir: PathBuf,
        store: SqliteDocumentStore,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "daily-planner-sqlite-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let path = dir.join("planner.sqlite");
            initialize_database(&path).expect("initialize database");
            Self {
                store: SqliteDocumentStore::new(&path),
                dir,
            }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn create_query_and_update_roundtrip() {
        let db = TempDatabase::new();
        let first = db
            .store
            .create("todos", fields(json!({"userId": "u1", "createdAt": 1, "text": "a"})))
            .await
            .expect("create first");
        db.store
            .create("todos", fields(json!({"userId": "u1", "createdAt": 2, "text": "b"})))
            .await
            .expect("create second");

        db.store
            .update("todos", &first.id, fields(json!({"text": "a2"})))
            .await
            .expect("update");

        let listed = db
            .store
            .run_query(
                &Query::collection("todos")
                    .where_eq("userId", "u1")
                    .order_by("createdAt", Direction::Descending),
            )
            .await
            .expect("query");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].fields["text"], "b");
        assert_eq!(listed[1].fields["text"], "a2");
        assert_eq!(listed[1].fields["createdAt"], 1);
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_every_write() {
        let db = TempDatabase::new();
        let created = db
            .store
            .create("todos", fields(json!({"dayOfWeek": 4})))
            .await
            .expect("create");

        let result = db
            .store
            .commit(vec![
                BatchWrite::update("todos", &created.id, fields(json!({"dayOfWeek": 5}))),
                BatchWrite::update("todos", "missing", fields(json!({"dayOfWeek": 5}))),
            ])
            .await;
        assert!(matches!(result, Err(InfraError::NotFound(_))));

        let listed = db
            .store
            .run_query(&Query::collection("todos"))
            .await
            .expect("query");
        assert_eq!(listed[0].fields["dayOfWeek"], 4);
    }

    #[tokio::test]
    async fn batch_delete_removes_documents() {
        let db = TempDatabase::new();
        let a = db.store.create("dailies", Fields::new()).await.expect("create a");
        let b = db.store.create("dailies", Fields::new()).await.expect("create b");

        db.store
            .commit(vec![
                BatchWrite::delete("dailies", &a.id),
                BatchWrite::delete("dailies", &b.id),
            ])
            .await
            .expect("commit deletes");

        let listed = db
            .store
            .run_query(&Query::collection("dailies"))
            .await
            .expect("query");
        assert!(listed.is_empty());
    }
}
