use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("No user logged in")]
    NotAuthenticated,
    #[error("Document store error: {0}")]
    Store(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Gemini API key not configured")]
    MissingApiKey,
    #[error("Generation error: {0}")]
    Generation(String),
}
