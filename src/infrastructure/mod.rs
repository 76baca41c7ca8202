pub mod auth_client;
pub mod config;
pub mod credential_store;
pub mod document_store;
pub mod error;
pub mod firestore_client;
pub mod firestore_codec;
pub mod gemini_client;
pub mod sqlite_store;
