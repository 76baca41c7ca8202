use crate::domain::models::AuthSession;
use crate::infrastructure::error::InfraError;
use std::sync::{Mutex, MutexGuard};

pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &AuthSession) -> Result<(), InfraError>;
    fn load_session(&self) -> Result<Option<AuthSession>, InfraError>;
    fn delete_session(&self) -> Result<(), InfraError>;
}

/// "Remember me" sessions, kept in the operating system keyring.
#[derive(Debug, Clone)]
pub struct KeyringSessionStore {
    service_name: String,
    account_name: String,
}

impl KeyringSessionStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new("daily-planner.firebase.session", "default")
    }
}

impl SessionStore for KeyringSessionStore {
    fn save_session(&self, session: &AuthSession) -> Result<(), InfraError> {
        self.entry()?
            .set_password(&encode_session(session)?)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_session(&self) -> Result<Option<AuthSession>, InfraError> {
        match self.entry()?.get_password() {
            Ok(payload) => decode_session(&payload).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

fn encode_session(session: &AuthSession) -> Result<String, InfraError> {
    serde_json::to_string(session)
        .map_err(|error| InfraError::Credential(format!("cannot encode session: {error}")))
}

fn decode_session(payload: &str) -> Result<AuthSession, InfraError> {
    serde_json::from_str(payload)
        .map_err(|error| InfraError::Credential(format!("stored session is unreadable: {error}")))
}

/// Process-local store, used when nothing should outlive the process and in tests.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<AuthSession>>,
}

impl InMemorySessionStore {
    fn slot(&self) -> Result<MutexGuard<'_, Option<AuthSession>>, InfraError> {
        self.session
            .lock()
            .map_err(|error| InfraError::Credential(format!("session slot poisoned: {error}")))
    }
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&self, session: &AuthSession) -> Result<(), InfraError> {
        *self.slot()? = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<AuthSession>, InfraError> {
        Ok(self.slot()?.clone())
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        self.slot()?.take();
        Ok(())
    }
}
