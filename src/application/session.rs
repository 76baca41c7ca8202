use crate::domain::models::AuthUser;
use crate::infrastructure::error::InfraError;

/// Read-only view of who is signed in, handed to every service and store.
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    fn require_user(&self) -> Result<AuthUser, InfraError> {
        self.current_user().ok_or(InfraError::NotAuthenticated)
    }
}

/// Always reports the same user (or nobody). Backs the offline profile.
#[derive(Debug, Clone, Default)]
pub struct FixedSession {
    user: Option<AuthUser>,
}

impl FixedSession {
    pub fn signed_in(user: AuthUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn signed_out() -> Self {
        Self { user: None }
    }

    pub fn offline_profile() -> Self {
        Self::signed_in(AuthUser {
            uid: "local-user".to_string(),
            email: "local@localhost".to_string(),
            display_name: Some("Local".to_string()),
        })
    }
}

impl SessionProvider for FixedSession {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_user_fails_without_session() {
        let session = FixedSession::signed_out();
        assert!(matches!(session.require_user(), Err(InfraError::NotAuthenticated)));
    }

    #[test]
    fn offline_profile_is_signed_in() {
        let user = FixedSession::offline_profile().require_user().expect("user");
        assert_eq!(user.uid, "local-user");
    }
}
