use crate::application::session::SessionProvider;
use crate::domain::models::{AuthSession, AuthUser};
use crate::infrastructure::auth_client::{
    AuthHttpClient, AuthTokenResponse, EmailPasswordRequest, UpdateAccountRequest,
    is_session_revoked,
};
use crate::infrastructure::credential_store::SessionStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::firestore_client::IdTokenSource;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

const TOKEN_REFRESH_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureSessionResult {
    Existing(AuthSession),
    Refreshed(AuthSession),
    SignedOut,
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub type DynAuthManager = AuthManager<dyn SessionStore, dyn AuthHttpClient>;

/// Email/password accounts on the hosted auth provider.
///
/// The live session sits in memory; "remember me" sessions are mirrored to the
/// [`SessionStore`] so [`AuthManager::restore`] can pick them up on the next start.
pub struct AuthManager<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    session_store: Arc<S>,
    auth_client: Arc<C>,
    current: RwLock<Option<AuthSession>>,
    now_provider: NowProvider,
}

impl<S, C> AuthManager<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    pub fn new(session_store: Arc<S>, auth_client: Arc<C>) -> Self {
        Self {
            session_store,
            auth_client,
            current: RwLock::new(None),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    pub fn current_session(&self) -> Result<Option<AuthSession>, InfraError> {
        let guard = self
            .current
            .read()
            .map_err(|error| InfraError::Auth(format!("session lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<AuthUser, InfraError> {
        let request = credentials(email, password)?;
        let response = self.auth_client.sign_in_with_password(request).await?;
        let session = self.session_from_response(response, email, remember);
        self.store_session(session.clone())?;
        Ok(session.user)
    }

    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        remember: bool,
        username: Option<&str>,
    ) -> Result<AuthUser, InfraError> {
        let request = credentials(email, password)?;
        let response = self.auth_client.sign_up(request).await?;
        let mut session = self.session_from_response(response, email, remember);

        if let Some(username) = username.map(str::trim).filter(|name| !name.is_empty()) {
            let update = self
                .auth_client
                .update_account(UpdateAccountRequest {
                    id_token: session.id_token.clone(),
                    display_name: Some(username.to_string()),
                    ..UpdateAccountRequest::default()
                })
                .await?;
            session.user.display_name = update.display_name.or(Some(username.to_string()));
        }

        self.store_session(session.clone())?;
        Ok(session.user)
    }

    pub fn logout(&self) -> Result<(), InfraError> {
        self.set_current(None)?;
        self.session_store.delete_session()
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), InfraError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(InfraError::InvalidInput("email must not be empty".to_string()));
        }
        self.auth_client.send_password_reset(email).await
    }

    pub async fn change_password(&self, new_password: &str) -> Result<(), InfraError> {
        if new_password.is_empty() {
            return Err(InfraError::InvalidInput("password must not be empty".to_string()));
        }
        let mut session = self.current_session()?.ok_or(InfraError::NotAuthenticated)?;

        let update = self
            .auth_client
            .update_account(UpdateAccountRequest {
                id_token: session.id_token.clone(),
                password: Some(new_password.to_string()),
                ..UpdateAccountRequest::default()
            })
            .await?;

        // A password change revokes the old tokens; the response carries fresh ones.
        if let Some(id_token) = update.id_token {
            session.id_token = id_token;
            if let Some(refresh_token) = update.refresh_token {
                session.refresh_token = refresh_token;
            }
            if let Some(expires_in) = update.expires_in {
                session.expires_at = (self.now_provider)() + Duration::seconds(expires_in);
            }
        }
        self.store_session(session)
    }

    pub async fn update_username(&self, new_username: &str) -> Result<AuthUser, InfraError> {
        let new_username = new_username.trim();
        if new_username.is_empty() {
            return Err(InfraError::InvalidInput("username must not be empty".to_string()));
        }
        let mut session = self.current_session()?.ok_or(InfraError::NotAuthenticated)?;

        let update = self
            .auth_client
            .update_account(UpdateAccountRequest {
                id_token: session.id_token.clone(),
                display_name: Some(new_username.to_string()),
                ..UpdateAccountRequest::default()
            })
            .await?;

        session.user.display_name = update.display_name.or(Some(new_username.to_string()));
        let user = session.user.clone();
        self.store_session(session)?;
        Ok(user)
    }

    /// Loads a remembered session into memory and makes sure its token is usable.
    pub async fn restore(&self) -> Result<EnsureSessionResult, InfraError> {
        if self.current_session()?.is_none() {
            if let Some(persisted) = self.session_store.load_session()? {
                self.set_current(Some(persisted))?;
            }
        }
        self.ensure_session().await
    }

    pub async fn ensure_session(&self) -> Result<EnsureSessionResult, InfraError> {
        let Some(session) = self.current_session()? else {
            return Ok(EnsureSessionResult::SignedOut);
        };

        if session.is_valid_at((self.now_provider)(), TOKEN_REFRESH_LEEWAY_SECONDS) {
            return Ok(EnsureSessionResult::Existing(session));
        }

        match self.auth_client.refresh_id_token(&session.refresh_token).await {
            Ok(response) => {
                let refreshed = AuthSession {
                    user: session.user.clone(),
                    id_token: response.id_token,
                    refresh_token: response.refresh_token,
                    expires_at: (self.now_provider)() + Duration::seconds(response.expires_in),
                    persistent: session.persistent,
                };
                self.store_session(refreshed.clone())?;
                Ok(EnsureSessionResult::Refreshed(refreshed))
            }
            // Only a provider refusal ends the session; transport failures keep it.
            Err(error) if is_session_revoked(&error) => {
                self.logout()?;
                Ok(EnsureSessionResult::SignedOut)
            }
            Err(error) => Err(error),
        }
    }

    fn session_from_response(
        &self,
        response: AuthTokenResponse,
        email: &str,
        persistent: bool,
    ) -> AuthSession {
        AuthSession {
            user: AuthUser {
                uid: response.user_id,
                email: response.email.unwrap_or_else(|| email.trim().to_string()),
                display_name: response.display_name,
            },
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            expires_at: (self.now_provider)() + Duration::seconds(response.expires_in),
            persistent,
        }
    }

    fn store_session(&self, session: AuthSession) -> Result<(), InfraError> {
        if session.persistent {
            self.session_store.save_session(&session)?;
        } else {
            self.session_store.delete_session()?;
        }
        self.set_current(Some(session))
    }

    fn set_current(&self, session: Option<AuthSession>) -> Result<(), InfraError> {
        let mut guard = self
            .current
            .write()
            .map_err(|error| InfraError::Auth(format!("session lock poisoned: {error}")))?;
        *guard = session;
        Ok(())
    }
}

impl<S, C> SessionProvider for AuthManager<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    fn current_user(&self) -> Option<AuthUser> {
        self.current
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|session| session.user.clone()))
    }
}

#[async_trait]
impl<S, C> IdTokenSource for AuthManager<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    async fn id_token(&self) -> Result<String, InfraError> {
        match self.ensure_session().await? {
            EnsureSessionResult::Existing(session) | EnsureSessionResult::Refreshed(session) => {
                Ok(session.id_token)
            }
            EnsureSessionResult::SignedOut => Err(InfraError::NotAuthenticated),
        }
    }
}

fn credentials(email: &str, password: &str) -> Result<EmailPasswordRequest, InfraError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(InfraError::InvalidInput("email must not be empty".to_string()));
    }
    if password.is_empty() {
        return Err(InfraError::InvalidInput("password must not be empty".to_string()));
    }
    Ok(EmailPasswordRequest {
        email: email.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::auth_client::AccountUpdateResponse;
    use crate::infrastructure::credential_store::InMemorySessionStore;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeAuthHttpClient {
        refresh_error: Mutex<Option<String>>,
        refresh_unreachable: AtomicBool,
        sign_in_calls: AtomicUsize,
        update_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        reset_calls: AtomicUsize,
    }

    fn token_response(id_token: &str) -> AuthTokenResponse {
        AuthTokenResponse {
            user_id: "uid-1".to_string(),
            email: Some("ana@example.com".to_string()),
            display_name: None,
            id_token: id_token.to_string(),
            refresh_token: format!("refresh-for-{id_token}"),
            expires_in: 3600,
        }
    }

    #[async_trait]
    impl AuthHttpClient for FakeAuthHttpClient {
        async fn sign_in_with_password(
            &self,
            _request: EmailPasswordRequest,
        ) -> Result<AuthTokenResponse, InfraError> {
            self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
            Ok(token_response("id-login"))
        }

        async fn sign_up(
            &self,
            _request: EmailPasswordRequest,
        ) -> Result<AuthTokenResponse, InfraError> {
            Ok(token_response("id-signup"))
        }

        async fn send_password_reset(&self, _email: &str) -> Result<(), InfraError> {
            self.reset_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_account(
            &self,
            request: UpdateAccountRequest,
        ) -> Result<AccountUpdateResponse, InfraError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccountUpdateResponse {
                display_name: request.display_name,
                id_token: request.password.as_ref().map(|_| "id-after-password".to_string()),
                refresh_token: None,
                expires_in: None,
            })
        }

        async fn refresh_id_token(
            &self,
            _refresh_token: &str,
        ) -> Result<AuthTokenResponse, InfraError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_unreachable.load(Ordering::SeqCst) {
                return Err(InfraError::Network(
                    "network error while refreshing token: connection refused".to_string(),
                ));
            }
            match self.refresh_error.lock().expect("refresh mutex poisoned").clone() {
                Some(message) => Err(InfraError::Auth(message)),
                None => Ok(token_response("id-refreshed")),
            }
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 30, 9, 0, 0).unwrap()
    }

    fn manager(
        store: &Arc<InMemorySessionStore>,
        client: &Arc<FakeAuthHttpClient>,
    ) -> AuthManager<InMemorySessionStore, FakeAuthHttpClient> {
        AuthManager::new(Arc::clone(store), Arc::clone(client)).with_now_provider(Arc::new(fixed_now))
    }

    fn stored_session(expires_in_seconds: i64) -> AuthSession {
        AuthSession {
            user: AuthUser {
                uid: "uid-1".to_string(),
                email: "ana@example.com".to_string(),
                display_name: Some("Ana".to_string()),
            },
            id_token: "id-stored".to_string(),
            refresh_token: "refresh-stored".to_string(),
            expires_at: fixed_now() + Duration::seconds(expires_in_seconds),
            persistent: true,
        }
    }

    #[tokio::test]
    async fn remembered_login_is_persisted() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);

        let user = auth.login("ana@example.com", "secret", true).await.expect("login");

        assert_eq!(user.uid, "uid-1");
        assert!(auth.is_authenticated());
        let persisted = store.load_session().expect("load").expect("persisted session");
        assert_eq!(persisted.id_token, "id-login");
        assert_eq!(persisted.expires_at, fixed_now() + Duration::seconds(3600));
    }

    #[tokio::test]
    async fn login_without_remember_leaves_nothing_persisted() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(3600)).expect("seed");
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);

        auth.login("ana@example.com", "secret", false).await.expect("login");

        assert!(store.load_session().expect("load").is_none());
        assert!(auth.current_user().is_some());
    }

    #[tokio::test]
    async fn blank_credentials_never_reach_the_provider() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);

        let result = auth.login("  ", "secret", true).await;
        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
        assert_eq!(client.sign_in_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signup_sets_display_name() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);

        let user = auth
            .signup("ana@example.com", "secret", false, Some("Ana"))
            .await
            .expect("signup");
        assert_eq!(user.display_name.as_deref(), Some("Ana"));
        assert_eq!(client.update_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn account_changes_require_a_signed_in_user() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);

        let password = auth.change_password("new-secret").await;
        let username = auth.update_username("Ana").await;

        assert!(matches!(password, Err(InfraError::NotAuthenticated)));
        assert!(matches!(username, Err(InfraError::NotAuthenticated)));
        assert_eq!(InfraError::NotAuthenticated.to_string(), "No user logged in");
        assert_eq!(client.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn change_password_adopts_fresh_token() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);
        auth.login("ana@example.com", "secret", true).await.expect("login");

        auth.change_password("new-secret").await.expect("change password");

        let session = auth.current_session().expect("read").expect("session");
        assert_eq!(session.id_token, "id-after-password");
        assert_eq!(store.load_session().expect("load").expect("persisted").id_token, "id-after-password");
    }

    #[tokio::test]
    async fn restore_uses_valid_persisted_session_without_refresh() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(3600)).expect("seed");
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);

        let result = auth.restore().await.expect("restore");

        assert!(matches!(result, EnsureSessionResult::Existing(_)));
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(auth.current_user().map(|user| user.uid), Some("uid-1".to_string()));
    }

    #[tokio::test]
    async fn token_inside_leeway_is_refreshed() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(30)).expect("seed");
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);

        let result = auth.restore().await.expect("restore");

        match result {
            EnsureSessionResult::Refreshed(session) => {
                assert_eq!(session.id_token, "id-refreshed");
                assert_eq!(session.user.display_name.as_deref(), Some("Ana"));
            }
            other => panic!("expected refreshed session, got {other:?}"),
        }
        assert_eq!(auth.id_token().await.expect("id token"), "id-refreshed");
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_signs_the_user_out() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(-120)).expect("seed");
        let client = Arc::new(FakeAuthHttpClient::default());
        *client.refresh_error.lock().expect("refresh mutex") = Some("TOKEN_EXPIRED".to_string());
        let auth = manager(&store, &client);

        let result = auth.restore().await.expect("restore");

        assert_eq!(result, EnsureSessionResult::SignedOut);
        assert!(auth.current_user().is_none());
        assert!(store.load_session().expect("load").is_none());
        assert!(matches!(auth.id_token().await, Err(InfraError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn unreachable_provider_keeps_the_remembered_session() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(-10)).expect("seed");
        let client = Arc::new(FakeAuthHttpClient::default());
        client.refresh_unreachable.store(true, Ordering::SeqCst);
        let auth = manager(&store, &client);

        let result = auth.restore().await;

        assert!(matches!(result, Err(InfraError::Network(_))));
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.load_session().expect("load").map(|session| session.refresh_token),
            Some("refresh-stored".to_string())
        );
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn unrelated_provider_error_is_returned_without_signing_out() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(-10)).expect("seed");
        let client = Arc::new(FakeAuthHttpClient::default());
        *client.refresh_error.lock().expect("refresh mutex") =
            Some("auth provider error: http_503".to_string());
        let auth = manager(&store, &client);

        assert!(matches!(auth.restore().await, Err(InfraError::Auth(_))));
        assert!(store.load_session().expect("load").is_some());
    }

    #[tokio::test]
    async fn logout_clears_memory_and_keyring() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);
        auth.login("ana@example.com", "secret", true).await.expect("login");

        auth.logout().expect("logout");

        assert!(!auth.is_authenticated());
        assert!(store.load_session().expect("load").is_none());
    }

    #[tokio::test]
    async fn reset_password_calls_provider_once() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthHttpClient::default());
        let auth = manager(&store, &client);

        auth.reset_password("ana@example.com").await.expect("reset");
        assert_eq!(client.reset_calls.load(Ordering::SeqCst), 1);
    }
}
