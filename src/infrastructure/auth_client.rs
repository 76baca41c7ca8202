use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;

const IDENTITY_TOOLKIT_BASE: &str = "https://identitytoolkit.googleapis.com/v1/";
const SECURE_TOKEN_BASE: &str = "https://securetoken.googleapis.com/v1/";

/// Provider codes meaning the stored refresh token can never be used again.
const REVOKED_SESSION_CODES: [&str; 6] = [
    "TOKEN_EXPIRED",
    "INVALID_REFRESH_TOKEN",
    "USER_DISABLED",
    "USER_NOT_FOUND",
    "INVALID_GRANT_TYPE",
    "MISSING_REFRESH_TOKEN",
];

/// True when the provider refused the session itself, as opposed to a transport
/// failure or an unrelated provider error.
pub fn is_session_revoked(error: &InfraError) -> bool {
    match error {
        InfraError::Auth(message) => REVOKED_SESSION_CODES
            .iter()
            .any(|code| message.contains(code)),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct EmailPasswordRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAccountRequest {
    pub id_token: String,
    pub password: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokenResponse {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpdateResponse {
    pub display_name: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

#[async_trait]
pub trait AuthHttpClient: Send + Sync {
    async fn sign_in_with_password(
        &self,
        request: EmailPasswordRequest,
    ) -> Result<AuthTokenResponse, InfraError>;

    async fn sign_up(&self, request: EmailPasswordRequest) -> Result<AuthTokenResponse, InfraError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), InfraError>;

    async fn update_account(
        &self,
        request: UpdateAccountRequest,
    ) -> Result<AccountUpdateResponse, InfraError>;

    async fn refresh_id_token(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFirebaseAuthClient {
    client: Client,
    api_key: String,
    identity_base: String,
    token_base: String,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInPayload {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePayload {
    display_name: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RefreshPayload {
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
    user_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ReqwestFirebaseAuthClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            identity_base: IDENTITY_TOOLKIT_BASE.to_string(),
            token_base: SECURE_TOKEN_BASE.to_string(),
        }
    }

    pub fn with_base_urls(
        mut self,
        identity_base: impl Into<String>,
        token_base: impl Into<String>,
    ) -> Self {
        self.identity_base = identity_base.into();
        self.token_base = token_base.into();
        self
    }

    fn endpoint(base: &str, method: &str) -> String {
        format!("{}/{method}", base.trim_end_matches('/'))
    }

    fn parse_expires_in(raw: Option<String>) -> i64 {
        raw.and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .max(0)
    }

    fn auth_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let code = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error)
            .and_then(|error| error.message)
            .unwrap_or_else(|| format!("http_{}", status.as_u16()));
        InfraError::Auth(format!("auth provider error: {code}"))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<T, InfraError> {
        let response = request
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading {action} response: {error}")))?;

        if !status.is_success() {
            return Err(Self::auth_http_error(status, &body));
        }

        serde_json::from_str::<T>(&body).map_err(|error| {
            InfraError::Auth(format!("invalid {action} payload: {error}; body={body}"))
        })
    }

    async fn email_password(
        &self,
        method: &str,
        request: EmailPasswordRequest,
    ) -> Result<AuthTokenResponse, InfraError> {
        let payload: SignInPayload = self
            .post(
                self.client
                    .post(Self::endpoint(&self.identity_base, method))
                    .json(&json!({
                        "email": request.email,
                        "password": request.password,
                        "returnSecureToken": true,
                    })),
                method,
            )
            .await?;

        Ok(AuthTokenResponse {
            user_id: payload.local_id,
            email: payload.email,
            display_name: payload.display_name.filter(|name| !name.trim().is_empty()),
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            expires_in: Self::parse_expires_in(payload.expires_in),
        })
    }
}

#[async_trait]
impl AuthHttpClient for ReqwestFirebaseAuthClient {
    async fn sign_in_with_password(
        &self,
        request: EmailPasswordRequest,
    ) -> Result<AuthTokenResponse, InfraError> {
        self.email_password("accounts:signInWithPassword", request)
            .await
    }

    async fn sign_up(&self, request: EmailPasswordRequest) -> Result<AuthTokenResponse, InfraError> {
        self.email_password("accounts:signUp", request).await
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), InfraError> {
        let _: serde_json::Value = self
            .post(
                self.client
                    .post(Self::endpoint(&self.identity_base, "accounts:sendOobCode"))
                    .json(&json!({ "requestType": "PASSWORD_RESET", "email": email })),
                "password reset",
            )
            .await?;
        Ok(())
    }

    async fn update_account(
        &self,
        request: UpdateAccountRequest,
    ) -> Result<AccountUpdateResponse, InfraError> {
        let mut body = json!({ "idToken": request.id_token, "returnSecureToken": true });
        if let Some(password) = request.password {
            body["password"] = json!(password);
        }
        if let Some(display_name) = request.display_name {
            body["displayName"] = json!(display_name);
        }

        let payload: UpdatePayload = self
            .post(
                self.client
                    .post(Self::endpoint(&self.identity_base, "accounts:update"))
                    .json(&body),
                "account update",
            )
            .await?;

        Ok(AccountUpdateResponse {
            display_name: payload.display_name,
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            expires_in: payload
                .expires_in
                .map(|raw| Self::parse_expires_in(Some(raw))),
        })
    }

    async fn refresh_id_token(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError> {
        let payload: RefreshPayload = self
            .post(
                self.client
                    .post(Self::endpoint(&self.token_base, "token"))
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("refresh_token", refresh_token),
                    ]),
                "token refresh",
            )
            .await?;

        Ok(AuthTokenResponse {
            user_id: payload.user_id,
            email: None,
            display_name: None,
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            expires_in: Self::parse_expires_in(payload.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> ReqwestFirebaseAuthClient {
        ReqwestFirebaseAuthClient::new("web-key").with_base_urls(server.uri(), server.uri())
    }

    #[tokio::test]
    async fn sign_in_maps_token_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts:signInWithPassword"))
            .and(query_param("key", "web-key"))
            .and(body_partial_json(json!({
                "email": "ana@example.com",
                "returnSecureToken": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "localId": "uid-1",
                "email": "ana@example.com",
                "displayName": "",
                "idToken": "id-1",
                "refreshToken": "refresh-1",
                "expiresIn": "3600"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = test_client(&server)
            .sign_in_with_password(EmailPasswordRequest {
                email: "ana@example.com".to_string(),
                password: "secret".to_string(),
            })
            .await
            .expect("sign in");

        assert_eq!(response.user_id, "uid-1");
        assert_eq!(response.display_name, None);
        assert_eq!(response.expires_in, 3600);
    }

    #[tokio::test]
    async fn provider_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts:signInWithPassword"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "INVALID_PASSWORD"}
            })))
            .mount(&server)
            .await;

        let result = test_client(&server)
            .sign_in_with_password(EmailPasswordRequest {
                email: "ana@example.com".to_string(),
                password: "wrong".to_string(),
            })
            .await;

        match result {
            Err(InfraError::Auth(message)) => assert!(message.contains("INVALID_PASSWORD")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_network_error() {
        let client = ReqwestFirebaseAuthClient::new("web-key")
            .with_base_urls("http://127.0.0.1:9/", "http://127.0.0.1:9/");

        let error = client
            .refresh_id_token("refresh-1")
            .await
            .expect_err("closed port");

        assert!(matches!(error, InfraError::Network(_)));
        assert!(!is_session_revoked(&error));
    }

    #[tokio::test]
    async fn rejected_refresh_token_counts_as_revoked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "INVALID_REFRESH_TOKEN", "status": "INVALID_ARGUMENT"}
            })))
            .mount(&server)
            .await;

        let error = test_client(&server)
            .refresh_id_token("refresh-1")
            .await
            .expect_err("rejected");

        assert!(is_session_revoked(&error));
        assert!(!is_session_revoked(&InfraError::Auth(
            "auth provider error: http_503".to_string()
        )));
    }

    #[tokio::test]
    async fn refresh_posts_form_to_token_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": "id-2",
                "refresh_token": "refresh-2",
                "expires_in": "3600",
                "user_id": "uid-1",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refreshed = test_client(&server)
            .refresh_id_token("refresh-1")
            .await
            .expect("refresh");
        assert_eq!(refreshed.id_token, "id-2");
        assert_eq!(refreshed.refresh_token, "refresh-2");
    }
}
