//! HTTP identity provider
//!
//! Client for a GoTrue-style identity service (`/auth/v1/...`).

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use super::{Credentials, Session, SessionProvider, SessionUser};
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Error payload returned by the identity service
#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ProviderErrorBody {
    fn into_message(self, status: StatusCode) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| format!("HTTP {status}"))
    }
}

/// Parse the provider URL as a base (with a trailing '/')
fn base_url(raw: &str) -> Result<Url> {
    let mut normalized = raw.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized)
        .map_err(|e| Error::Config(format!("Invalid provider url '{raw}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(Error::Config(format!(
            "Provider url '{raw}' cannot be a base URL"
        )));
    }
    Ok(url)
}

/// Identity provider reached over HTTP
pub struct HttpSessionProvider {
    /// HTTP client for provider requests
    http_client: Client,

    /// Provider base URL (always ends with '/')
    base_url: Url,

    /// Public API key sent as `apikey`
    anon_key: String,

    /// Remember the last established session (client mode)
    persist_session: bool,

    /// Session established through this provider, when persisting
    current: RwLock<Option<Session>>,
}

impl HttpSessionProvider {
    /// Create a provider that never remembers sessions (edge mode)
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the provider URL is not a valid base URL.
    pub fn new(http_client: Client, config: &ProviderConfig) -> Result<Self> {
        let base_url = base_url(&config.url)?;

        Ok(Self {
            http_client,
            base_url,
            anon_key: config.resolve_anon_key(),
            persist_session: false,
            current: RwLock::new(None),
        })
    }

    /// Remember sessions established through this provider (client mode)
    #[must_use]
    pub fn persisting(mut self) -> Self {
        self.persist_session = true;
        self
    }

    /// Provider endpoint URL
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Internal(format!("Invalid provider endpoint '{path}': {e}")))
    }

    fn remember(&self, session: &Session) {
        if self.persist_session {
            *self.current.write() = Some(session.clone());
        }
    }

    fn forget_if(&self, token: &str) {
        let mut current = self.current.write();
        if current.as_ref().is_some_and(|s| s.access_token == token) {
            *current = None;
        }
    }

    /// Map a failed credential request: a 4xx is the caller's fault, anything else the provider's
    async fn credential_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let message = Self::error_message(response).await;
        if status.is_client_error() {
            Error::Auth(message)
        } else {
            Error::Resolution(format!("HTTP {status} - {message}"))
        }
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        response
            .json::<ProviderErrorBody>()
            .await
            .unwrap_or_default()
            .into_message(status)
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn get_session(&self, credentials: &Credentials) -> Result<Option<Session>> {
        let Some(token) = credentials.access_token() else {
            return Ok(None);
        };

        let response = self
            .http_client
            .get(self.endpoint("auth/v1/user")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Resolution(format!("Session lookup failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(status = %status, "Provider rejected credential");
            self.forget_if(token);
            return Ok(None);
        }

        if !status.is_success() {
            let message = Self::error_message(response).await;
            return Err(Error::Resolution(format!(
                "Session lookup failed: HTTP {status} - {message}"
            )));
        }

        let user: SessionUser = response
            .json()
            .await
            .map_err(|e| Error::Resolution(format!("Failed to parse user response: {e}")))?;

        let remembered = self
            .current
            .read()
            .as_ref()
            .filter(|s| s.access_token == token)
            .cloned();

        let session = Session {
            user: Some(user),
            ..remembered.unwrap_or_else(|| Session::with_token(token))
        };

        Ok(Some(session))
    }

    async fn exchange_code_for_session(&self, code: &str) -> Result<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "pkce");

        let response = self
            .http_client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "auth_code": code }))
            .send()
            .await
            .map_err(|e| Error::Exchange(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = Self::error_message(response).await;
            return Err(Error::Exchange(format!("HTTP {status} - {message}")));
        }

        let session: Session = response
            .json()
            .await
            .map_err(|e| Error::Exchange(format!("Failed to parse token response: {e}")))?;

        self.remember(&session);
        info!(
            user = session.user.as_ref().map_or("unknown", |u| u.id.as_str()),
            "Exchanged authorization code for session"
        );
        Ok(session)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .http_client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| Error::Resolution(format!("Sign-in request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::credential_error(response).await);
        }

        let session: Session = response
            .json()
            .await
            .map_err(|e| Error::Resolution(format!("Failed to parse sign-in response: {e}")))?;

        self.remember(&session);
        info!(
            user = session.user.as_ref().map_or("unknown", |u| u.id.as_str()),
            "Signed in with password"
        );
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, redirect_to: &str) -> Result<Option<Session>> {
        let mut url = self.endpoint("auth/v1/signup")?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);

        let response = self
            .http_client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| Error::Resolution(format!("Sign-up request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::credential_error(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Resolution(format!("Failed to parse sign-up response: {e}")))?;

        // Without email confirmation the provider answers with a session, otherwise with the bare user
        if body.get("access_token").is_none() {
            info!("Signed up, confirmation pending");
            return Ok(None);
        }
        let session: Session = serde_json::from_value(body)?;
        self.remember(&session);
        info!("Signed up with immediate session");
        Ok(Some(session))
    }

    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.current.read().as_ref().map(|s| s.access_token.clone()))
    }

    async fn sign_out(&self, credentials: &Credentials) -> Result<()> {
        let token = credentials
            .access_token()
            .map(ToString::to_string)
            .or_else(|| self.current.read().as_ref().map(|s| s.access_token.clone()));

        let Some(token) = token else {
            return Ok(());
        };
        self.forget_if(&token);

        let response = self
            .http_client
            .post(self.endpoint("auth/v1/logout")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(&token)
            .send()
            .await?;

        let status = response.status();
        // 401: already revoked
        if !status.is_success() && status != StatusCode::UNAUTHORIZED {
            warn!(status = %status, "Provider sign-out failed");
        } else {
            info!("Signed out");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpSessionProvider {
        let config = ProviderConfig {
            url: server.uri(),
            anon_key: "anon".to_string(),
            ..ProviderConfig::default()
        };
        HttpSessionProvider::new(Client::new(), &config).unwrap()
    }

    #[tokio::test]
    async fn test_get_session_active() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer tok1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "u-1", "email": "a@example.com"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = provider(&server)
            .get_session(&Credentials::bearer("tok1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.access_token, "tok1");
        assert_eq!(session.user.unwrap().id, "u-1");
    }

    #[tokio::test]
    async fn test_get_session_rejected_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "invalid JWT"})))
            .mount(&server)
            .await;

        let session = provider(&server)
            .get_session(&Credentials::bearer("expired"))
            .await
            .unwrap();
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn test_get_session_provider_fault_is_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server)
            .get_session(&Credentials::bearer("tok1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[tokio::test]
    async fn test_get_session_anonymous_skips_provider() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let session = provider(&server)
            .get_session(&Credentials::anonymous())
            .await
            .unwrap();
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn test_exchange_code_persists_in_client_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "pkce"))
            .and(body_json(json!({"auth_code": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok1",
                "token_type": "bearer",
                "refresh_token": "ref1",
                "user": {"id": "u-1"}
            })))
            .mount(&server)
            .await;

        let edge = provider(&server);
        edge.exchange_code_for_session("abc").await.unwrap();
        assert_eq!(edge.access_token().await.unwrap(), None);

        let client = provider(&server).persisting();
        let session = client.exchange_code_for_session("abc").await.unwrap();
        assert_eq!(session.refresh_token.as_deref(), Some("ref1"));
        assert_eq!(client.access_token().await.unwrap().as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_exchange_failure_carries_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Auth code already used"
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .exchange_code_for_session("used")
            .await
            .unwrap_err();
        match err {
            Error::Exchange(message) => assert!(message.contains("Auth code already used")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_sign_out_forgets_current_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer tok1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = provider(&server).persisting();
        client.exchange_code_for_session("abc").await.unwrap();
        client.sign_out(&Credentials::anonymous()).await.unwrap();
        assert_eq!(client.access_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_password_sign_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon"))
            .and(body_json(json!({"email": "a@example.com", "password": "hunter22"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok1",
                "expires_in": 3600,
                "user": {"id": "u-1", "email": "a@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = provider(&server).persisting();
        let session = client
            .sign_in_with_password("a@example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(session.expires_in, Some(3600));
        assert_eq!(client.access_token().await.unwrap().as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_password_sign_in_rejected_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .sign_in_with_password("a@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(err.to_string(), "Authentication error: Invalid login credentials");
    }

    #[tokio::test]
    async fn test_password_sign_in_provider_fault_is_not_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = provider(&server)
            .sign_in_with_password("a@example.com", "hunter22")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(query_param("redirect_to", "https://app.example.com/auth/callback"))
            .and(body_json(json!({"email": "new@example.com", "password": "hunter22"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "u-2",
                "email": "new@example.com",
                "confirmation_sent_at": "2024-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = provider(&server).persisting();
        let session = client
            .sign_up("new@example.com", "hunter22", "https://app.example.com/auth/callback")
            .await
            .unwrap();
        assert!(session.is_none());
        assert_eq!(client.access_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_up_with_immediate_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok2",
                "user": {"id": "u-2"}
            })))
            .mount(&server)
            .await;

        let session = provider(&server)
            .sign_up("new@example.com", "hunter22", "https://app.example.com/auth/callback")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.access_token, "tok2");
    }

    #[tokio::test]
    async fn test_sign_up_rejected_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"msg": "User already registered"})),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .sign_up("a@example.com", "hunter22", "https://app.example.com/auth/callback")
            .await
            .unwrap_err();
        match err {
            Error::Auth(message) => assert_eq!(message, "User already registered"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_provider_url() {
        let config = ProviderConfig {
            url: "not a url".to_string(),
            ..ProviderConfig::default()
        };
        assert!(matches!(
            HttpSessionProvider::new(Client::new(), &config),
            Err(Error::Config(_))
        ));
    }
}
