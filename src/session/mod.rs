//! Sessions and the identity provider seam
//!
//! The identity service is an external collaborator. Everything here only
//! observes sessions through [`SessionProvider`]; nothing outside the provider
//! mutates them.

mod http;
mod resolver;

pub use http::HttpSessionProvider;
pub use resolver::SessionResolver;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use cookie::Cookie;
use serde::{Deserialize, Serialize};

use crate::Result;

/// User attached to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    /// Provider-side user id
    pub id: String,
    /// Email, when the provider exposes it
    #[serde(default)]
    pub email: Option<String>,
}

/// Proof that a user is signed in, plus the access token derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for API calls
    pub access_token: String,
    /// Token type (usually "bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Refresh token, if issued
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds at issue time
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// The signed-in user
    #[serde(default)]
    pub user: Option<SessionUser>,
}

impl Session {
    /// A session carrying only an access token
    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: None,
            refresh_token: None,
            expires_in: None,
            user: None,
        }
    }
}

/// Credential presented by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    access_token: Option<String>,
}

impl Credentials {
    /// No credential
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A bearer credential
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
        }
    }

    /// Extract the credential from a request: the session cookie first, then
    /// an `Authorization: Bearer` header.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, cookie_name: &str) -> Self {
        let from_cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(std::result::Result::ok)
            .find(|c| c.name() == cookie_name && !c.value().is_empty())
            .map(|c| c.value().to_string());

        let access_token = from_cookie.or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
        });

        Self { access_token }
    }

    /// The presented token, if any
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Whether no credential was presented
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.access_token.is_none()
    }
}

/// Identity service: reports sessions, exchanges codes, issues tokens
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Session bound to `credentials`, or `None`.
    ///
    /// A transport or provider fault is an error, never `Ok(None)`.
    async fn get_session(&self, credentials: &Credentials) -> Result<Option<Session>>;

    /// Exchange a one-time authorization code for a session
    async fn exchange_code_for_session(&self, code: &str) -> Result<Session>;

    /// Sign in with email and password.
    ///
    /// Rejected credentials are [`Error::Auth`](crate::Error::Auth); provider faults are not.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// Register a new account. The confirmation email links to `redirect_to`.
    ///
    /// `None` while the account awaits email confirmation.
    async fn sign_up(&self, email: &str, password: &str, redirect_to: &str) -> Result<Option<Session>>;

    /// Access token of the provider's current session, if it holds one
    async fn access_token(&self) -> Result<Option<String>>;

    /// Revoke the session bound to `credentials` (or the current one)
    async fn sign_out(&self, credentials: &Credentials) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider for unit tests

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::Error;

    #[derive(Default)]
    pub struct ScriptedProvider {
        pub sessions: Mutex<HashMap<String, Session>>,
        pub codes: Mutex<HashMap<String, Session>>,
        pub current: Mutex<Option<Session>>,
        pub accounts: Mutex<HashMap<String, String>>,
        pub confirm_sign_ups: bool,
        pub fail_resolution: bool,
        pub exchange_calls: AtomicUsize,
        pub token_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn with_session(token: &str) -> Self {
            let provider = Self::default();
            provider
                .sessions
                .lock()
                .insert(token.to_string(), Session::with_token(token));
            provider
        }

        pub fn with_code(self, code: &str, token: &str) -> Self {
            self.codes
                .lock()
                .insert(code.to_string(), Session::with_token(token));
            self
        }

        pub fn with_current(self, token: &str) -> Self {
            *self.current.lock() = Some(Session::with_token(token));
            self
        }

        pub fn with_account(self, email: &str, password: &str) -> Self {
            self.accounts
                .lock()
                .insert(email.to_string(), password.to_string());
            self
        }

        pub fn exchange_calls(&self) -> usize {
            self.exchange_calls.load(Ordering::SeqCst)
        }

        pub fn token_calls(&self) -> usize {
            self.token_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionProvider for ScriptedProvider {
        async fn get_session(&self, credentials: &Credentials) -> Result<Option<Session>> {
            if self.fail_resolution {
                return Err(Error::Resolution("provider unreachable".to_string()));
            }
            Ok(credentials
                .access_token()
                .and_then(|t| self.sessions.lock().get(t).cloned()))
        }

        async fn exchange_code_for_session(&self, code: &str) -> Result<Session> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            let session = self
                .codes
                .lock()
                .remove(code)
                .ok_or_else(|| Error::Exchange(format!("invalid code {code}")))?;
            self.sessions
                .lock()
                .insert(session.access_token.clone(), session.clone());
            *self.current.lock() = Some(session.clone());
            Ok(session)
        }

        async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
            if self.fail_resolution {
                return Err(Error::Resolution("provider unreachable".to_string()));
            }
            if self.accounts.lock().get(email).map(String::as_str) != Some(password) {
                return Err(Error::Auth("Invalid login credentials".to_string()));
            }
            let session = Session::with_token(format!("tok-{email}"));
            self.sessions
                .lock()
                .insert(session.access_token.clone(), session.clone());
            *self.current.lock() = Some(session.clone());
            Ok(session)
        }

        async fn sign_up(&self, email: &str, password: &str, _redirect_to: &str) -> Result<Option<Session>> {
            if self.accounts.lock().contains_key(email) {
                return Err(Error::Auth("User already registered".to_string()));
            }
            self.accounts
                .lock()
                .insert(email.to_string(), password.to_string());
            if self.confirm_sign_ups {
                return Ok(None);
            }
            self.sign_in_with_password(email, password).await.map(Some)
        }

        async fn access_token(&self) -> Result<Option<String>> {
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.current.lock().as_ref().map(|s| s.access_token.clone()))
        }

        async fn sign_out(&self, credentials: &Credentials) -> Result<()> {
            if let Some(token) = credentials.access_token() {
                self.sessions.lock().remove(token);
            }
            *self.current.lock() = None;
            Ok(())
        }
    }
}
