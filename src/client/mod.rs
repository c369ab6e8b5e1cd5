//! Client tier
//!
//! Runs the same access policy inside the application after hydration. The
//! session is observed through a `watch` channel instead of a cookie-bound
//! request, and redirects are client-side navigations.

mod callback;
mod guard;

pub use callback::{CallbackExchanger, CallbackPage, CallbackQuery, CallbackView, ExchangeOutcome};
pub use guard::{ClientGuard, GuardView};

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::Result;
use crate::gate::AuthState;
use crate::session::{Credentials, Session, SessionProvider};
use crate::token_cache::TokenCache;

/// Client-observed session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Still being determined; no decision may be made on this
    Loading,
    /// No session
    SignedOut,
    /// Active session
    SignedIn(Session),
}

impl SessionState {
    /// Auth state for the gate, or `None` while loading
    #[must_use]
    pub fn auth_state(&self) -> Option<AuthState> {
        match self {
            Self::Loading => None,
            Self::SignedOut => Some(AuthState::Unauthenticated),
            Self::SignedIn(_) => Some(AuthState::Authenticated),
        }
    }
}

/// Client-side navigation
pub trait Navigator: Send + Sync {
    /// Move to `path` without a full network round-trip
    fn navigate(&self, path: &str);
}

/// Path part of a client location, without query or fragment
#[must_use]
pub fn route_path(location: &str) -> &str {
    location
        .split(['?', '#'])
        .next()
        .filter(|path| !path.is_empty())
        .unwrap_or("/")
}

/// Current client location (path, query and fragment); navigating updates it
/// and notifies subscribers
#[derive(Debug)]
pub struct Location {
    path: watch::Sender<String>,
}

impl Location {
    /// Start at `path`
    pub fn new(path: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(path.into());
        Self { path: tx }
    }

    /// Current path
    #[must_use]
    pub fn current(&self) -> String {
        self.path.borrow().clone()
    }

    /// Current path, without query or fragment
    #[must_use]
    pub fn path(&self) -> String {
        route_path(&self.path.borrow()).to_string()
    }

    /// Follow location changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.path.subscribe()
    }
}

impl Navigator for Location {
    fn navigate(&self, path: &str) {
        let changed = self.path.send_if_modified(|current| {
            if current == path {
                false
            } else {
                path.clone_into(current);
                true
            }
        });
        if changed {
            info!(path = %path, "Client navigation");
        }
    }
}

/// Reactive view of "is there a session", fed by the provider
pub struct SessionObserver {
    provider: Arc<dyn SessionProvider>,
    state: watch::Sender<SessionState>,
}

impl SessionObserver {
    /// Create an observer in the [`SessionState::Loading`] state
    #[must_use]
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        let (state, _rx) = watch::channel(SessionState::Loading);
        Self { provider, state }
    }

    /// Follow session state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Current state
    #[must_use]
    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Ask the provider for the current session and publish the result.
    ///
    /// A provider failure publishes [`SessionState::SignedOut`].
    pub async fn refresh(&self) -> SessionState {
        let next = match self.lookup().await {
            Ok(Some(session)) => SessionState::SignedIn(session),
            Ok(None) => SessionState::SignedOut,
            Err(e) => {
                error!(error = %e, "Session check failed, treating as signed out");
                SessionState::SignedOut
            }
        };
        self.publish(next.clone());
        next
    }

    async fn lookup(&self) -> Result<Option<Session>> {
        let Some(token) = self.provider.access_token().await? else {
            return Ok(None);
        };
        self.provider.get_session(&Credentials::bearer(token)).await
    }

    /// Publish an auth state change (sign-in from the callback, or sign-out)
    pub fn set_session(&self, session: Option<Session>) {
        let next = session.map_or(SessionState::SignedOut, SessionState::SignedIn);
        self.publish(next);
    }

    /// Sign in with email and password and publish the new session.
    ///
    /// A rejected sign-in leaves the state untouched.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.provider.sign_in_with_password(email, password).await?;
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Revoke the session and publish [`SessionState::SignedOut`].
    ///
    /// The state is signed-out even if the provider call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.provider.sign_out(&Credentials::anonymous()).await;
        self.publish(SessionState::SignedOut);
        result
    }

    fn publish(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(signed_in = matches!(next, SessionState::SignedIn(_)), "Session state changed");
                *current = next;
                true
            }
        });
    }
}

/// Apply one session state to the token cache
pub fn sync_token(state: &SessionState, cache: &TokenCache) {
    match state {
        SessionState::SignedIn(session) => cache.set(session.access_token.clone()),
        SessionState::SignedOut => cache.clear(),
        SessionState::Loading => {}
    }
}

/// Keep `cache` in step with the observed session until the observer is dropped
pub fn spawn_token_sync(
    mut session: watch::Receiver<SessionState>,
    cache: Arc<TokenCache>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let state = session.borrow_and_update().clone();
            sync_token(&state, &cache);
            if session.changed().await.is_err() {
                debug!("Session observer dropped, stopping token sync");
                break;
            }
        }
    })
}
