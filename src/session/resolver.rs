//! Session resolver
//!
//! Turns a caller's credentials into an [`AuthState`], keeping provider faults
//! distinct from "no session".

use std::sync::Arc;

use tracing::debug;

use super::{Credentials, SessionProvider};
use crate::gate::AuthState;
use crate::{Error, Result};

/// Resolves whether a request carries a valid session
#[derive(Clone)]
pub struct SessionResolver {
    provider: Arc<dyn SessionProvider>,
}

impl SessionResolver {
    /// Create a resolver backed by `provider`
    #[must_use]
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self { provider }
    }

    /// Resolve `credentials` to an [`AuthState`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] when the provider could not answer. The
    /// caller decides how to react (the edge fails closed).
    pub async fn resolve(&self, credentials: &Credentials) -> Result<AuthState> {
        match self.provider.get_session(credentials).await {
            Ok(session) => {
                let state = AuthState::from_presence(session.is_some());
                debug!(state = ?state, anonymous = credentials.is_anonymous(), "Resolved session");
                Ok(state)
            }
            Err(Error::Resolution(message)) => Err(Error::Resolution(message)),
            Err(e) => Err(Error::Resolution(e.to_string())),
        }
    }
}
