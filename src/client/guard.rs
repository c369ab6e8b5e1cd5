//! Client guard
//!
//! Re-applies the gate after hydration on every session change and every
//! navigation. While the session is still loading it renders a neutral
//! loading view and never redirects.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use super::{Navigator, SessionState, route_path};
use crate::gate::{Decision, GatePolicy};

/// What the guarded application should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardView {
    /// Session not known yet
    Loading,
    /// Render the requested page
    Render,
    /// A client navigation to this path was issued
    Redirecting(String),
}

/// Watches the session and the location and enforces the gate client-side
pub struct ClientGuard {
    policy: Arc<GatePolicy>,
    session: watch::Receiver<SessionState>,
    navigator: Arc<dyn Navigator>,
}

impl ClientGuard {
    /// Create a guard bound to a session subscription
    #[must_use]
    pub fn new(
        policy: Arc<GatePolicy>,
        session: watch::Receiver<SessionState>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            policy,
            session,
            navigator,
        }
    }

    /// Evaluate the gate for `location` against the current session state.
    /// Only the path is matched; query and fragment are ignored.
    ///
    /// Issues the navigation itself when the gate redirects.
    pub fn evaluate(&self, location: &str) -> GuardView {
        let path = route_path(location);
        let Some(auth) = self.session.borrow().auth_state() else {
            debug!(path = %path, "Session still loading, holding decision");
            return GuardView::Loading;
        };

        match self.policy.decide(auth, path) {
            Decision::Continue => GuardView::Render,
            Decision::RedirectTo(target) => {
                info!(from = %path, to = %target, "Client guard redirect");
                self.navigator.navigate(&target);
                GuardView::Redirecting(target)
            }
        }
    }

    /// Run the guard until the session observer or the location goes away.
    ///
    /// Returns a receiver carrying the latest view.
    pub fn spawn(mut self, mut location: watch::Receiver<String>) -> watch::Receiver<GuardView> {
        let (view_tx, view_rx) = watch::channel(GuardView::Loading);

        tokio::spawn(async move {
            loop {
                let current = location.borrow_and_update().clone();
                self.session.borrow_and_update();
                let view = self.evaluate(&current);
                view_tx.send_replace(view);

                tokio::select! {
                    changed = self.session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = location.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Client guard stopped");
        });

        view_rx
    }
}
