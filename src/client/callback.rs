//! Callback exchange
//!
//! Consumes the one-time authorization code delivered on the callback path
//! and trades it for a session. Each distinct code is submitted at most once;
//! a failed exchange is not retried, since the provider has already
//! invalidated the code.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Navigator, SessionObserver};
use crate::session::{Session, SessionProvider};
use crate::{Error, Result};

/// Query parameters on the callback path
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code
    pub code: Option<String>,
    /// Error code reported by the identity provider
    pub error: Option<String>,
    /// Error description reported by the identity provider
    pub error_description: Option<String>,
}

impl CallbackQuery {
    /// Query carrying just a code
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }
}

/// Result of handing a callback query to the exchanger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// No code in the query; nothing was done
    NoCode,
    /// This code was already submitted; nothing was done
    AlreadySubmitted,
    /// The exchange succeeded
    Established(Session),
}

/// Memory of submitted codes. A code is forgotten only after `retention`,
/// which must outlive the provider's code lifetime: a forgotten code can no
/// longer be redeemed anyway.
#[derive(Debug)]
struct SubmittedCodes {
    order: VecDeque<(Instant, String)>,
    seen: HashSet<String>,
    retention: Duration,
}

impl SubmittedCodes {
    fn new(retention: Duration) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            retention,
        }
    }

    /// Record `code` at `now`; false if it is still remembered
    fn insert_at(&mut self, code: &str, now: Instant) -> bool {
        while let Some((submitted_at, _)) = self.order.front() {
            if now.saturating_duration_since(*submitted_at) < self.retention {
                break;
            }
            if let Some((_, expired)) = self.order.pop_front() {
                self.seen.remove(&expired);
            }
        }

        if self.seen.contains(code) {
            return false;
        }
        self.order.push_back((now, code.to_string()));
        self.seen.insert(code.to_string());
        true
    }

    fn insert(&mut self, code: &str) -> bool {
        self.insert_at(code, Instant::now())
    }
}

/// Exchanges authorization codes for sessions, once per code
pub struct CallbackExchanger {
    provider: Arc<dyn SessionProvider>,
    submitted: Mutex<SubmittedCodes>,
}

impl CallbackExchanger {
    /// Create an exchanger remembering each submitted code for `code_retention`
    #[must_use]
    pub fn new(provider: Arc<dyn SessionProvider>, code_retention: Duration) -> Self {
        Self {
            provider,
            submitted: Mutex::new(SubmittedCodes::new(code_retention)),
        }
    }

    /// Handle one observation of the callback query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exchange`] when the provider reported an error on the
    /// redirect or rejected the code. The code stays marked as submitted.
    pub async fn exchange(&self, query: &CallbackQuery) -> Result<ExchangeOutcome> {
        if let Some(ref error) = query.error {
            let description = query
                .error_description
                .as_deref()
                .unwrap_or("Unknown error");
            warn!(error = %error, description = %description, "Identity provider returned an error");
            return Err(Error::Exchange(format!("{error} - {description}")));
        }

        let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
            return Ok(ExchangeOutcome::NoCode);
        };

        if !self.submitted.lock().insert(code) {
            debug!("Authorization code already submitted, skipping");
            return Ok(ExchangeOutcome::AlreadySubmitted);
        }

        match self.provider.exchange_code_for_session(code).await {
            Ok(session) => {
                info!("Session established from callback");
                Ok(ExchangeOutcome::Established(session))
            }
            Err(e) => {
                warn!(error = %e, "Authorization code exchange failed");
                match e {
                    Error::Exchange(_) => Err(e),
                    other => Err(Error::Exchange(other.to_string())),
                }
            }
        }
    }
}

/// What the callback page shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackView {
    /// Waiting for (or without) a code
    Processing,
    /// Exchange succeeded and navigation home was issued
    Done,
    /// Exchange failed; the user stays here
    Failed(String),
}

/// Client callback page: `Pending` until a code is exchanged, then resolved
pub struct CallbackPage {
    exchanger: CallbackExchanger,
    observer: Arc<SessionObserver>,
    navigator: Arc<dyn Navigator>,
    home_path: String,
    view: Mutex<CallbackView>,
}

impl CallbackPage {
    /// Create the page
    pub fn new(
        exchanger: CallbackExchanger,
        observer: Arc<SessionObserver>,
        navigator: Arc<dyn Navigator>,
        home_path: impl Into<String>,
    ) -> Self {
        Self {
            exchanger,
            observer,
            navigator,
            home_path: home_path.into(),
            view: Mutex::new(CallbackView::Processing),
        }
    }

    /// Current view
    #[must_use]
    pub fn view(&self) -> CallbackView {
        self.view.lock().clone()
    }

    /// Called on every render with the current query
    pub async fn on_render(&self, query: &CallbackQuery) -> CallbackView {
        let next = match self.exchanger.exchange(query).await {
            Ok(ExchangeOutcome::NoCode | ExchangeOutcome::AlreadySubmitted) => return self.view(),
            Ok(ExchangeOutcome::Established(session)) => {
                self.observer.set_session(Some(session));
                self.navigator.navigate(&self.home_path);
                CallbackView::Done
            }
            Err(e) => CallbackView::Failed(e.to_string()),
        };

        *self.view.lock() = next.clone();
        next
    }
}
