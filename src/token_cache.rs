//! Access token cache
//!
//! A single named slot holding the bearer token used by outbound API calls.
//! Overwrite-on-write, read-many, no expiry tracking: a stale token is only
//! discovered when an authenticated call fails.

use parking_lot::RwLock;
use tracing::debug;

/// Default slot name
pub const DEFAULT_SLOT: &str = "access_token";

/// Single-slot bearer token store
#[derive(Debug)]
pub struct TokenCache {
    /// Slot name (for diagnostics)
    slot: String,
    /// Cached token
    token: RwLock<Option<String>>,
}

impl TokenCache {
    /// Create an empty cache with the given slot name
    pub fn new(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            token: RwLock::new(None),
        }
    }

    /// Slot name
    #[must_use]
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Current token, if any
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Replace the cached token
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
        debug!(slot = %self.slot, "Cached access token");
    }

    /// Empty the slot (sign-out, or a token the API rejected)
    pub fn clear(&self) {
        if self.token.write().take().is_some() {
            debug!(slot = %self.slot, "Cleared access token");
        }
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT)
    }
}
