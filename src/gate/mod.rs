//! Route gate
//!
//! The access policy shared by the edge guard and the client guard. Given
//! whether the caller is authenticated and the requested path, [`GatePolicy::decide`]
//! says whether the request may continue or must be redirected.
//!
//! Static assets and other exempt paths are filtered out by an
//! [`EdgeMatcher`] before the policy is ever consulted.

mod matcher;

pub use matcher::EdgeMatcher;

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::GateConfig;

/// Whether the caller holds a valid session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// A session was found
    Authenticated,
    /// No session (or the check failed and we fail closed)
    Unauthenticated,
}

impl AuthState {
    /// Build from a session-presence flag
    #[must_use]
    pub fn from_presence(present: bool) -> Self {
        if present {
            Self::Authenticated
        } else {
            Self::Unauthenticated
        }
    }

    /// Whether this is [`AuthState::Authenticated`]
    #[must_use]
    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

/// Outcome of the gate for one request or navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "target", rename_all = "snake_case")]
pub enum Decision {
    /// Let the request through unchanged
    Continue,
    /// Send the caller elsewhere
    RedirectTo(String),
}

/// Access policy: entry, home and the set of public paths
#[derive(Debug, Clone)]
pub struct GatePolicy {
    entry_path: String,
    home_path: String,
    public_paths: BTreeSet<String>,
}

impl GatePolicy {
    /// Create a policy. The entry path is always public.
    pub fn new(
        entry_path: impl Into<String>,
        home_path: impl Into<String>,
        public_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        let entry_path = entry_path.into();
        let mut public_paths: BTreeSet<String> = public_paths.into_iter().collect();
        public_paths.insert(entry_path.clone());

        Self {
            entry_path,
            home_path: home_path.into(),
            public_paths,
        }
    }

    /// Build the policy from configuration. Entry and callback paths are public.
    #[must_use]
    pub fn from_config(config: &GateConfig) -> Self {
        let public = std::iter::once(config.callback_path.clone())
            .chain(config.extra_public_paths.iter().cloned());
        Self::new(config.entry_path.clone(), config.home_path.clone(), public)
    }

    /// Path of the authentication entry page
    #[must_use]
    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    /// Default post-authentication landing path
    #[must_use]
    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    /// Check if a path is reachable without a session
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.contains(path)
    }

    /// Decide whether `path` may be served for `auth`.
    ///
    /// Deterministic and side-effect free; both guards call this.
    #[must_use]
    pub fn decide(&self, auth: AuthState, path: &str) -> Decision {
        match auth {
            AuthState::Unauthenticated if !self.is_public_path(path) => {
                Decision::RedirectTo(self.entry_path.clone())
            }
            AuthState::Authenticated if path == self.entry_path => {
                Decision::RedirectTo(self.home_path.clone())
            }
            _ => Decision::Continue,
        }
    }
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from_config(&GateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROTECTED: &[&str] = &["/", "/dashboard", "/gym", "/recipe/42", "/auth/other", "/authx"];
    const PUBLIC: &[&str] = &["/auth", "/auth/callback"];

    #[test]
    fn test_unauthenticated_protected_redirects_to_entry() {
        let policy = GatePolicy::default();
        for path in PROTECTED {
            assert_eq!(
                policy.decide(AuthState::Unauthenticated, path),
                Decision::RedirectTo("/auth".to_string()),
                "path {path}"
            );
        }
    }

    #[test]
    fn test_authenticated_entry_redirects_home() {
        let policy = GatePolicy::default();
        assert_eq!(
            policy.decide(AuthState::Authenticated, "/auth"),
            Decision::RedirectTo("/".to_string())
        );
    }

    #[test]
    fn test_public_paths_never_loop() {
        let policy = GatePolicy::default();
        for path in PUBLIC {
            assert_eq!(policy.decide(AuthState::Unauthenticated, path), Decision::Continue);
        }
    }

    #[test]
    fn test_authenticated_passes_everything_but_entry() {
        let policy = GatePolicy::default();
        for path in PROTECTED.iter().chain(["/auth/callback"].iter()) {
            assert_eq!(policy.decide(AuthState::Authenticated, path), Decision::Continue);
        }
    }

    #[test]
    fn test_decide_is_idempotent() {
        let policy = GatePolicy::default();
        for auth in [AuthState::Authenticated, AuthState::Unauthenticated] {
            for path in PROTECTED.iter().chain(PUBLIC.iter()) {
                assert_eq!(policy.decide(auth, path), policy.decide(auth, path));
            }
        }
    }

    #[test]
    fn test_redirect_target_is_stable_under_gate() {
        // Following a redirect never produces a second redirect.
        let policy = GatePolicy::default();
        for auth in [AuthState::Authenticated, AuthState::Unauthenticated] {
            for path in PROTECTED.iter().chain(PUBLIC.iter()) {
                if let Decision::RedirectTo(target) = policy.decide(auth, path) {
                    assert_eq!(policy.decide(auth, &target), Decision::Continue);
                }
            }
        }
    }

    #[test]
    fn test_entry_path_always_public() {
        let policy = GatePolicy::new("/login", "/home", Vec::new());
        assert!(policy.is_public_path("/login"));
        assert_eq!(
            policy.decide(AuthState::Unauthenticated, "/home"),
            Decision::RedirectTo("/login".to_string())
        );
    }

    #[test]
    fn test_extra_public_paths() {
        let config = GateConfig {
            extra_public_paths: vec!["/about".to_string()],
            ..GateConfig::default()
        };
        let policy = GatePolicy::from_config(&config);
        assert_eq!(policy.decide(AuthState::Unauthenticated, "/about"), Decision::Continue);
        assert!(policy.is_public_path("/auth/callback"));
    }

    #[test]
    fn test_decision_serializes() {
        let json = serde_json::to_value(Decision::RedirectTo("/auth".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"decision": "redirect_to", "target": "/auth"}));
        let json = serde_json::to_value(Decision::Continue).unwrap();
        assert_eq!(json, serde_json::json!({"decision": "continue"}));
    }
}
