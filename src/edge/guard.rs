//! Edge guard middleware

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, error, info};
use url::Url;

use crate::{Error, Result};
use crate::config::Config;
use crate::gate::{AuthState, Decision, EdgeMatcher, GatePolicy};
use crate::session::{Credentials, SessionProvider, SessionResolver};

/// Request-time gate enforcement
pub struct EdgeGuard {
    policy: GatePolicy,
    matcher: EdgeMatcher,
    resolver: SessionResolver,
    cookie_name: String,
    public_url: Option<Url>,
    trust_forwarded_headers: bool,
}

impl EdgeGuard {
    /// Create a guard
    #[must_use]
    pub fn new(
        policy: GatePolicy,
        matcher: EdgeMatcher,
        resolver: SessionResolver,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            matcher,
            resolver,
            cookie_name: cookie_name.into(),
            public_url: None,
            trust_forwarded_headers: false,
        }
    }

    /// Build every redirect on `public_url`, whatever the request claims
    #[must_use]
    pub fn with_public_url(mut self, public_url: Url) -> Self {
        self.public_url = Some(public_url);
        self
    }

    /// Honor `X-Forwarded-Host`/`X-Forwarded-Proto` (only behind a proxy that sets them)
    #[must_use]
    pub fn trusting_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    /// Build the guard from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid exclusion pattern or public URL.
    pub fn from_config(config: &Config, provider: Arc<dyn SessionProvider>) -> Result<Self> {
        let guard = Self::new(
            GatePolicy::from_config(&config.gate),
            EdgeMatcher::from_config(&config.edge)?,
            SessionResolver::new(provider),
            config.provider.cookie_name.clone(),
        )
        .trusting_forwarded_headers(config.server.trust_forwarded_headers);

        match config.server.public_url {
            Some(ref raw) => {
                let url = Url::parse(raw).map_err(|e| {
                    Error::Config(format!("Invalid server.public_url '{raw}': {e}"))
                })?;
                Ok(guard.with_public_url(url))
            }
            None => Ok(guard),
        }
    }

    /// Name of the session cookie
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Whether cookies set by the edge should be `Secure`
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.public_url
            .as_ref()
            .is_some_and(|url| url.scheme() == "https")
    }

    /// Resolve the auth state for a request.
    ///
    /// A resolution failure is logged and evaluated as unauthenticated.
    pub async fn auth_state(&self, headers: &HeaderMap, path: &str) -> AuthState {
        let credentials = Credentials::from_headers(headers, &self.cookie_name);
        match self.resolver.resolve(&credentials).await {
            Ok(auth) => auth,
            Err(e) => {
                error!(
                    path = %path,
                    error = %e,
                    "Session resolution failed, treating as unauthenticated"
                );
                AuthState::Unauthenticated
            }
        }
    }

    /// Absolute redirect location for `target`.
    ///
    /// The configured public URL wins. Otherwise the origin comes from the
    /// Host header (or the forwarded headers, when trusted), and the bare
    /// path is used when there is no host at all.
    #[must_use]
    pub fn redirect_location(&self, headers: &HeaderMap, target: &str) -> String {
        let origin = self.public_url.clone().or_else(|| self.request_origin(headers));
        origin
            .and_then(|origin| origin.join(target).ok())
            .map_or_else(|| target.to_string(), String::from)
    }

    fn request_origin(&self, headers: &HeaderMap) -> Option<Url> {
        let forwarded = |name| {
            if self.trust_forwarded_headers {
                header_str(headers, name)
            } else {
                None
            }
        };

        let host = forwarded("x-forwarded-host")
            .or_else(|| header_str(headers, header::HOST.as_str()))?;
        let scheme = forwarded("x-forwarded-proto").unwrap_or("http");
        Url::parse(&format!("{scheme}://{host}")).ok()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Edge guard middleware
///
/// Skips paths the matcher exempts. Everything else is resolved against the
/// identity provider and either continues (with [`AuthState`] attached as a
/// request extension) or is answered with a redirect. Safe methods get a 307;
/// anything else gets a 303 so a form post is not replayed at the target.
pub async fn edge_guard_middleware(
    State(guard): State<Arc<EdgeGuard>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if !guard.matcher.is_evaluated(&path) {
        debug!(path = %path, "Path exempt from edge guard");
        return next.run(request).await;
    }

    let auth = guard.auth_state(request.headers(), &path).await;

    match guard.policy.decide(auth, &path) {
        Decision::Continue => {
            debug!(path = %path, authenticated = auth.is_authenticated(), "Edge guard continue");
            request.extensions_mut().insert(auth);
            next.run(request).await
        }
        Decision::RedirectTo(target) => {
            let location = guard.redirect_location(request.headers(), &target);
            info!(from = %path, to = %location, "Edge guard redirect");
            if request.method() == Method::GET || request.method() == Method::HEAD {
                Redirect::temporary(&location).into_response()
            } else {
                Redirect::to(&location).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeConfig;
    use crate::session::testing::ScriptedProvider;
    use axum::http::HeaderValue;

    fn guard(provider: ScriptedProvider) -> EdgeGuard {
        EdgeGuard::new(
            GatePolicy::default(),
            EdgeMatcher::from_config(&EdgeConfig::default()).unwrap(),
            SessionResolver::new(Arc::new(provider)),
            "sb-access-token",
        )
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_redirect_location_uses_host() {
        let guard = guard(ScriptedProvider::default());
        let h = headers(&[("host", "app.example.com")]);
        assert_eq!(guard.redirect_location(&h, "/auth"), "http://app.example.com/auth");
    }

    #[test]
    fn test_forwarded_headers_ignored_unless_trusted() {
        let h = headers(&[
            ("host", "app.example.com"),
            ("x-forwarded-proto", "https"),
            ("x-forwarded-host", "evil.example.net"),
        ]);

        let untrusting = guard(ScriptedProvider::default());
        assert_eq!(untrusting.redirect_location(&h, "/"), "http://app.example.com/");

        let trusting = guard(ScriptedProvider::default()).trusting_forwarded_headers(true);
        assert_eq!(trusting.redirect_location(&h, "/"), "https://evil.example.net/");
    }

    #[test]
    fn test_public_url_wins_over_request_headers() {
        let guard = guard(ScriptedProvider::default())
            .trusting_forwarded_headers(true)
            .with_public_url(Url::parse("https://app.example.com").unwrap());
        let h = headers(&[("host", "evil.example.net"), ("x-forwarded-host", "evil.example.net")]);
        assert_eq!(guard.redirect_location(&h, "/auth"), "https://app.example.com/auth");
        assert!(guard.secure_cookies());
    }

    #[test]
    fn test_redirect_location_without_host() {
        let bare = guard(ScriptedProvider::default());
        assert_eq!(bare.redirect_location(&HeaderMap::new(), "/auth"), "/auth");
        assert!(!bare.secure_cookies());
    }

    #[tokio::test]
    async fn test_auth_state_fails_closed() {
        let provider = ScriptedProvider {
            fail_resolution: true,
            ..ScriptedProvider::with_session("tok1")
        };
        let guard = guard(provider);
        let h = headers(&[("cookie", "sb-access-token=tok1")]);
        assert_eq!(guard.auth_state(&h, "/dashboard").await, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_auth_state_from_cookie() {
        let guard = guard(ScriptedProvider::with_session("tok1"));
        let h = headers(&[("cookie", "sb-access-token=tok1")]);
        assert_eq!(guard.auth_state(&h, "/dashboard").await, AuthState::Authenticated);

        let h = headers(&[("cookie", "sb-access-token=stale")]);
        assert_eq!(guard.auth_state(&h, "/dashboard").await, AuthState::Unauthenticated);
    }
}
