//! Edge HTTP router

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{Form, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
    routing::get,
};
use cookie::{Cookie, SameSite};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use url::Url;

use super::guard::{EdgeGuard, edge_guard_middleware};
use super::pages::{self, Notice};
use crate::client::{CallbackExchanger, CallbackQuery, ExchangeOutcome};
use crate::config::{Config, GateConfig};
use crate::gate::AuthState;
use crate::session::{Credentials, Session, SessionProvider};
use crate::{Error, Result};

/// Largest request body forwarded upstream
const MAX_FORWARD_BODY: usize = 10 * 1024 * 1024;

/// Header carrying the edge's auth decision to the upstream application
pub const AUTH_STATE_HEADER: &str = "x-auth-state";

/// Shown after a sign-up that awaits email confirmation
const CONFIRM_EMAIL: &str = "Check your email to confirm your account!";

/// Which form the entry page shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EntryMode {
    #[default]
    SignIn,
    SignUp,
}

#[derive(Debug, Default, Deserialize)]
struct EntryQuery {
    #[serde(default)]
    mode: EntryMode,
}

/// Entry form submission
#[derive(Debug, Deserialize)]
struct EntryForm {
    email: String,
    password: String,
    #[serde(default)]
    mode: EntryMode,
}

/// Shared state for edge handlers
pub struct EdgeState {
    /// Request-time gate
    pub guard: Arc<EdgeGuard>,
    /// Identity provider
    pub provider: Arc<dyn SessionProvider>,
    /// Callback code exchange
    pub exchanger: CallbackExchanger,
    /// Gate paths
    pub gate: GateConfig,
    /// Application rendering gated pages
    pub upstream: Option<Url>,
    /// Client used for forwarding
    pub http_client: Client,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl EdgeState {
    /// Build handler state from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid upstream, public URL or
    /// exclusion pattern.
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn SessionProvider>,
        http_client: Client,
    ) -> Result<Self> {
        let guard = EdgeGuard::from_config(config, Arc::clone(&provider))?;

        let upstream = match config.upstream.as_deref().filter(|u| !u.is_empty()) {
            Some(raw) => {
                let normalized = if raw.ends_with('/') {
                    raw.to_string()
                } else {
                    format!("{raw}/")
                };
                Some(
                    Url::parse(&normalized)
                        .map_err(|e| Error::Config(format!("Invalid upstream '{raw}': {e}")))?,
                )
            }
            None => None,
        };

        Ok(Self {
            guard: Arc::new(guard),
            exchanger: CallbackExchanger::new(
                Arc::clone(&provider),
                config.callback.code_retention,
            ),
            provider,
            gate: config.gate.clone(),
            upstream,
            http_client,
            request_timeout: config.server.request_timeout,
        })
    }

    fn session_cookie(&self, session: &Session) -> Cookie<'static> {
        let mut builder = Cookie::build((
            self.guard.cookie_name().to_string(),
            session.access_token.clone(),
        ))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(self.guard.secure_cookies());

        if let Some(secs) = session.expires_in {
            let secs = i64::try_from(secs).unwrap_or(i64::MAX);
            builder = builder.max_age(cookie::time::Duration::seconds(secs));
        }

        builder.build()
    }

    fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.guard.cookie_name().to_string(), ""))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.guard.secure_cookies())
            .build();
        cookie.make_removal();
        cookie
    }
}

/// Create the edge router
pub fn create_router(state: Arc<EdgeState>) -> Router {
    let guard = Arc::clone(&state.guard);
    let gate = state.gate.clone();

    Router::new()
        .route("/health", get(health_handler))
        .route(&gate.entry_path, get(entry_handler).post(entry_submit_handler))
        .route(&gate.callback_path, get(callback_handler))
        .route(&gate.signout_path, get(signout_handler).post(signout_handler))
        .fallback(forward_handler)
        .layer(middleware::from_fn_with_state(guard, edge_guard_middleware))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Entry page
async fn entry_handler(
    State(state): State<Arc<EdgeState>>,
    Query(query): Query<EntryQuery>,
) -> Response {
    Html(pages::entry_page(
        &state.gate.entry_path,
        query.mode == EntryMode::SignUp,
        "",
        None,
    ))
    .into_response()
}

/// Entry form: password sign-in or sign-up
async fn entry_submit_handler(
    State(state): State<Arc<EdgeState>>,
    headers: HeaderMap,
    Form(form): Form<EntryForm>,
) -> Response {
    let result = match form.mode {
        EntryMode::SignIn => state
            .provider
            .sign_in_with_password(&form.email, &form.password)
            .await
            .map(Some),
        EntryMode::SignUp => {
            let callback = state
                .guard
                .redirect_location(&headers, &state.gate.callback_path);
            state
                .provider
                .sign_up(&form.email, &form.password, &callback)
                .await
        }
    };

    let sign_up = form.mode == EntryMode::SignUp;
    match result {
        Ok(Some(session)) => established(&state, &headers, &session),
        Ok(None) => Html(pages::entry_page(
            &state.gate.entry_path,
            sign_up,
            &form.email,
            Some(Notice::Success(CONFIRM_EMAIL)),
        ))
        .into_response(),
        Err(e) => {
            let (status, message) = if e.is_auth_failure() {
                debug!(error = %e, "Credentials rejected");
                let message = match e {
                    Error::Auth(message) => message,
                    other => other.to_string(),
                };
                (StatusCode::BAD_REQUEST, message)
            } else {
                error!(error = %e, "Identity provider failed during sign-in");
                (
                    StatusCode::BAD_GATEWAY,
                    "The identity service is unavailable. Try again later.".to_string(),
                )
            };
            (
                status,
                Html(pages::entry_page(
                    &state.gate.entry_path,
                    sign_up,
                    &form.email,
                    Some(Notice::Error(&message)),
                )),
            )
                .into_response()
        }
    }
}

/// Set the session cookie and send the browser home
fn established(state: &EdgeState, headers: &HeaderMap, session: &Session) -> Response {
    let cookie = state.session_cookie(session);
    let location = state.guard.redirect_location(headers, &state.gate.home_path);
    info!(to = %location, "Sign-in complete");
    (
        AppendHeaders([(header::SET_COOKIE, cookie.to_string())]),
        Redirect::to(&location),
    )
        .into_response()
}

/// Identity provider callback: exchange the code, set the cookie, go home
async fn callback_handler(
    State(state): State<Arc<EdgeState>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    match state.exchanger.exchange(&query).await {
        Ok(ExchangeOutcome::Established(session)) => established(&state, &headers, &session),
        Ok(ExchangeOutcome::NoCode | ExchangeOutcome::AlreadySubmitted) => {
            Html(pages::processing_page()).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Html(pages::error_page(&e.to_string(), &state.gate.entry_path)),
        )
            .into_response(),
    }
}

/// Sign out: revoke at the provider, clear the cookie, go to the entry page
async fn signout_handler(State(state): State<Arc<EdgeState>>, headers: HeaderMap) -> Response {
    let credentials = Credentials::from_headers(&headers, state.guard.cookie_name());
    if let Err(e) = state.provider.sign_out(&credentials).await {
        warn!(error = %e, "Provider sign-out failed, clearing cookie anyway");
    }

    let location = state
        .guard
        .redirect_location(&headers, &state.gate.entry_path);
    info!(to = %location, "Signed out");
    (
        AppendHeaders([(header::SET_COOKIE, state.removal_cookie().to_string())]),
        Redirect::to(&location),
    )
        .into_response()
}

/// Everything else: forward to the upstream application
async fn forward_handler(State(state): State<Arc<EdgeState>>, request: Request) -> Response {
    let Some(ref upstream) = state.upstream else {
        return Html(pages::placeholder_page(request.uri().path())).into_response();
    };

    match forward(&state.http_client, upstream, request).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Upstream request failed");
            (StatusCode::BAD_GATEWAY, "Upstream unavailable").into_response()
        }
    }
}

async fn forward(client: &Client, upstream: &Url, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("", |pq| pq.as_str())
        .trim_start_matches('/');
    let url = upstream
        .join(path_and_query)
        .map_err(|e| Error::Internal(format!("Invalid upstream path: {e}")))?;

    let body = to_bytes(body, MAX_FORWARD_BODY)
        .await
        .map_err(|e| Error::Internal(format!("Failed to read request body: {e}")))?;

    let mut headers = parts.headers;
    for name in [
        header::HOST,
        header::CONNECTION,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
    ] {
        headers.remove(name);
    }
    headers.remove(AUTH_STATE_HEADER);
    if let Some(auth) = parts.extensions.get::<AuthState>() {
        let value = if auth.is_authenticated() {
            "authenticated"
        } else {
            "unauthenticated"
        };
        headers.insert(AUTH_STATE_HEADER, HeaderValue::from_static(value));
    }

    debug!(method = %parts.method, url = %url, "Forwarding to upstream");
    let upstream_response = client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    response_headers.remove(header::CONNECTION);
    response_headers.remove(header::TRANSFER_ENCODING);
    let bytes = upstream_response.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
