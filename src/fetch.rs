//! Authenticated API fetcher
//!
//! Wraps outbound API calls: makes sure a bearer token is present (cache
//! first, then the session provider), attaches it, and turns non-success
//! responses into errors carrying the server's message.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use session_gate::config::{ApiConfig, ProviderConfig};
//! # use session_gate::fetch::{AuthenticatedFetcher, RequestOptions};
//! # use session_gate::session::HttpSessionProvider;
//! # use session_gate::token_cache::TokenCache;
//! # tokio_test::block_on(async {
//! let provider = HttpSessionProvider::new(reqwest::Client::new(), &ProviderConfig::default())?;
//! let fetcher = AuthenticatedFetcher::from_config(
//!     &ApiConfig::default(),
//!     Arc::new(TokenCache::default()),
//!     Arc::new(provider.persisting()),
//! )?;
//! let response = fetcher.request("/items", RequestOptions::get()).await?;
//! println!("{}", response.body);
//! # Ok::<(), session_gate::Error>(())
//! # });
//! ```

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::session::SessionProvider;
use crate::token_cache::TokenCache;
use crate::{Error, Result};

/// Marker used when the server gives no usable error message
const GENERIC_FAILURE: &str = "An error occurred";

/// Options for one API call
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method
    pub method: Method,
    /// Caller headers; these override the defaults on conflict
    pub headers: HeaderMap,
    /// JSON body
    pub body: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    /// GET with no body
    #[must_use]
    pub fn get() -> Self {
        Self::default()
    }

    /// `method` with a JSON body
    #[must_use]
    pub fn with_body(method: Method, body: Value) -> Self {
        Self {
            method,
            body: Some(body),
            ..Self::default()
        }
    }

    /// Add a caller header
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Successful API response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Decoded JSON body (`Null` when empty)
    pub body: Value,
}

/// Outbound API client that always presents a bearer token
pub struct AuthenticatedFetcher {
    /// HTTP client
    http_client: Client,
    /// API base URL (always ends with '/')
    base_url: Url,
    /// Cached bearer token
    cache: Arc<TokenCache>,
    /// Source of fresh tokens when the cache is empty
    provider: Arc<dyn SessionProvider>,
}

impl AuthenticatedFetcher {
    /// Create a fetcher for `base_url`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `base_url` is not a valid base URL.
    pub fn new(
        http_client: Client,
        base_url: &str,
        cache: Arc<TokenCache>,
        provider: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        let mut raw = base_url.to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)
            .map_err(|e| Error::Config(format!("Invalid API base url '{base_url}': {e}")))?;

        Ok(Self {
            http_client,
            base_url,
            cache,
            provider,
        })
    }

    /// Create a fetcher from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the base URL is invalid.
    pub fn from_config(
        config: &ApiConfig,
        cache: Arc<TokenCache>,
        provider: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        let http_client = Client::builder().timeout(config.timeout).build()?;
        Self::new(http_client, &config.base_url, cache, provider)
    }

    /// The token cache this fetcher reads and fills
    #[must_use]
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Token from the cache, else from the provider (written back to the cache)
    async fn token(&self) -> Result<String> {
        if let Some(token) = self.cache.get() {
            return Ok(token);
        }

        let token = self
            .provider
            .access_token()
            .await
            .map_err(|e| Error::Auth(format!("token lookup failed: {e}")))?
            .ok_or_else(|| Error::Auth("no token".to_string()))?;

        self.cache.set(token.clone());
        Ok(token)
    }

    /// Issue an authenticated call to `endpoint` (relative to the base URL).
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`] when no token can be obtained; no call is made.
    /// - [`Error::Api`] for a non-success response. A 401 also clears the
    ///   token cache so the next call re-derives a token.
    /// - [`Error::Http`] for transport failures.
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse> {
        let token = self.token().await?;

        let url = self
            .base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| Error::Internal(format!("Invalid endpoint '{endpoint}': {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::Auth(format!("token is not a valid header value: {e}")))?,
        );
        headers.extend(options.headers);

        debug!(method = %options.method, url = %url, "Authenticated request");

        let mut builder = self
            .http_client
            .request(options.method, url.clone())
            .headers(headers);
        if let Some(ref body) = options.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                warn!(url = %url, "API rejected token, clearing cache");
                self.cache.clear();
            } else {
                warn!(url = %url, status = %status, "API request failed");
            }
            return Err(Error::api(status, error_message(&bytes, status)));
        }

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        Ok(ApiResponse {
            status,
            headers: response_headers,
            body,
        })
    }

    /// Like [`request`](Self::request), decoding the body into `T`
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request), plus [`Error::Json`] if the body
    /// does not decode.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let response = self.request(endpoint, options).await?;
        Ok(serde_json::from_value(response.body)?)
    }
}

/// Server message from an error body (`message`, then `error`), else a generic marker
fn error_message(body: &[u8], status: StatusCode) -> String {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.get("message")
                .and_then(Value::as_str)
                .or_else(|| v.get("error").and_then(Value::as_str))
        })
        .filter(|m| !m.is_empty())
        .map(ToString::to_string)
        .or_else(|| status.canonical_reason().map(ToString::to_string))
        .unwrap_or_else(|| GENERIC_FAILURE.to_string())
}
