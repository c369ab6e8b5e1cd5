//! Session Gate Library
//!
//! Session-gated routing for a web application with an external identity
//! provider.
//!
//! # Features
//!
//! - **Route gate**: one pure access policy (`gate`) shared by both tiers
//! - **Edge guard**: axum middleware resolving the session cookie per request
//! - **Client guard**: the same policy re-applied on observed session changes
//! - **Callback exchange**: one-time authorization codes traded exactly once
//! - **Authenticated fetch**: API calls carrying a cached bearer token

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod client;
pub mod config;
pub mod edge;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod session;
pub mod token_cache;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
