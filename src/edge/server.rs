//! Edge server

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use super::router::{EdgeState, create_router};
use crate::config::Config;
use crate::session::{HttpSessionProvider, SessionProvider};
use crate::{Error, Result};

/// Session-gated edge server
pub struct EdgeServer {
    /// Configuration
    config: Config,
    /// Handler state
    state: Arc<EdgeState>,
}

impl EdgeServer {
    /// Create the server, wiring the HTTP identity provider from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the provider, upstream or exclusion
    /// settings are invalid.
    pub fn new(config: Config) -> Result<Self> {
        if config.provider.url.is_empty() {
            return Err(Error::Config(
                "provider.url is required (set SESSION_GATE_PROVIDER__URL)".to_string(),
            ));
        }

        let provider_client = Client::builder()
            .timeout(config.provider.timeout)
            .build()?;
        let provider: Arc<dyn SessionProvider> =
            Arc::new(HttpSessionProvider::new(provider_client, &config.provider)?);

        let upstream_client = Client::builder()
            .timeout(config.server.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let state = Arc::new(EdgeState::from_config(&config, provider, upstream_client)?);
        Ok(Self { config, state })
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("Session gate listening on http://{addr}");
        info!(
            entry = %self.config.gate.entry_path,
            callback = %self.config.gate.callback_path,
            home = %self.config.gate.home_path,
            "Gate paths"
        );
        match self.config.upstream {
            Some(ref upstream) => info!(upstream = %upstream, "Forwarding gated pages"),
            None => warn!("No upstream configured, serving placeholder pages"),
        }
        info!("============================================================");

        // Flips once the shutdown signal fires; bounds the connection drain
        let (signalled_tx, mut signalled_rx) = watch::channel(false);
        let server = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    let _ = signalled_tx.send(true);
                })
                .await
        };
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let drain_deadline = async move {
            if signalled_rx.wait_for(|signalled| *signalled).await.is_err() {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(shutdown_timeout).await;
        };

        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = drain_deadline => {
                warn!(timeout = ?shutdown_timeout, "Open connections did not drain in time");
            }
        }

        info!("Session gate stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
