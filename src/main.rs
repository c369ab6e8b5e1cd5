//! Session gate - session-gated routing at the edge
//!
//! Resolves the visitor's session on every page request and redirects
//! between the auth entry page and the protected application.

use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};

use session_gate::{
    cli::{Cli, Command},
    config::Config,
    edge::EdgeServer,
    gate::{AuthState, EdgeMatcher, GatePolicy},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command.take() {
        Some(Command::Decide {
            path,
            authenticated,
        }) => run_decide(&cli, &path, authenticated),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host.clone_from(host);
            }
            if let Some(ref upstream) = cli.upstream {
                config.upstream = Some(upstream.clone());
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Print the decision the edge would take for `path`
fn run_decide(cli: &Cli, path: &str, authenticated: bool) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let matcher = match EdgeMatcher::from_config(&config.edge) {
        Ok(m) => m,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let policy = GatePolicy::from_config(&config.gate);
    let auth = AuthState::from_presence(authenticated);

    let report = if matcher.is_evaluated(path) {
        json!({
            "path": path,
            "evaluated": true,
            "public": policy.is_public_path(path),
            "result": policy.decide(auth, path),
        })
    } else {
        json!({ "path": path, "evaluated": false })
    };

    match serde_json::to_string_pretty(&report) {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize decision: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the edge server
async fn run_server(cli: Cli) -> ExitCode {
    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        entry = %config.gate.entry_path,
        "Starting session gate"
    );

    let server = match EdgeServer::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
