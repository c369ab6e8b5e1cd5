//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Session-gated routing in front of a web application
#[derive(Parser, Debug)]
#[command(name = "session-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SESSION_GATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "SESSION_GATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "SESSION_GATE_HOST")]
    pub host: Option<String>,

    /// Application to forward gated pages to
    #[arg(long, env = "SESSION_GATE_UPSTREAM")]
    pub upstream: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SESSION_GATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SESSION_GATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the edge server (default)
    Serve,

    /// Print the gate decision for a path
    Decide {
        /// Request path, e.g. /dashboard
        #[arg(required = true)]
        path: String,

        /// Evaluate as a signed-in request
        #[arg(short, long)]
        authenticated: bool,
    },
}
