//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Route gate configuration
    pub gate: GateConfig,
    /// Edge matcher configuration
    pub edge: EdgeConfig,
    /// Identity provider configuration
    pub provider: ProviderConfig,
    /// Outbound API configuration
    pub api: ApiConfig,
    /// Callback exchange configuration
    pub callback: CallbackConfig,
    /// Application that renders pages behind the gate (placeholder if unset)
    pub upstream: Option<String>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // SESSION_GATE_PROVIDER__URL -> provider.url
        figment = figment.merge(Env::prefixed("SESSION_GATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in URL and key values
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        self.provider.url = Self::expand_string(&re, &self.provider.url);
        self.provider.anon_key = Self::expand_string(&re, &self.provider.anon_key);
        self.api.base_url = Self::expand_string(&re, &self.api.base_url);
        if let Some(ref mut upstream) = self.upstream {
            *upstream = Self::expand_string(&re, upstream);
        }
        if let Some(ref mut public_url) = self.server.public_url {
            *public_url = Self::expand_string(&re, public_url);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible base URL; when set, every redirect is built on it
    pub public_url: Option<String>,
    /// Honor `X-Forwarded-Host`/`X-Forwarded-Proto` (only behind a proxy that sets them)
    pub trust_forwarded_headers: bool,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            public_url: None,
            trust_forwarded_headers: false,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Route gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Authentication entry page
    pub entry_path: String,
    /// Identity provider callback page
    pub callback_path: String,
    /// Landing page after sign-in
    pub home_path: String,
    /// Sign-out endpoint
    pub signout_path: String,
    /// Additional paths reachable without a session
    pub extra_public_paths: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            entry_path: "/auth".to_string(),
            callback_path: "/auth/callback".to_string(),
            home_path: "/".to_string(),
            signout_path: "/auth/signout".to_string(),
            extra_public_paths: Vec::new(),
        }
    }
}

/// Edge matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Glob patterns never evaluated by the edge guard
    pub exclude: Vec<String>,
    /// Also skip everything under `api_prefix`
    pub exempt_api: bool,
    /// API route prefix
    pub api_prefix: String,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            exclude: vec![
                "/_next/static/**".to_string(),
                "/_next/image/**".to_string(),
                "/favicon.ico".to_string(),
                "/health".to_string(),
            ],
            exempt_api: false,
            api_prefix: "/api".to_string(),
        }
    }
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the identity service
    pub url: String,
    /// Public API key sent with every provider call.
    /// Supports: literal value or `env:VAR_NAME`
    pub anon_key: String,
    /// Cookie carrying the session credential
    pub cookie_name: String,
    /// Provider request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            cookie_name: "sb-access-token".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key (expand `env:` references)
    #[must_use]
    pub fn resolve_anon_key(&self) -> String {
        if let Some(var_name) = self.anon_key.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.anon_key.clone())
        } else {
            self.anon_key.clone()
        }
    }
}

/// Outbound API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL prepended to every endpoint
    pub base_url: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Callback exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// How long a submitted authorization code is remembered (and never
    /// resubmitted). Must exceed the provider's code lifetime.
    #[serde(with = "humantime_serde")]
    pub code_retention: Duration,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            code_retention: Duration::from_secs(15 * 60),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
