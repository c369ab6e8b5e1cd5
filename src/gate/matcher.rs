//! Edge path matcher
//!
//! Decides which request paths the edge guard evaluates at all. Static assets
//! (and, in the stricter variant, API routes) bypass the gate entirely.

use glob::Pattern;
use tracing::warn;

use crate::config::EdgeConfig;
use crate::{Error, Result};

/// Compiled set of exclusion patterns
#[derive(Debug, Clone)]
pub struct EdgeMatcher {
    excluded: Vec<Pattern>,
    api_prefix: Option<String>,
}

impl EdgeMatcher {
    /// Compile the matcher from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any exclusion pattern is not a valid glob.
    pub fn from_config(config: &EdgeConfig) -> Result<Self> {
        let excluded = config
            .exclude
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| Error::Config(format!("Invalid edge exclude pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let api_prefix = config
            .exempt_api
            .then(|| config.api_prefix.trim_end_matches('/').to_string())
            .filter(|prefix| {
                if prefix.is_empty() {
                    warn!("exempt_api is set but api_prefix is empty, ignoring");
                }
                !prefix.is_empty()
            });

        Ok(Self {
            excluded,
            api_prefix,
        })
    }

    /// Whether the edge guard should evaluate this path
    #[must_use]
    pub fn is_evaluated(&self, path: &str) -> bool {
        if self.excluded.iter().any(|p| p.matches(path)) {
            return false;
        }

        if let Some(ref prefix) = self.api_prefix {
            let under_api = path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
            if under_api {
                return false;
            }
        }

        true
    }
}
