//! Configuration.
//!
//! [`TokenProfile`] describes one token class (issuer, audience, purpose,
//! lifetime) and is passed to every issue/verify call. [`Config`] is the
//! process-level configuration, built from a raw key/value map so the source
//! (environment, secret manager, file) stays outside the engine.

use crate::error::TokenError;
use crate::keys::KeyStore;
use crate::telemetry::TracingConfig;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Default clock skew tolerance.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(10);

/// Issuance settings and the expected-verification profile of a token class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenProfile {
    /// Expected `iss`
    pub issuer: String,
    /// Expected `aud`
    pub audience: String,
    /// Expected `purpose`
    pub purpose: String,
    /// Lifetime from issuance to expiry
    pub ttl: Duration,
    /// Clock skew tolerance applied to `iat`, `nbf` and `exp`
    pub leeway: Duration,
    /// Whether a successful verification consumes the token
    pub prevent_replay: bool,
}

impl TokenProfile {
    /// Create a profile with the default leeway and replay prevention on.
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        purpose: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            purpose: purpose.into(),
            ttl,
            leeway: DEFAULT_LEEWAY,
            prevent_replay: true,
        }
    }

    /// Set the clock skew leeway.
    #[must_use]
    pub const fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Enable or disable single-use semantics.
    #[must_use]
    pub const fn with_replay_prevention(mut self, prevent_replay: bool) -> Self {
        self.prevent_replay = prevent_replay;
        self
    }

    /// TTL in whole seconds.
    pub(crate) fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)
    }

    /// Leeway in whole seconds.
    pub(crate) fn leeway_secs(&self) -> i64 {
        i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Replay store backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayBackend {
    /// In-process map
    Memory,
    /// Shared Redis instance
    Redis {
        /// Connection URL
        url: String,
    },
}

/// Replay cache settings.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Backend store
    pub backend: ReplayBackend,
    /// Key prefix for markers
    pub prefix: String,
    /// Per-call backend timeout
    pub timeout: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            backend: ReplayBackend::Memory,
            prefix: crate::replay::DEFAULT_PREFIX.to_string(),
            timeout: crate::replay::DEFAULT_TIMEOUT,
        }
    }
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signing and verification keys
    pub keys: Arc<KeyStore>,
    /// Replay cache settings
    pub replay: ReplayConfig,
    /// Logging settings, for [`init_tracing`](crate::telemetry::init_tracing)
    pub tracing: TracingConfig,
}

impl Config {
    /// Load configuration from the process environment (and `.env`).
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, TokenError> {
        dotenvy::dotenv().ok();
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_map(&vars)
    }

    /// Build configuration from a raw key/value map.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a value cannot be parsed or the keys are
    /// unusable.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, TokenError> {
        let keys = Arc::new(KeyStore::from_config_map(vars)?);

        let backend = match get(vars, "REPLAY_BACKEND")
            .unwrap_or("memory")
            .to_lowercase()
            .as_str()
        {
            "memory" => ReplayBackend::Memory,
            "redis" => ReplayBackend::Redis {
                url: get(vars, "REDIS_URL")
                    .unwrap_or("redis://localhost:6379/0")
                    .to_string(),
            },
            other => {
                return Err(TokenError::config(format!(
                    "Invalid REPLAY_BACKEND: {other}"
                )))
            }
        };

        let replay = ReplayConfig {
            backend,
            prefix: get(vars, "REPLAY_KEY_PREFIX")
                .unwrap_or(crate::replay::DEFAULT_PREFIX)
                .to_string(),
            timeout: Duration::from_millis(parse_var(vars, "REPLAY_TIMEOUT_MS", 500)?),
        };

        let tracing = TracingConfig::default()
            .with_level(get(vars, "LOG_LEVEL").unwrap_or("info"))
            .with_default_level(get(vars, "LOG_DEFAULT_LEVEL").unwrap_or("warn"))
            .with_json_output(parse_var(vars, "LOG_JSON", false)?);

        Ok(Self {
            keys,
            replay,
            tracing,
        })
    }
}

fn get<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Parse a variable with default value.
fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, TokenError>
where
    T::Err: std::fmt::Display,
{
    match get(vars, name) {
        Some(val) => val
            .parse()
            .map_err(|e| TokenError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}
