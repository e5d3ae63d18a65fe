//! Log subscriber setup for processes hosting the engine.
//!
//! The engine only emits `tracing` events; nothing in the library installs a
//! subscriber. Hosts call [`init_tracing`] once at startup, usually with
//! [`Config::tracing`](crate::config::Config::tracing).

use crate::error::TokenError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target prefix of every event emitted by this crate.
pub const TARGET: &str = "tokenmint";

/// Log filtering and output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Level for events from this crate
    pub level: String,
    /// Level for every other target
    pub default_level: String,
    /// Emit one JSON object per event
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            default_level: "warn".to_string(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    /// Set the level for this crate's events.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the level for dependencies and host code.
    #[must_use]
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Choose between JSON and human-readable output.
    #[must_use]
    pub const fn with_json_output(mut self, json: bool) -> Self {
        self.json_output = json;
        self
    }

    /// `EnvFilter` directives, e.g. `warn,tokenmint=info`.
    pub fn directives(&self) -> String {
        format!("{},{TARGET}={}", self.default_level, self.level)
    }

    fn configured_filter(&self) -> Result<EnvFilter, TokenError> {
        let directives = self.directives();
        EnvFilter::try_new(&directives)
            .map_err(|e| TokenError::config(format!("invalid log directives '{directives}': {e}")))
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG`, when set, overrides the configured levels.
///
/// # Errors
///
/// Returns `InvalidConfig` if the levels do not parse or a global subscriber
/// is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), TokenError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.configured_filter()?,
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if config.json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(layer).try_init()
    };
    installed.map_err(|e| TokenError::config(format!("tracing already initialized: {e}")))?;

    tracing::debug!(directives = %config.directives(), "Tracing initialized");
    Ok(())
}
