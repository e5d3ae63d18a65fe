//! Single-use token tracking.
//!
//! [`ReplayCache`] namespaces token identifiers, applies a timeout to every
//! backend call and maps backend failures to `BackendUnavailable`. The
//! backend itself is a [`ReplayStore`]; the only safety-critical contract is
//! that [`ReplayStore::set_if_absent`] is a single atomic operation.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryReplayStore;
pub use self::redis::RedisReplayStore;

use crate::error::TokenError;
use crate::metrics;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default key prefix for replay markers.
pub const DEFAULT_PREFIX: &str = "token:jti:";

/// Default timeout for a single backend call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Shortest TTL ever written for a marker.
pub const MIN_MARKER_TTL: Duration = Duration::from_secs(1);

/// TTL-capable key-value backend for replay markers.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Atomically set `key` with `ttl` unless it exists.
    ///
    /// Returns `true` if this call created the key.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, TokenError>;

    /// Set `key` with `ttl`, overwriting any existing marker.
    async fn set(&self, key: &str, ttl: Duration) -> Result<(), TokenError>;

    /// Check whether `key` exists and has not expired.
    async fn exists(&self, key: &str) -> Result<bool, TokenError>;
}

/// Replay tracking over a pluggable store.
#[derive(Clone)]
pub struct ReplayCache {
    store: Arc<dyn ReplayStore>,
    prefix: String,
    timeout: Duration,
}

impl ReplayCache {
    /// Create a cache with the default prefix and timeout.
    pub fn new(store: Arc<dyn ReplayStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Cache backed by a fresh in-process store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryReplayStore::new()))
    }

    /// Set the key prefix used to isolate token classes.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the per-call backend timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Key prefix prepended to every identifier.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Atomically test and mark `jti`.
    ///
    /// Returns `true` if this call performed the first marking, `false` if
    /// the identifier was already marked (replay).
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the store fails or times out.
    #[instrument(skip(self, jti), fields(prefix = %self.prefix))]
    pub async fn check_and_mark(&self, jti: &str, ttl: Duration) -> Result<bool, TokenError> {
        let key = self.key(jti);
        let ttl = ttl.max(MIN_MARKER_TTL);
        let first = self
            .call("set_if_absent", self.store.set_if_absent(&key, ttl))
            .await?;

        if !first {
            debug!("Replay marker already present");
        }
        Ok(first)
    }

    /// Mark `jti` as used for at least `ttl`, overwriting any marker.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the store fails or times out.
    #[instrument(skip(self, jti), fields(prefix = %self.prefix))]
    pub async fn revoke(&self, jti: &str, ttl: Duration) -> Result<(), TokenError> {
        let key = self.key(jti);
        let ttl = ttl.max(MIN_MARKER_TTL);
        self.call("set", self.store.set(&key, ttl)).await
    }

    /// Whether `jti` is currently marked.
    ///
    /// Diagnostics only: accept/reject decisions go through
    /// [`check_and_mark`](Self::check_and_mark).
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the store fails or times out.
    pub async fn is_marked(&self, jti: &str) -> Result<bool, TokenError> {
        let key = self.key(jti);
        self.call("exists", self.store.exists(&key)).await
    }

    fn key(&self, jti: &str) -> String {
        format!("{}{}", self.prefix, jti)
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, TokenError>>,
    ) -> Result<T, TokenError> {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(match e {
                TokenError::BackendUnavailable(_) => e,
                other => TokenError::backend(other.to_string()),
            }),
            Err(_) => Err(TokenError::backend(format!(
                "replay store {operation} timed out after {:?}",
                self.timeout
            ))),
        };

        match &result {
            Ok(_) => metrics::record_replay_operation(operation, "ok"),
            Err(e) => {
                warn!(operation, error = %e, "Replay store call failed");
                metrics::record_replay_operation(operation, "error");
            }
        }
        result
    }
}

impl std::fmt::Debug for ReplayCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayCache")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
