//! Redis-backed replay store shared across processes.

use super::ReplayStore;
use crate::error::TokenError;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Replay store on a shared Redis instance.
///
/// `set_if_absent` is a single `SET key 1 NX EX ttl`, so two verifiers racing
/// on the same token identifier cannot both win.
#[derive(Clone)]
pub struct RedisReplayStore {
    conn: ConnectionManager,
}

impl RedisReplayStore {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, TokenError> {
        let client = ::redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected replay store to Redis");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// Largest `EX` value stored with an expiry. Redis rejects expiries whose
/// absolute time in milliseconds overflows a signed 64-bit integer.
const MAX_EXPIRE_SECS: u64 = 100_000_000_000_000;

/// Redis expiry in whole seconds, rounded up and at least one.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
    secs.max(1)
}

/// Expiry to send with `SET`, or `None` for a marker that never expires.
fn expiry_secs(ttl: Duration) -> Option<u64> {
    Some(ttl_secs(ttl)).filter(|secs| *secs <= MAX_EXPIRE_SECS)
}

#[async_trait]
impl ReplayStore for RedisReplayStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, TokenError> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(1).arg("NX");
        if let Some(secs) = expiry_secs(ttl) {
            cmd.arg("EX").arg(secs);
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;

        // "OK" when set, nil when the key already existed
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, ttl: Duration) -> Result<(), TokenError> {
        let mut conn = self.conn.clone();
        match expiry_secs(ttl) {
            Some(secs) => conn.set_ex::<_, _, ()>(key, 1, secs).await?,
            None => conn.set::<_, _, ()>(key, 1).await?,
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, TokenError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_secs_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_secs(10)), 10);
        assert_eq!(ttl_secs(Duration::from_millis(10_001)), 11);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_expiry_secs_drops_unrepresentable_ttl() {
        assert_eq!(expiry_secs(Duration::from_secs(600)), Some(600));
        assert_eq!(
            expiry_secs(Duration::from_secs(MAX_EXPIRE_SECS)),
            Some(MAX_EXPIRE_SECS)
        );
        assert_eq!(expiry_secs(Duration::from_secs(MAX_EXPIRE_SECS + 1)), None);
        assert_eq!(expiry_secs(Duration::MAX), None);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisReplayStore::connect("not-a-redis-url").await;
        assert!(matches!(result, Err(TokenError::BackendUnavailable(_))));
    }
}
