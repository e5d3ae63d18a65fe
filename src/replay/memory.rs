//! In-process replay store.
//!
//! Suitable for tests and single-instance deployments. Markers are not
//! shared between processes; use the Redis store for a horizontally scaled
//! fleet.

use super::ReplayStore;
use crate::error::TokenError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Entries held before expired markers are pruned on write.
const PRUNE_THRESHOLD: usize = 1024;

/// Marker deadline. `None` never expires; it stands in for TTLs too long for
/// the monotonic clock to represent.
type Deadline = Option<Instant>;

/// Mutex-guarded map of markers with per-entry deadlines.
#[derive(Debug, Default)]
pub struct MemoryReplayStore {
    entries: Mutex<HashMap<String, Deadline>>,
}

impl MemoryReplayStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, including expired ones not yet pruned.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn deadline(now: Instant, ttl: Duration) -> Deadline {
        now.checked_add(ttl)
    }

    fn is_live(deadline: &Deadline, now: Instant) -> bool {
        deadline.map_or(true, |expires_at| expires_at > now)
    }

    fn prune(entries: &mut HashMap<String, Deadline>, now: Instant) {
        if entries.len() >= PRUNE_THRESHOLD {
            entries.retain(|_, deadline| Self::is_live(deadline, now));
        }
    }
}

#[async_trait]
impl ReplayStore for MemoryReplayStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, TokenError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if entries.get(key).is_some_and(|d| Self::is_live(d, now)) {
            return Ok(false);
        }

        Self::prune(&mut entries, now);
        entries.insert(key.to_string(), Self::deadline(now, ttl));
        Ok(true)
    }

    async fn set(&self, key: &str, ttl: Duration) -> Result<(), TokenError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Self::prune(&mut entries, now);
        entries.insert(key.to_string(), Self::deadline(now, ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, TokenError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .is_some_and(|d| Self::is_live(d, Instant::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = MemoryReplayStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.set_if_absent("k", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", ttl).await.unwrap());
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = MemoryReplayStore::new();

        store.set_if_absent("k", Duration::from_millis(1)).await.unwrap();

        // Wait for expiration
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!store.exists("k").await.unwrap());
        assert!(store.set_if_absent("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryReplayStore::new();

        store.set_if_absent("k", Duration::from_millis(1)).await.unwrap();
        store.set("k", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_drops_expired_entries() {
        let store = MemoryReplayStore::new();
        for i in 0..PRUNE_THRESHOLD {
            store.set(&format!("old-{i}"), Duration::from_millis(1)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        store.set("fresh", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_outlives_a_year() {
        let store = MemoryReplayStore::new();
        let two_years = Duration::from_secs(2 * 365 * 24 * 60 * 60);

        assert!(store.set_if_absent("k", two_years).await.unwrap());

        tokio::time::advance(Duration::from_secs(366 * 24 * 60 * 60)).await;
        assert!(store.exists("k").await.unwrap());
        assert!(!store.set_if_absent("k", two_years).await.unwrap());

        tokio::time::advance(two_years).await;
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let store = MemoryReplayStore::new();
        assert!(MemoryReplayStore::deadline(Instant::now(), Duration::MAX).is_none());

        assert!(store.set_if_absent("k", Duration::MAX).await.unwrap());
        assert!(store.exists("k").await.unwrap());
        assert!(!store.set_if_absent("k", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_set_if_absent_single_winner() {
        let store = Arc::new(MemoryReplayStore::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.set_if_absent("shared", Duration::from_secs(60)).await.unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
