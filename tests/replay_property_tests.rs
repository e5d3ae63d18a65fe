//! Property-based tests for the replay cache.
//!
//! Property 6: check_and_mark succeeds exactly once per identifier
//! Property 7: Prefixes isolate identifiers sharing one store
//! Property 8: Revocation makes an unseen identifier fail check_and_mark

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokenmint::replay::{MemoryReplayStore, ReplayCache, ReplayStore};

/// Generate identifiers shaped like base64url token ids.
fn arb_jti() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,43}".prop_map(|s| s)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property 6: First mark wins
    #[test]
    fn prop_check_and_mark_once(
        jtis in prop::collection::hash_set(arb_jti(), 1..16),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let cache = ReplayCache::in_memory();
            let ttl = Duration::from_secs(60);

            for jti in &jtis {
                prop_assert!(!cache.is_marked(jti).await.unwrap());
                prop_assert!(cache.check_and_mark(jti, ttl).await.unwrap());
            }
            for jti in &jtis {
                prop_assert!(!cache.check_and_mark(jti, ttl).await.unwrap());
                prop_assert!(cache.is_marked(jti).await.unwrap());
            }
            Ok(())
        })?;
    }

    /// Property 7: Prefix isolation
    #[test]
    fn prop_prefix_isolation(
        jti in arb_jti(),
        a in "[a-z]{1,8}:",
        b in "[a-z]{1,8}:",
    ) {
        prop_assume!(a != b);

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store: Arc<dyn ReplayStore> = Arc::new(MemoryReplayStore::new());
            let first = ReplayCache::new(Arc::clone(&store)).with_prefix(a);
            let second = ReplayCache::new(store).with_prefix(b);
            let ttl = Duration::from_secs(60);

            prop_assert!(first.check_and_mark(&jti, ttl).await.unwrap());
            prop_assert!(second.check_and_mark(&jti, ttl).await.unwrap());
            Ok(())
        })?;
    }

    /// Property 8: Revocation pre-empts use
    #[test]
    fn prop_revoke_then_check_fails(jti in arb_jti(), ttl_secs in 0u64..3_600) {
        tokio_test::block_on(async {
            let cache = ReplayCache::in_memory();
            let ttl = Duration::from_secs(ttl_secs);

            cache.revoke(&jti, ttl).await.unwrap();
            prop_assert!(cache.is_marked(&jti).await.unwrap());
            prop_assert!(!cache.check_and_mark(&jti, ttl).await.unwrap());
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_concurrent_marks_single_winner() {
    let cache = ReplayCache::in_memory();
    let mut handles = Vec::new();

    for _ in 0..32 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .check_and_mark("shared-jti", Duration::from_secs(60))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
