//! End-to-end tests for issuance, verification, rotation and revocation.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokenmint::jwt::{JwtCodec, TokenCodec};
use tokenmint::keys::generate_private_key_pem;
use tokenmint::replay::MemoryReplayStore;
use tokenmint::{
    Config, ErrorKind, ExtraClaims, InvalidTokenReason, KeyRecord, KeyStore, ManualClock,
    ReplayCache, ReplayStore, ScopeField, TokenError, TokenProfile, TokenService,
};

const T0: i64 = 1_760_000_000;

fn email_verify() -> TokenProfile {
    TokenProfile::new("myapp.io", "myapp.web", "email-verify", Duration::from_secs(600))
}

fn password_reset() -> TokenProfile {
    TokenProfile::new("myapp.io", "myapp.web", "password-reset", Duration::from_secs(900))
}

fn service_with_clock(kid: &str) -> (TokenService, Arc<ManualClock>) {
    let keys = KeyStore::new(kid, vec![KeyRecord::generate(kid).unwrap()]).unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let service =
        TokenService::new(Arc::new(keys), ReplayCache::in_memory()).with_clock(clock.clone());
    (service, clock)
}

fn reason(err: TokenError) -> InvalidTokenReason {
    err.invalid_token_reason()
        .unwrap_or_else(|| panic!("expected invalid token, got {err:?}"))
}

fn flip_signature_bit(token: &str) -> String {
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
    let mut sig = URL_SAFE_NO_PAD.decode(&parts[2]).unwrap();
    sig[0] ^= 0x01;
    parts[2] = URL_SAFE_NO_PAD.encode(sig);
    parts.join(".")
}

#[tokio::test]
async fn test_email_verification_flow() {
    let (service, _clock) = service_with_clock("2025-08-rot-1");
    let mut extra = ExtraClaims::new();
    extra.insert("email".to_string(), json!("a@b.com"));

    let token = service.issue("user:42", &email_verify(), extra).unwrap();
    assert_eq!(token.split('.').count(), 3);

    let claims = service.verify(&token, &email_verify()).await.unwrap();
    assert_eq!(claims.subject(), "user:42");
    assert_eq!(claims.issuer(), "myapp.io");
    assert_eq!(claims.audience(), "myapp.web");
    assert_eq!(claims.purpose(), "email-verify");
    assert_eq!(claims.expires_at() - claims.issued_at(), 600);
    assert_eq!(claims.token_id().len(), 43);
    assert_eq!(claims.extra_claim("email"), Some(&json!("a@b.com")));

    // Second use of the same link.
    let err = service.verify(&token, &email_verify()).await.unwrap_err();
    assert_eq!(reason(err), InvalidTokenReason::Replayed);
}

#[tokio::test]
async fn test_token_ids_are_unique() {
    let (service, _clock) = service_with_clock("k1");
    let codec = JwtCodec::new();
    let key = service.keys().current().unwrap();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..64 {
        let token = service.issue("u", &email_verify(), ExtraClaims::new()).unwrap();
        let claims = codec.decode_claims(&token, &key).unwrap();
        assert!(seen.insert(claims.token_id().to_string()));
    }
}

#[tokio::test]
async fn test_purpose_isolation() {
    let (service, _clock) = service_with_clock("k1");
    let token = service
        .issue("user:42", &email_verify(), ExtraClaims::new())
        .unwrap();

    let err = service.verify(&token, &password_reset()).await.unwrap_err();
    assert_eq!(
        reason(err),
        InvalidTokenReason::ScopeMismatch(ScopeField::Purpose)
    );
}

#[tokio::test]
async fn test_tampered_signature_rejected() {
    let (service, _clock) = service_with_clock("k1");
    let token = service.issue("u", &email_verify(), ExtraClaims::new()).unwrap();

    let err = service
        .verify(&flip_signature_bit(&token), &email_verify())
        .await
        .unwrap_err();
    assert_eq!(reason(err), InvalidTokenReason::InvalidSignature);

    // The untouched token was not consumed by the failed attempt.
    assert!(service.verify(&token, &email_verify()).await.is_ok());
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    let (service, _clock) = service_with_clock("k1");
    let token = service.issue("user:42", &email_verify(), ExtraClaims::new()).unwrap();

    let parts: Vec<&str> = token.split('.').collect();
    let mut payload: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
    payload["sub"] = json!("user:1");
    let forged = format!(
        "{}.{}.{}",
        parts[0],
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap()),
        parts[2]
    );

    let err = service.verify(&forged, &email_verify()).await.unwrap_err();
    assert_eq!(reason(err), InvalidTokenReason::InvalidSignature);
}

#[tokio::test]
async fn test_malformed_inputs() {
    let (service, _clock) = service_with_clock("k1");

    for input in ["", "abc", "a.b", "a.b.c", "....", "eyJhbGciOiJub25lIn0.e30."] {
        let err = service.verify(input, &email_verify()).await.unwrap_err();
        assert_eq!(reason(err), InvalidTokenReason::Malformed, "input {input:?}");
    }
}

#[tokio::test]
async fn test_unknown_key() {
    let (issuer, _) = service_with_clock("issuer-key");
    let (verifier, _) = service_with_clock("other-key");

    let token = issuer.issue("u", &email_verify(), ExtraClaims::new()).unwrap();
    let err = verifier.verify(&token, &email_verify()).await.unwrap_err();
    assert_eq!(reason(err), InvalidTokenReason::UnknownKey);
    assert_eq!(err_kind(&verifier, &token).await, ErrorKind::UnknownKey);
}

async fn err_kind(service: &TokenService, token: &str) -> ErrorKind {
    service
        .verify(token, &email_verify())
        .await
        .unwrap_err()
        .kind()
}

#[tokio::test]
async fn test_same_kid_different_material() {
    let (issuer, _) = service_with_clock("shared");
    let (verifier, _) = service_with_clock("shared");

    let token = issuer.issue("u", &email_verify(), ExtraClaims::new()).unwrap();
    let err = verifier.verify(&token, &email_verify()).await.unwrap_err();
    assert_eq!(reason(err), InvalidTokenReason::InvalidSignature);
}

#[tokio::test]
async fn test_expiry_with_leeway() {
    let (service, clock) = service_with_clock("k1");
    let profile = email_verify().with_leeway(Duration::from_secs(30));
    let token = service.issue("u", &profile, ExtraClaims::new()).unwrap();

    clock.set(T0 + 600 + 31);
    let err = service.verify(&token, &profile).await.unwrap_err();
    assert_eq!(reason(err), InvalidTokenReason::Expired);

    clock.set(T0 + 600 + 30);
    assert!(service.verify(&token, &profile).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_verification_single_winner() {
    let (service, _clock) = service_with_clock("k1");
    let token = service.issue("u", &email_verify(), ExtraClaims::new()).unwrap();
    let profile = email_verify();

    let (a, b) = tokio::join!(
        service.verify(&token, &profile),
        service.verify(&token, &profile)
    );

    let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(oks, 1);
    let err = a.err().or(b.err()).unwrap();
    assert_eq!(reason(err), InvalidTokenReason::Replayed);
}

#[tokio::test]
async fn test_concurrent_verification_across_tasks() {
    let (service, _clock) = service_with_clock("k1");
    let service = Arc::new(service);
    let token = service.issue("u", &email_verify(), ExtraClaims::new()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = Arc::clone(&service);
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            service.verify(&token, &email_verify()).await.is_ok()
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

#[tokio::test]
async fn test_rotation_keeps_old_tokens_valid() {
    let (service, _clock) = service_with_clock("A");
    let profile = email_verify();
    let old = service.issue("u", &profile, ExtraClaims::new()).unwrap();

    service.keys().rotate(KeyRecord::generate("B").unwrap()).unwrap();
    let new = service.issue("u", &profile, ExtraClaims::new()).unwrap();

    let codec = JwtCodec::new();
    assert_eq!(codec.decode_header(&old).unwrap().kid, "A");
    assert_eq!(codec.decode_header(&new).unwrap().kid, "B");

    assert!(service.verify(&old, &profile).await.is_ok());
    assert!(service.verify(&new, &profile).await.is_ok());

    let jwks = service.keys().jwks();
    assert_eq!(jwks.keys.len(), 2);
    assert_eq!(jwks.keys[0].kid, "B");
}

#[tokio::test]
async fn test_verify_only_store() {
    let (issuer, _) = service_with_clock("k1");
    let signing = issuer.keys().current().unwrap();
    let public = KeyRecord::from_public_bytes("k1", signing.public_key()).unwrap();

    let verifier = TokenService::new(
        Arc::new(KeyStore::verification_only(vec![public]).unwrap()),
        ReplayCache::in_memory(),
    );

    let result = verifier.issue("u", &email_verify(), ExtraClaims::new());
    assert!(matches!(result, Err(TokenError::NoActiveKey)));

    let token = issuer.issue("u", &email_verify(), ExtraClaims::new()).unwrap();
    assert!(verifier.verify(&token, &email_verify()).await.is_ok());
}

#[tokio::test]
async fn test_revoke_before_use() {
    let (service, _clock) = service_with_clock("k1");
    let token = service.issue("u", &password_reset(), ExtraClaims::new()).unwrap();

    service.revoke(&token, &password_reset()).await.unwrap();

    let err = service.verify(&token, &password_reset()).await.unwrap_err();
    assert_eq!(reason(err), InvalidTokenReason::Replayed);
}

#[tokio::test]
async fn test_revoke_after_use_is_idempotent() {
    let (service, _clock) = service_with_clock("k1");
    let token = service.issue("u", &password_reset(), ExtraClaims::new()).unwrap();

    service.verify(&token, &password_reset()).await.unwrap();
    service.revoke(&token, &password_reset()).await.unwrap();
    service.revoke(&token, &password_reset()).await.unwrap();
}

#[tokio::test]
async fn test_shared_store_across_instances() {
    let keys = Arc::new(KeyStore::new("k1", vec![KeyRecord::generate("k1").unwrap()]).unwrap());
    let store: Arc<dyn ReplayStore> = Arc::new(MemoryReplayStore::new());

    let a = TokenService::new(Arc::clone(&keys), ReplayCache::new(Arc::clone(&store)));
    let b = TokenService::new(keys, ReplayCache::new(store));

    let token = a.issue("u", &email_verify(), ExtraClaims::new()).unwrap();
    assert!(a.verify(&token, &email_verify()).await.is_ok());

    let err = b.verify(&token, &email_verify()).await.unwrap_err();
    assert_eq!(reason(err), InvalidTokenReason::Replayed);
}

#[tokio::test]
async fn test_prefix_isolates_token_classes() {
    let keys = Arc::new(KeyStore::new("k1", vec![KeyRecord::generate("k1").unwrap()]).unwrap());
    let store: Arc<dyn ReplayStore> = Arc::new(MemoryReplayStore::new());

    let a = TokenService::new(
        Arc::clone(&keys),
        ReplayCache::new(Arc::clone(&store)).with_prefix("verify:jti:"),
    );
    let b = TokenService::new(keys, ReplayCache::new(store).with_prefix("reset:jti:"));

    let token = a.issue("u", &email_verify(), ExtraClaims::new()).unwrap();
    assert!(a.verify(&token, &email_verify()).await.is_ok());
    assert!(b.verify(&token, &email_verify()).await.is_ok());
}

#[derive(Debug)]
struct StalledStore;

#[async_trait]
impl ReplayStore for StalledStore {
    async fn set_if_absent(&self, _key: &str, _ttl: Duration) -> Result<bool, TokenError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(true)
    }

    async fn set(&self, _key: &str, _ttl: Duration) -> Result<(), TokenError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool, TokenError> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_backend_timeout_fails_closed() {
    let keys = KeyStore::new("k1", vec![KeyRecord::generate("k1").unwrap()]).unwrap();
    let replay = ReplayCache::new(Arc::new(StalledStore)).with_timeout(Duration::from_millis(20));
    let service = TokenService::new(Arc::new(keys), replay);

    let token = service.issue("u", &email_verify(), ExtraClaims::new()).unwrap();

    let err = service.verify(&token, &email_verify()).await.unwrap_err();
    assert!(matches!(err, TokenError::BackendUnavailable(_)));
    assert!(err.is_retryable());

    let err = service.revoke(&token, &email_verify()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);

    // Profiles without replay prevention never touch the store.
    let profile = email_verify().with_replay_prevention(false);
    assert!(service.verify(&token, &profile).await.is_ok());
}

#[tokio::test]
async fn test_service_from_config() {
    let active = generate_private_key_pem().unwrap();
    let retired = generate_private_key_pem().unwrap();
    let retired_public = KeyRecord::from_private_pem("old", &retired)
        .unwrap()
        .public_key_pem();

    let vars: HashMap<String, String> = [
        ("TOKEN_ACTIVE_KEY_ID", "2025-08-rot-1"),
        ("TOKEN_PRIVATE_KEY_2025-08-rot-1", active.as_str()),
        ("TOKEN_PUBLIC_KEY_old", retired_public.as_str()),
        ("REPLAY_KEY_PREFIX", "test:jti:"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let config = Config::from_map(&vars).unwrap();
    let service = TokenService::from_config(&config).await.unwrap();

    assert_eq!(service.replay_cache().prefix(), "test:jti:");
    assert_eq!(service.keys().identifiers(), vec!["2025-08-rot-1", "old"]);

    let token = service.issue("user:42", &email_verify(), ExtraClaims::new()).unwrap();
    let claims = service.verify(&token, &email_verify()).await.unwrap();
    assert_eq!(claims.subject(), "user:42");
}

#[tokio::test]
async fn test_rejection_messages_are_uniform() {
    let (service, clock) = service_with_clock("k1");
    let token = service.issue("u", &email_verify(), ExtraClaims::new()).unwrap();

    let scope = service.verify(&token, &password_reset()).await.unwrap_err();
    let malformed = service.verify("garbage", &email_verify()).await.unwrap_err();
    clock.set(T0 + 10_000);
    let expired = service.verify(&token, &email_verify()).await.unwrap_err();

    assert_eq!(scope.public_message(), malformed.public_message());
    assert_eq!(expired.public_message(), malformed.public_message());
    assert_eq!(expired.kind().as_str(), "TOKEN_EXPIRED");
}
