//! Token issuance, verification and revocation.
//!
//! Verification is a short-circuiting pipeline:
//!
//! 1. decode the header
//! 2. resolve the key named by `kid`
//! 3. verify the signature and decode the claims
//! 4. temporal checks (`iat`, `nbf`, `exp` with leeway)
//! 5. scope checks (`iss`, `aud`, `purpose`)
//! 6. replay check, only for profiles with `prevent_replay`
//!
//! Claims are not trusted before step 3 succeeds, and the replay marker is
//! written last so a token rejected by any earlier step is never consumed.

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ReplayBackend, TokenProfile};
use crate::error::{InvalidTokenReason, ScopeField, TokenError};
use crate::jwt::{ClaimSet, ClaimSetBuilder, ExtraClaims, JwtCodec, TokenCodec, TokenHeader};
use crate::keys::{KeyRecord, KeyStore};
use crate::metrics;
use crate::replay::{MemoryReplayStore, RedisReplayStore, ReplayCache, ReplayStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Upper bound for establishing the replay store connection at startup.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues and verifies purpose-scoped tokens.
pub struct TokenService {
    keys: Arc<KeyStore>,
    replay: ReplayCache,
    codec: Arc<dyn TokenCodec>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Create a service over `keys` and `replay` with the JWT codec and the
    /// system clock.
    pub fn new(keys: Arc<KeyStore>, replay: ReplayCache) -> Self {
        Self {
            keys,
            replay,
            codec: Arc::new(JwtCodec::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Wire a service from process configuration.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the replay store cannot be reached.
    pub async fn from_config(config: &Config) -> Result<Self, TokenError> {
        let store: Arc<dyn ReplayStore> = match &config.replay.backend {
            ReplayBackend::Memory => Arc::new(MemoryReplayStore::new()),
            ReplayBackend::Redis { url } => {
                let store = tokio::time::timeout(CONNECT_TIMEOUT, RedisReplayStore::connect(url))
                    .await
                    .map_err(|_| TokenError::backend("timed out connecting to Redis"))??;
                Arc::new(store)
            }
        };

        let replay = ReplayCache::new(store)
            .with_prefix(config.replay.prefix.clone())
            .with_timeout(config.replay.timeout);

        info!(
            backend = ?config.replay.backend,
            keys = config.keys.len(),
            "Token service configured"
        );
        Ok(Self::new(Arc::clone(&config.keys), replay))
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the token codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn TokenCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// The key store, for rotation and JWKS export.
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// The replay cache.
    pub fn replay_cache(&self) -> &ReplayCache {
        &self.replay
    }

    /// Issue a token for `subject` under `profile`.
    ///
    /// # Errors
    ///
    /// - `InvalidSubject` if `subject` is empty
    /// - `InvalidConfig` if the profile TTL is under one second or a scope
    ///   field is empty
    /// - `ReservedClaimConflict` if an extra claim uses a reserved name
    /// - `NoActiveKey` if the key store has no current signing key
    pub fn issue(
        &self,
        subject: &str,
        profile: &TokenProfile,
        extra_claims: ExtraClaims,
    ) -> Result<String, TokenError> {
        self.issue_not_before(subject, profile, extra_claims, Duration::ZERO)
    }

    /// Issue a token that only becomes valid `delay` after issuance.
    ///
    /// # Errors
    ///
    /// As [`issue`](Self::issue); additionally `InvalidConfig` if `delay` is
    /// not shorter than the profile TTL.
    #[instrument(skip_all, fields(purpose = %profile.purpose))]
    pub fn issue_not_before(
        &self,
        subject: &str,
        profile: &TokenProfile,
        extra_claims: ExtraClaims,
        delay: Duration,
    ) -> Result<String, TokenError> {
        let claims = ClaimSetBuilder::new(&profile.issuer, &profile.audience, &profile.purpose)
            .subject(subject)
            .issued_at(self.clock.now())
            .ttl_seconds(profile.ttl_secs())
            .not_before_delay(i64::try_from(delay.as_secs()).unwrap_or(i64::MAX))
            .extra_claims(extra_claims)
            .build()?;

        let key = self.keys.current()?;
        let token = self.codec.encode(&TokenHeader::for_key(&key), &claims, &key)?;

        metrics::record_token_issued(&profile.purpose);
        debug!(kid = %key.kid(), exp = claims.expires_at(), "Issued token");
        Ok(token)
    }

    /// Verify `artifact` against the `expected` profile.
    ///
    /// On success the full claim set, extra claims included, is returned and
    /// (for replay-protected profiles) the token is consumed.
    ///
    /// # Errors
    ///
    /// `InvalidToken` with the rejection reason, or `BackendUnavailable` if
    /// the replay store cannot answer in time.
    #[instrument(skip_all, fields(purpose = %expected.purpose))]
    pub async fn verify(
        &self,
        artifact: &str,
        expected: &TokenProfile,
    ) -> Result<ClaimSet, TokenError> {
        let result = self.verify_pipeline(artifact, expected).await;

        match &result {
            Ok(_) => metrics::record_verification(&expected.purpose, "ok"),
            Err(e) => {
                let code = e.kind().as_str();
                if e.is_retryable() {
                    warn!(reason = code, "Token verification could not complete");
                } else {
                    info!(reason = code, "Token rejected");
                }
                metrics::record_verification(&expected.purpose, code);
            }
        }
        result
    }

    async fn verify_pipeline(
        &self,
        artifact: &str,
        expected: &TokenProfile,
    ) -> Result<ClaimSet, TokenError> {
        let (key, claims) = self.authenticate(artifact)?;

        let now = self.clock.now();
        let leeway = expected.leeway_secs();
        check_lifetime(&claims, now, leeway)?;
        check_scope(&claims, expected)?;

        if expected.prevent_replay {
            let ttl = marker_ttl(&claims, now, leeway);
            if !self.replay.check_and_mark(claims.token_id(), ttl).await? {
                return Err(InvalidTokenReason::Replayed.into());
            }
        }

        debug!(kid = %key.kid(), "Token verified");
        Ok(claims)
    }

    /// Revoke a token so it can no longer be verified under `profile`.
    ///
    /// The signature must verify against a known key; expiry and scope are
    /// not checked, so a stale or mis-scoped token can still be killed. The
    /// marker lives until `exp + leeway`. Revocation is only enforced for
    /// profiles with `prevent_replay`, since other profiles never consult the
    /// replay cache.
    ///
    /// # Errors
    ///
    /// `InvalidToken` if the artifact is malformed, names an unknown key or
    /// has a bad signature; `BackendUnavailable` if the marker cannot be
    /// written.
    #[instrument(skip_all, fields(purpose = %profile.purpose))]
    pub async fn revoke(&self, artifact: &str, profile: &TokenProfile) -> Result<(), TokenError> {
        let (_, claims) = self.authenticate(artifact)?;

        if !profile.prevent_replay {
            warn!("Revoking a token whose profile does not enforce replay protection");
        }

        let ttl = marker_ttl(&claims, self.clock.now(), profile.leeway_secs());
        self.replay.revoke(claims.token_id(), ttl).await?;

        metrics::record_token_revoked("artifact");
        info!(exp = claims.expires_at(), "Token revoked");
        Ok(())
    }

    /// Revoke a bare token identifier for at least `ttl`.
    ///
    /// Operator path for tokens whose artifact is no longer available. The
    /// caller is responsible for choosing a TTL that covers the token's
    /// remaining lifetime plus leeway.
    ///
    /// # Errors
    ///
    /// `InvalidToken(Malformed)` for an empty identifier, `BackendUnavailable`
    /// if the marker cannot be written.
    #[instrument(skip_all)]
    pub async fn revoke_identifier(&self, jti: &str, ttl: Duration) -> Result<(), TokenError> {
        if jti.is_empty() {
            return Err(InvalidTokenReason::Malformed.into());
        }

        self.replay.revoke(jti, ttl).await?;

        metrics::record_token_revoked("identifier");
        info!(ttl_secs = ttl.as_secs(), "Token identifier revoked");
        Ok(())
    }

    /// Steps 1-3: header, key, signature. Nothing in the token is trusted
    /// before this returns.
    fn authenticate(&self, artifact: &str) -> Result<(Arc<KeyRecord>, ClaimSet), TokenError> {
        let header = self.codec.decode_header(artifact)?;
        let key = self.keys.resolve(&header.kid)?;
        let claims = self.codec.decode_claims(artifact, &key)?;

        if claims.token_id().is_empty() || claims.subject().is_empty() {
            return Err(InvalidTokenReason::Malformed.into());
        }
        Ok((key, claims))
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("keys", &self.keys)
            .field("replay", &self.replay)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Accepts `iat - leeway <= now`, `nbf - leeway <= now` and
/// `now <= exp + leeway`.
fn check_lifetime(claims: &ClaimSet, now: i64, leeway: i64) -> Result<(), TokenError> {
    if now > claims.expires_at().saturating_add(leeway) {
        return Err(InvalidTokenReason::Expired.into());
    }

    let valid_from = claims.issued_at().max(claims.not_before());
    if now < valid_from.saturating_sub(leeway) {
        return Err(InvalidTokenReason::NotYetValid.into());
    }
    Ok(())
}

fn check_scope(claims: &ClaimSet, expected: &TokenProfile) -> Result<(), TokenError> {
    let checks = [
        (ScopeField::Issuer, claims.issuer(), expected.issuer.as_str()),
        (ScopeField::Audience, claims.audience(), expected.audience.as_str()),
        (ScopeField::Purpose, claims.purpose(), expected.purpose.as_str()),
    ];

    for (field, actual, wanted) in checks {
        if actual != wanted {
            return Err(InvalidTokenReason::ScopeMismatch(field).into());
        }
    }
    Ok(())
}

/// Remaining validity as seen by a verifier with `leeway`.
fn marker_ttl(claims: &ClaimSet, now: i64, leeway: i64) -> Duration {
    let remaining = claims.remaining_secs(now, leeway).max(0);
    Duration::from_secs(u64::try_from(remaining).unwrap_or(0))
}
