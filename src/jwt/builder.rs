//! Claim set construction.

use crate::error::TokenError;
use crate::jwt::claims::{generate_token_id, is_reserved, ClaimSet, ExtraClaims};

/// Builds a [`ClaimSet`], enforcing the issuance rules.
pub struct ClaimSetBuilder {
    issuer: String,
    audience: String,
    purpose: String,
    subject: Option<String>,
    issued_at: Option<i64>,
    ttl_seconds: i64,
    not_before_delay: i64,
    token_id: Option<String>,
    extra: ExtraClaims,
}

impl ClaimSetBuilder {
    /// Start a claim set for the given scope.
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        purpose: impl Into<String>,
    ) -> Self {
        ClaimSetBuilder {
            issuer: issuer.into(),
            audience: audience.into(),
            purpose: purpose.into(),
            subject: None,
            issued_at: None,
            ttl_seconds: 900, // 15 minutes default
            not_before_delay: 0,
            token_id: None,
            extra: ExtraClaims::new(),
        }
    }

    /// Subject the token is issued for.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Issuance time in Unix seconds. Defaults to the wall clock.
    pub fn issued_at(mut self, iat: i64) -> Self {
        self.issued_at = Some(iat);
        self
    }

    /// Lifetime in seconds. Defaults to 15 minutes.
    pub fn ttl_seconds(mut self, ttl: i64) -> Self {
        self.ttl_seconds = ttl;
        self
    }

    /// Delay between issuance and the `nbf` claim.
    pub fn not_before_delay(mut self, secs: i64) -> Self {
        self.not_before_delay = secs;
        self
    }

    /// Fixed token identifier. Defaults to a fresh random one.
    pub fn token_id(mut self, jti: impl Into<String>) -> Self {
        self.token_id = Some(jti.into());
        self
    }

    /// Merge a map of extra claims.
    pub fn extra_claims(mut self, extra: ExtraClaims) -> Self {
        self.extra.extend(extra);
        self
    }

    /// Add one extra claim.
    pub fn extra_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Validate and build the claim set.
    ///
    /// # Errors
    ///
    /// - `InvalidSubject` for an empty subject
    /// - `InvalidConfig` for a TTL under one second, a negative or too long
    ///   not-before delay, or an empty issuer, audience or purpose
    /// - `ReservedClaimConflict` when an extra claim uses a reserved name
    pub fn build(self) -> Result<ClaimSet, TokenError> {
        let subject = match self.subject {
            Some(s) if !s.is_empty() => s,
            _ => return Err(TokenError::InvalidSubject),
        };

        if self.ttl_seconds <= 0 {
            return Err(TokenError::config("ttl must be at least one second"));
        }
        if self.not_before_delay < 0 || self.not_before_delay >= self.ttl_seconds {
            return Err(TokenError::config(
                "not-before delay must be non-negative and shorter than the ttl",
            ));
        }
        for (name, value) in [
            ("issuer", &self.issuer),
            ("audience", &self.audience),
            ("purpose", &self.purpose),
        ] {
            if value.is_empty() {
                return Err(TokenError::config(format!("{name} must not be empty")));
            }
        }

        let jti = self.token_id.unwrap_or_else(generate_token_id);

        if let Some(name) = self.extra.keys().find(|k| is_reserved(k)) {
            return Err(TokenError::ReservedClaimConflict(name.clone()));
        }

        let iat = self
            .issued_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        Ok(ClaimSet {
            iss: self.issuer,
            aud: self.audience,
            sub: subject,
            purpose: self.purpose,
            iat,
            nbf: iat.saturating_add(self.not_before_delay),
            exp: iat.saturating_add(self.ttl_seconds),
            jti,
            extra: self.extra,
        })
    }
}
