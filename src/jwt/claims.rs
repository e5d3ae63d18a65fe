//! Token claims and identifiers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Extra claims merged into a token at issuance.
pub type ExtraClaims = Map<String, Value>;

/// Claim names the engine owns. Extra claims may not use them.
pub const RESERVED_CLAIMS: [&str; 8] = ["iss", "aud", "sub", "iat", "nbf", "exp", "jti", "purpose"];

/// Random bytes in a token identifier (256 bits).
pub const TOKEN_ID_BYTES: usize = 32;

/// Semantic payload of a token.
///
/// Built once at issuance and never mutated; a verified token hands back an
/// equal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    pub(crate) iss: String,
    pub(crate) aud: String,
    pub(crate) sub: String,
    pub(crate) purpose: String,
    pub(crate) iat: i64,
    pub(crate) nbf: i64,
    pub(crate) exp: i64,
    pub(crate) jti: String,
    #[serde(flatten)]
    pub(crate) extra: ExtraClaims,
}

impl ClaimSet {
    /// Subject the token was issued for.
    pub fn subject(&self) -> &str {
        &self.sub
    }

    /// Issuing authority (`iss`).
    pub fn issuer(&self) -> &str {
        &self.iss
    }

    /// Intended recipient (`aud`).
    pub fn audience(&self) -> &str {
        &self.aud
    }

    /// Token class, e.g. `email-verify`.
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Issued-at, Unix seconds.
    pub const fn issued_at(&self) -> i64 {
        self.iat
    }

    /// Not-before, Unix seconds.
    pub const fn not_before(&self) -> i64 {
        self.nbf
    }

    /// Expiry, Unix seconds.
    pub const fn expires_at(&self) -> i64 {
        self.exp
    }

    /// Token identifier (jti) used for replay tracking.
    pub fn token_id(&self) -> &str {
        &self.jti
    }

    /// Caller-supplied claims beyond the reserved set.
    pub fn extra(&self) -> &ExtraClaims {
        &self.extra
    }

    /// Look up a single extra claim.
    pub fn extra_claim(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// Seconds until `exp + leeway`, as seen at `now`.
    pub const fn remaining_secs(&self, now: i64, leeway_secs: i64) -> i64 {
        self.exp.saturating_add(leeway_secs).saturating_sub(now)
    }
}

/// Check whether `name` is owned by the engine.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_CLAIMS.contains(&name)
}

/// Generate a fresh token identifier from the OS CSPRNG.
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
