//! JWK and JWK set rendering of public keys.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Public Ed25519 key in JWK form (RFC 8037).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `OKP`
    pub kty: String,
    /// Curve, always `Ed25519`
    pub crv: String,
    /// Key identifier matching the token header `kid`
    pub kid: String,
    /// Public key use, always `sig`
    #[serde(rename = "use")]
    pub key_use: String,
    /// Signature algorithm, always `EdDSA`
    pub alg: String,
    /// Base64url raw public key
    pub x: String,
}

impl Jwk {
    /// JWK for an Ed25519 verification key.
    #[must_use]
    pub fn ed25519(kid: &str, public_key: &[u8]) -> Self {
        Jwk {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            kid: kid.to_string(),
            key_use: "sig".to_string(),
            alg: "EdDSA".to_string(),
            x: URL_SAFE_NO_PAD.encode(public_key),
        }
    }
}

/// A JWK set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// Keys, current signing key first
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Create an empty set.
    pub fn new() -> Self {
        Jwks { keys: Vec::new() }
    }

    /// Append a key.
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// Find a key by identifier.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Render the set as a JSON document for publishing.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if rendering fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
