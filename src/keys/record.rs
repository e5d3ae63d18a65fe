//! Ed25519 key records.

use crate::error::TokenError;
use crate::keys::jwk::Jwk;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{DecodingKey, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::fmt;
use zeroize::Zeroizing;

const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";
const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (RFC 8410).
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Length of a raw Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// A key pair (or public half) addressable by its key identifier.
pub struct KeyRecord {
    kid: String,
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    public_key: [u8; PUBLIC_KEY_LEN],
}

impl KeyRecord {
    /// Build a signing record from a PKCS#8 DER document (v1 or v2).
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the document is not an Ed25519 private key.
    pub fn from_pkcs8(kid: impl Into<String>, der: &[u8]) -> Result<Self, TokenError> {
        let kid = validate_kid(kid.into())?;
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(der).map_err(|e| {
            TokenError::config(format!("key '{kid}' is not an Ed25519 private key: {e}"))
        })?;

        let mut record = Self::from_public_bytes(kid, key_pair.public_key().as_ref())?;
        record.encoding_key = Some(EncodingKey::from_ed_der(der));
        Ok(record)
    }

    /// Build a signing record from a PEM-encoded PKCS#8 private key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the PEM is unreadable or not Ed25519.
    pub fn from_private_pem(kid: impl Into<String>, pem: &str) -> Result<Self, TokenError> {
        let kid = kid.into();
        let parsed = pem::parse(pem.trim())
            .map_err(|e| TokenError::config(format!("key '{kid}': invalid PEM: {e}")))?;

        if parsed.tag() != PRIVATE_KEY_TAG {
            return Err(TokenError::config(format!(
                "key '{kid}': expected a PKCS#8 '{PRIVATE_KEY_TAG}' PEM block, got '{}'",
                parsed.tag()
            )));
        }

        let der = Zeroizing::new(parsed.into_contents());
        Self::from_pkcs8(kid, &der)
    }

    /// Build a verify-only record from a PEM-encoded SubjectPublicKeyInfo.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the PEM is unreadable or not Ed25519.
    pub fn from_public_pem(kid: impl Into<String>, pem: &str) -> Result<Self, TokenError> {
        let kid = kid.into();
        let parsed = pem::parse(pem.trim())
            .map_err(|e| TokenError::config(format!("key '{kid}': invalid PEM: {e}")))?;

        if parsed.tag() != PUBLIC_KEY_TAG {
            return Err(TokenError::config(format!(
                "key '{kid}': expected a '{PUBLIC_KEY_TAG}' PEM block, got '{}'",
                parsed.tag()
            )));
        }

        let raw = parsed
            .contents()
            .strip_prefix(ED25519_SPKI_PREFIX.as_slice())
            .ok_or_else(|| TokenError::config(format!("key '{kid}' is not an Ed25519 public key")))?;

        Self::from_public_bytes(kid, raw)
    }

    /// Build a verify-only record from a raw 32-byte Ed25519 public key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on a wrong key length or empty identifier.
    pub fn from_public_bytes(kid: impl Into<String>, raw: &[u8]) -> Result<Self, TokenError> {
        let kid = validate_kid(kid.into())?;
        let public_key: [u8; PUBLIC_KEY_LEN] = raw.try_into().map_err(|_| {
            TokenError::config(format!(
                "key '{kid}': Ed25519 public key must be {PUBLIC_KEY_LEN} bytes, got {}",
                raw.len()
            ))
        })?;

        let decoding_key = DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(public_key))
            .map_err(|e| TokenError::config(format!("key '{kid}': {e}")))?;

        Ok(Self {
            kid,
            encoding_key: None,
            decoding_key,
            public_key,
        })
    }

    /// Generate a fresh signing record from the system CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the random source fails.
    pub fn generate(kid: impl Into<String>) -> Result<Self, TokenError> {
        let document = generate_pkcs8()?;
        Self::from_pkcs8(kid, &document)
    }

    /// Key identifier.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Whether this record holds private material.
    #[must_use]
    pub const fn can_sign(&self) -> bool {
        self.encoding_key.is_some()
    }

    /// Raw Ed25519 public key.
    #[must_use]
    pub const fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    /// Public key as a SubjectPublicKeyInfo PEM block.
    #[must_use]
    pub fn public_key_pem(&self) -> String {
        let mut der = ED25519_SPKI_PREFIX.to_vec();
        der.extend_from_slice(&self.public_key);
        pem::encode(&pem::Pem::new(PUBLIC_KEY_TAG, der))
    }

    /// Public key as a JWK for third-party verifiers.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        Jwk::ed25519(&self.kid, &self.public_key)
    }

    pub(crate) fn encoding_key(&self) -> Option<&EncodingKey> {
        self.encoding_key.as_ref()
    }

    pub(crate) const fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("kid", &self.kid)
            .field("can_sign", &self.can_sign())
            .finish_non_exhaustive()
    }
}

/// Generate a new Ed25519 private key as a PKCS#8 PEM block.
///
/// Store the result in a secret manager and load it back through
/// [`KeyRecord::from_private_pem`] or the `TOKEN_PRIVATE_KEY_<kid>` variable.
///
/// # Errors
///
/// Returns `InvalidConfig` if the random source fails.
pub fn generate_private_key_pem() -> Result<Zeroizing<String>, TokenError> {
    let document = generate_pkcs8()?;
    Ok(Zeroizing::new(pem::encode(&pem::Pem::new(
        PRIVATE_KEY_TAG,
        document.to_vec(),
    ))))
}

fn generate_pkcs8() -> Result<Zeroizing<Vec<u8>>, TokenError> {
    let rng = SystemRandom::new();
    let document = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|_| TokenError::config("failed to generate Ed25519 key pair"))?;
    Ok(Zeroizing::new(document.as_ref().to_vec()))
}

fn validate_kid(kid: String) -> Result<String, TokenError> {
    if kid.trim().is_empty() {
        return Err(TokenError::config("key identifier must not be empty"));
    }
    Ok(kid)
}
