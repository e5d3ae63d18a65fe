//! Compact signed-claims codec.
//!
//! [`TokenCodec`] is the boundary between the lifecycle engine and the wire
//! format. [`JwtCodec`] renders tokens as compact JWS
//! (`base64url(header).base64url(claims).base64url(signature)`), which is
//! text-safe and fits in URL query parameters.

use crate::error::{InvalidTokenReason, TokenError};
use crate::jwt::claims::ClaimSet;
use crate::keys::KeyRecord;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};

/// Algorithm tag carried in every header.
pub const ALGORITHM: &str = "EdDSA";

/// Longest artifact the codec will attempt to parse.
pub const MAX_TOKEN_LEN: usize = 8 * 1024;

/// Decoded token header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Identifier of the signing key.
    pub kid: String,
    /// Signature algorithm tag.
    pub alg: String,
}

impl TokenHeader {
    /// Header for a token signed by `key`.
    #[must_use]
    pub fn for_key(key: &KeyRecord) -> Self {
        Self {
            kid: key.kid().to_string(),
            alg: ALGORITHM.to_string(),
        }
    }
}

/// Turns claim sets into signed artifacts and back.
pub trait TokenCodec: Send + Sync {
    /// Sign `claims` with `key` and render the artifact.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` if `key` cannot sign, or `Encoding` if the
    /// codec fails.
    fn encode(
        &self,
        header: &TokenHeader,
        claims: &ClaimSet,
        key: &KeyRecord,
    ) -> Result<String, TokenError>;

    /// Parse the header without trusting anything in it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken(Malformed)` if the header is unusable.
    fn decode_header(&self, artifact: &str) -> Result<TokenHeader, TokenError>;

    /// Verify the signature with `key` and decode the claims.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken(InvalidSignature)` on a bad signature and
    /// `InvalidToken(Malformed)` if the artifact cannot be parsed.
    fn decode_claims(&self, artifact: &str, key: &KeyRecord) -> Result<ClaimSet, TokenError>;
}

/// Compact JWS codec backed by `jsonwebtoken`.
#[derive(Debug, Clone)]
pub struct JwtCodec {
    validation: Validation,
}

impl JwtCodec {
    /// Codec accepting only `EdDSA` signatures.
    #[must_use]
    pub fn new() -> Self {
        // Only the signature is checked here; temporal and scope rules are
        // applied by the service against the caller's profile.
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        JwtCodec { validation }
    }
}

impl Default for JwtCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCodec for JwtCodec {
    fn encode(
        &self,
        header: &TokenHeader,
        claims: &ClaimSet,
        key: &KeyRecord,
    ) -> Result<String, TokenError> {
        if header.alg != ALGORITHM {
            return Err(TokenError::Encoding(format!(
                "unsupported algorithm '{}'",
                header.alg
            )));
        }
        let encoding_key = key.encoding_key().ok_or(TokenError::NoActiveKey)?;

        let mut jwt_header = Header::new(Algorithm::EdDSA);
        jwt_header.kid = Some(header.kid.clone());

        encode(&jwt_header, claims, encoding_key).map_err(|e| TokenError::Encoding(e.to_string()))
    }

    fn decode_header(&self, artifact: &str) -> Result<TokenHeader, TokenError> {
        if artifact.len() > MAX_TOKEN_LEN {
            return Err(InvalidTokenReason::Malformed.into());
        }

        let header = decode_header(artifact).map_err(|_| InvalidTokenReason::Malformed)?;
        if header.alg != Algorithm::EdDSA {
            return Err(InvalidTokenReason::Malformed.into());
        }

        match header.kid {
            Some(kid) if !kid.is_empty() => Ok(TokenHeader {
                kid,
                alg: ALGORITHM.to_string(),
            }),
            _ => Err(InvalidTokenReason::Malformed.into()),
        }
    }

    fn decode_claims(&self, artifact: &str, key: &KeyRecord) -> Result<ClaimSet, TokenError> {
        decode::<ClaimSet>(artifact, key.decoding_key(), &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => InvalidTokenReason::InvalidSignature.into(),
                _ => InvalidTokenReason::Malformed.into(),
            })
    }
}
