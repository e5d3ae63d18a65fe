//! Error taxonomy for issuance, verification and revocation.
//!
//! Every verification failure is reported as [`TokenError::InvalidToken`]
//! carrying an [`InvalidTokenReason`]. The reason is meant for logs and
//! metrics; callers should surface [`TokenError::public_message`] to end
//! users so rejections cannot be used as an oracle.

use std::fmt;
use thiserror::Error;

/// Scope field that did not match the expected profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeField {
    /// `iss` claim
    Issuer,
    /// `aud` claim
    Audience,
    /// `purpose` claim
    Purpose,
}

impl ScopeField {
    /// Claim name of the field.
    #[must_use]
    pub const fn claim_name(&self) -> &'static str {
        match self {
            Self::Issuer => "iss",
            Self::Audience => "aud",
            Self::Purpose => "purpose",
        }
    }
}

impl fmt::Display for ScopeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.claim_name())
    }
}

/// Why a presented token was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidTokenReason {
    /// Header or claims could not be decoded.
    #[error("malformed token")]
    Malformed,

    /// The header names a key identifier this store does not know.
    #[error("unknown signing key")]
    UnknownKey,

    /// Signature does not verify against the named key.
    #[error("signature verification failed")]
    InvalidSignature,

    /// Current time is past `exp + leeway`.
    #[error("token expired")]
    Expired,

    /// Current time is before `iat - leeway` or `nbf - leeway`.
    #[error("token not yet valid")]
    NotYetValid,

    /// Issuer, audience or purpose differs from the expected profile.
    #[error("token scope mismatch on {0}")]
    ScopeMismatch(ScopeField),

    /// The token identifier was already consumed or revoked.
    #[error("token already used or revoked")]
    Replayed,
}

/// Errors produced by the token lifecycle engine.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TokenError {
    /// Subject is empty.
    #[error("subject must not be empty")]
    InvalidSubject,

    /// Profile or key configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An extra claim uses a reserved claim name.
    #[error("extra claim '{0}' collides with a reserved claim")]
    ReservedClaimConflict(String),

    /// No signing key is configured as current.
    #[error("no active signing key configured")]
    NoActiveKey,

    /// The presented token was rejected.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] InvalidTokenReason),

    /// Replay store or key source could not be reached in time.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The codec failed to produce a signed artifact.
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl TokenError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a backend-unavailable error.
    #[must_use]
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Flattened error kind for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSubject => ErrorKind::InvalidSubject,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::ReservedClaimConflict(_) => ErrorKind::ReservedClaimConflict,
            Self::NoActiveKey => ErrorKind::NoActiveKey,
            Self::InvalidToken(reason) => match reason {
                InvalidTokenReason::Malformed => ErrorKind::MalformedToken,
                InvalidTokenReason::UnknownKey => ErrorKind::UnknownKey,
                InvalidTokenReason::InvalidSignature => ErrorKind::InvalidSignature,
                InvalidTokenReason::Expired => ErrorKind::TokenExpired,
                InvalidTokenReason::NotYetValid => ErrorKind::TokenNotYetValid,
                InvalidTokenReason::ScopeMismatch(_) => ErrorKind::ScopeMismatch,
                InvalidTokenReason::Replayed => ErrorKind::TokenReplayed,
            },
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::Encoding(_) => ErrorKind::Encoding,
        }
    }

    /// Rejection reason, if this is a token-validity failure.
    #[must_use]
    pub const fn invalid_token_reason(&self) -> Option<InvalidTokenReason> {
        match self {
            Self::InvalidToken(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Check if the operation may succeed on retry.
    ///
    /// Only backend outages are transient; a rejected token stays rejected.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }

    /// Message that is safe to show to end users.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid token",
            Self::BackendUnavailable(_) => "service temporarily unavailable",
            Self::InvalidSubject | Self::ReservedClaimConflict(_) => "invalid token request",
            Self::InvalidConfig(_) | Self::NoActiveKey | Self::Encoding(_) => "internal error",
        }
    }
}

impl From<redis::RedisError> for TokenError {
    fn from(err: redis::RedisError) -> Self {
        TokenError::BackendUnavailable(err.to_string())
    }
}

/// Flat error kind with stable codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty subject at issuance
    InvalidSubject,
    /// Unusable profile or key configuration
    InvalidConfig,
    /// Extra claim shadows a reserved claim
    ReservedClaimConflict,
    /// No current signing key
    NoActiveKey,
    /// Artifact could not be parsed
    MalformedToken,
    /// Header names an unknown key
    UnknownKey,
    /// Signature does not verify
    InvalidSignature,
    /// Past `exp + leeway`
    TokenExpired,
    /// Before `iat`/`nbf` minus leeway
    TokenNotYetValid,
    /// Issuer, audience or purpose differs
    ScopeMismatch,
    /// Token already consumed or revoked
    TokenReplayed,
    /// Replay store failed or timed out
    BackendUnavailable,
    /// Codec failed while signing
    Encoding,
}

impl ErrorKind {
    /// Get the string representation of the error kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSubject => "INVALID_SUBJECT",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::ReservedClaimConflict => "RESERVED_CLAIM_CONFLICT",
            Self::NoActiveKey => "NO_ACTIVE_KEY",
            Self::MalformedToken => "TOKEN_MALFORMED",
            Self::UnknownKey => "TOKEN_UNKNOWN_KEY",
            Self::InvalidSignature => "TOKEN_INVALID_SIGNATURE",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            Self::ScopeMismatch => "TOKEN_SCOPE_MISMATCH",
            Self::TokenReplayed => "TOKEN_REPLAYED",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::Encoding => "TOKEN_ENCODING_FAILED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
