//! Purpose-scoped, single-use token engine.
//!
//! Issues short-lived signed tokens (email verification, password reset,
//! magic links, invitations), verifies them against an expected profile, and
//! consumes them on first successful use. Provides Ed25519 key rotation,
//! a pluggable replay cache (in-memory or Redis) and revocation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod jwt;
pub mod keys;
pub mod metrics;
pub mod replay;
pub mod service;
pub mod telemetry;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, TokenProfile};
pub use error::{ErrorKind, InvalidTokenReason, ScopeField, TokenError};
pub use jwt::{ClaimSet, ExtraClaims};
pub use keys::{KeyRecord, KeyStore};
pub use replay::{ReplayCache, ReplayStore};
pub use service::TokenService;
