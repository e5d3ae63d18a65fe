//! Signing key management.
//!
//! Keys are Ed25519. Each record is addressed by an opaque key identifier
//! (`kid`) that is embedded in every token header, so tokens signed before a
//! rotation keep verifying as long as their record stays in the store.

pub mod jwk;
pub mod record;
pub mod store;

pub use jwk::{Jwk, Jwks};
pub use record::{generate_private_key_pem, KeyRecord};
pub use store::KeyStore;
