//! Claim sets and the signed-token codec.

pub mod builder;
pub mod claims;
pub mod codec;

pub use builder::ClaimSetBuilder;
pub use claims::{ClaimSet, ExtraClaims, RESERVED_CLAIMS};
pub use codec::{JwtCodec, TokenCodec, TokenHeader};
