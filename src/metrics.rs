//! Prometheus metrics for the token engine.
//!
//! Metrics register in the default registry on first use.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

/// Tokens issued counter.
pub static TOKENS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tokenmint_tokens_issued_total",
        "Total number of tokens issued",
        &["purpose"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Verification outcomes counter.
pub static TOKENS_VERIFIED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tokenmint_verifications_total",
        "Total number of token verifications by outcome",
        &["purpose", "outcome"]
    )
    .expect("Failed to register verifications metric")
});

/// Tokens revoked counter.
pub static TOKENS_REVOKED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tokenmint_tokens_revoked_total",
        "Total number of tokens revoked",
        &["path"]
    )
    .expect("Failed to register tokens_revoked metric")
});

/// Replay store operations counter.
pub static REPLAY_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tokenmint_replay_store_operations_total",
        "Total number of replay store operations",
        &["operation", "status"]
    )
    .expect("Failed to register replay_store_operations metric")
});

/// Key rotations counter.
pub static KEY_ROTATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tokenmint_key_rotations_total",
        "Total number of signing key rotations"
    )
    .expect("Failed to register key_rotations metric")
});

/// Record a token issuance.
pub fn record_token_issued(purpose: &str) {
    TOKENS_ISSUED.with_label_values(&[purpose]).inc();
}

/// Record a verification outcome (`"ok"` or an error kind code).
pub fn record_verification(purpose: &str, outcome: &str) {
    TOKENS_VERIFIED
        .with_label_values(&[purpose, outcome])
        .inc();
}

/// Record a revocation.
pub fn record_token_revoked(path: &str) {
    TOKENS_REVOKED.with_label_values(&[path]).inc();
}

/// Record a replay store operation.
pub fn record_replay_operation(operation: &str, status: &str) {
    REPLAY_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a key rotation.
pub fn record_key_rotation() {
    KEY_ROTATIONS.inc();
}
