//! Key store with atomic rotation.
//!
//! The store keeps an immutable snapshot (`KeyRing`) behind an [`ArcSwap`].
//! Rotation builds a new snapshot containing the new record *and* the new
//! current identifier, then swaps it in, so readers never observe a current
//! identifier whose record is missing.

use crate::error::{InvalidTokenReason, TokenError};
use crate::keys::jwk::Jwks;
use crate::keys::record::KeyRecord;
use crate::metrics;
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Variable naming the current signing key.
pub const ACTIVE_KEY_ID_VAR: &str = "TOKEN_ACTIVE_KEY_ID";
/// Prefix of variables holding PEM private keys, suffixed by the key identifier.
pub const PRIVATE_KEY_PREFIX: &str = "TOKEN_PRIVATE_KEY_";
/// Prefix of variables holding PEM public (verify-only) keys.
pub const PUBLIC_KEY_PREFIX: &str = "TOKEN_PUBLIC_KEY_";

#[derive(Debug, Default, Clone)]
struct KeyRing {
    current: Option<String>,
    records: HashMap<String, Arc<KeyRecord>>,
}

impl KeyRing {
    fn with_record(&self, record: Arc<KeyRecord>, make_current: bool) -> Self {
        let mut next = self.clone();
        if make_current {
            next.current = Some(record.kid().to_string());
        }
        next.records.insert(record.kid().to_string(), record);
        next
    }
}

/// Known signing and verification keys indexed by key identifier.
#[derive(Debug)]
pub struct KeyStore {
    ring: ArcSwap<KeyRing>,
}

impl KeyStore {
    /// Create a store whose current key is `current`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `current` is not among `records`, cannot
    /// sign, or if two records share an identifier.
    pub fn new(
        current: &str,
        records: impl IntoIterator<Item = KeyRecord>,
    ) -> Result<Self, TokenError> {
        let ring = build_ring(records)?;

        match ring.records.get(current) {
            Some(record) if record.can_sign() => {}
            Some(_) => {
                return Err(TokenError::config(format!(
                    "current key '{current}' has no private material"
                )))
            }
            None => {
                return Err(TokenError::config(format!(
                    "current key '{current}' is not among the configured keys"
                )))
            }
        }

        Ok(Self {
            ring: ArcSwap::from_pointee(KeyRing {
                current: Some(current.to_string()),
                ..ring
            }),
        })
    }

    /// Create a store that can verify but not issue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if two records share an identifier.
    pub fn verification_only(
        records: impl IntoIterator<Item = KeyRecord>,
    ) -> Result<Self, TokenError> {
        Ok(Self {
            ring: ArcSwap::from_pointee(build_ring(records)?),
        })
    }

    /// Build a store from a raw configuration map.
    ///
    /// Recognised entries:
    /// - `TOKEN_PRIVATE_KEY_<kid>`: PEM PKCS#8 Ed25519 private key
    /// - `TOKEN_PUBLIC_KEY_<kid>`: PEM Ed25519 public key (verify-only)
    /// - `TOKEN_ACTIVE_KEY_ID`: identifier of the current signing key
    ///
    /// Without `TOKEN_ACTIVE_KEY_ID` the store is verify-only. Other entries
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on unreadable keys, duplicate identifiers, or
    /// an active identifier without a matching private key.
    pub fn from_config_map(map: &HashMap<String, String>) -> Result<Self, TokenError> {
        // Sorted for deterministic error reporting.
        let entries: BTreeMap<&String, &String> = map.iter().collect();
        let mut records = Vec::new();

        for (name, value) in entries {
            if let Some(kid) = name.strip_prefix(PRIVATE_KEY_PREFIX) {
                records.push(KeyRecord::from_private_pem(kid, value)?);
            } else if let Some(kid) = name.strip_prefix(PUBLIC_KEY_PREFIX) {
                records.push(KeyRecord::from_public_pem(kid, value)?);
            }
        }

        let store = match map.get(ACTIVE_KEY_ID_VAR).map(|s| s.trim()) {
            Some(active) if !active.is_empty() => {
                let has_private = records.iter().any(|r| r.kid() == active && r.can_sign());
                if !has_private {
                    return Err(TokenError::config(format!(
                        "{ACTIVE_KEY_ID_VAR} is set to '{active}', but no matching \
                         {PRIVATE_KEY_PREFIX}{active} entry was found"
                    )));
                }
                Self::new(active, records)?
            }
            _ => {
                warn!("{ACTIVE_KEY_ID_VAR} not set; key store is verification-only");
                Self::verification_only(records)?
            }
        };

        info!(
            keys = store.len(),
            current = ?store.current_identifier(),
            "Loaded key store"
        );
        Ok(store)
    }

    /// Resolve a key for verification, including retired keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken(UnknownKey)` if the identifier is not known.
    pub fn resolve(&self, kid: &str) -> Result<Arc<KeyRecord>, TokenError> {
        self.ring
            .load()
            .records
            .get(kid)
            .cloned()
            .ok_or(TokenError::InvalidToken(InvalidTokenReason::UnknownKey))
    }

    /// The key used for new issuances.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` if the store is verify-only.
    pub fn current(&self) -> Result<Arc<KeyRecord>, TokenError> {
        let ring = self.ring.load();
        ring.current
            .as_deref()
            .and_then(|kid| ring.records.get(kid))
            .filter(|record| record.can_sign())
            .cloned()
            .ok_or(TokenError::NoActiveKey)
    }

    /// Add `record` and make it current in a single atomic swap.
    ///
    /// Previous records stay resolvable so outstanding tokens keep verifying.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the record cannot sign or its identifier is
    /// already registered.
    pub fn rotate(&self, record: KeyRecord) -> Result<(), TokenError> {
        if !record.can_sign() {
            return Err(TokenError::config(format!(
                "cannot rotate to key '{}' without private material",
                record.kid()
            )));
        }

        let kid = record.kid().to_string();
        self.insert(Arc::new(record), true)?;
        metrics::record_key_rotation();
        info!(kid = %kid, "Rotated current signing key");
        Ok(())
    }

    /// Register a key without changing the current one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the identifier is already registered.
    pub fn add_verification_key(&self, record: KeyRecord) -> Result<(), TokenError> {
        let kid = record.kid().to_string();
        self.insert(Arc::new(record), false)?;
        info!(kid = %kid, "Registered verification key");
        Ok(())
    }

    /// Identifier of the current signing key, if any.
    #[must_use]
    pub fn current_identifier(&self) -> Option<String> {
        self.ring.load().current.clone()
    }

    /// All known key identifiers, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ring.load().records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of known keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.load().records.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Public keys of every known record, current key first.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let ring = self.ring.load();
        let mut jwks = Jwks::new();

        let current = ring.current.as_deref();
        if let Some(record) = current.and_then(|kid| ring.records.get(kid)) {
            jwks.add_key(record.to_jwk());
        }

        let mut others: Vec<&Arc<KeyRecord>> = ring
            .records
            .values()
            .filter(|r| Some(r.kid()) != current)
            .collect();
        others.sort_by(|a, b| a.kid().cmp(b.kid()));
        for record in others {
            jwks.add_key(record.to_jwk());
        }

        jwks
    }

    fn insert(&self, record: Arc<KeyRecord>, make_current: bool) -> Result<(), TokenError> {
        loop {
            let old = self.ring.load_full();
            if old.records.contains_key(record.kid()) {
                return Err(TokenError::config(format!(
                    "key '{}' is already registered",
                    record.kid()
                )));
            }

            let next = Arc::new(old.with_record(Arc::clone(&record), make_current));
            let prev = self.ring.compare_and_swap(&old, next);
            if Arc::ptr_eq(&prev, &old) {
                return Ok(());
            }
        }
    }
}

fn build_ring(records: impl IntoIterator<Item = KeyRecord>) -> Result<KeyRing, TokenError> {
    let mut ring = KeyRing::default();
    for record in records {
        let kid = record.kid().to_string();
        if ring.records.insert(kid.clone(), Arc::new(record)).is_some() {
            return Err(TokenError::config(format!("duplicate key identifier '{kid}'")));
        }
    }
    Ok(ring)
}
