//! Secure key facility contract.
//!
//! A facility owns named asymmetric keypairs. The typed layer never sees how
//! they are persisted; it only asks whether an alias exists, asks for one to be
//! generated, and fetches the public or private half.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a public or private key in bytes.
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyFacilityError {
    #[error("no keypair stored under alias {alias}")]
    NotFound { alias: String },
    #[error("key facility unavailable: {0}")]
    Unavailable(String),
    #[error("stored keypair for alias {alias} is corrupt: {reason}")]
    Corrupt { alias: String, reason: String },
    #[error("keypair generation failed: {0}")]
    Generation(String),
}

/// Window during which a generated keypair is meant to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValidity {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl KeyValidity {
    /// One calendar year starting at `start`.
    pub fn one_year_from(start: DateTime<Utc>) -> Self {
        let not_after = start
            .checked_add_months(Months::new(12))
            .unwrap_or_else(|| start + Duration::days(365));
        Self {
            not_before: start,
            not_after,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Public half of a keypair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Private half of a keypair. Zeroized on drop and never cloned.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes. Never log or persist these outside the facility.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Holder of named keypairs (OS keychain in production; memory in tests).
///
/// Calls are synchronous and either return or fail; there is no timeout or
/// cancellation at this layer.
pub trait KeyFacility: Send + Sync {
    fn has_keypair(&self, alias: &str) -> Result<bool, KeyFacilityError>;

    /// Create and persist a new keypair under `alias`. Callers check
    /// `has_keypair` first; implementations overwrite.
    fn generate_keypair(&self, alias: &str, validity: KeyValidity) -> Result<(), KeyFacilityError>;

    fn public_key(&self, alias: &str) -> Result<PublicKey, KeyFacilityError>;

    fn private_key(&self, alias: &str) -> Result<SecretKey, KeyFacilityError>;
}
