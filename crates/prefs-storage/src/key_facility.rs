use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use prefs_core::keys::{KeyFacility, KeyFacilityError, KeyValidity, PublicKey, SecretKey, KEY_SIZE};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

/// Serialized form of a keypair as persisted by a facility.
#[derive(Debug, Serialize, Deserialize)]
struct KeypairRecord {
    subject: String,
    public: String,
    secret: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl KeypairRecord {
    fn validity(&self) -> KeyValidity {
        KeyValidity {
            not_before: self.not_before,
            not_after: self.not_after,
        }
    }
}

/// OS keyring-backed facility. Uses the `keyring` crate; each alias is one
/// entry under the configured service.
pub struct KeyringFacility {
    service: String,
}

impl KeyringFacility {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> Result<keyring::Entry, KeyFacilityError> {
        keyring::Entry::new(&self.service, alias)
            .map_err(|e| KeyFacilityError::Unavailable(e.to_string()))
    }

    /// Remove the keypair stored for `alias`. Missing entries are not an error.
    pub fn delete(&self, alias: &str) -> Result<(), KeyFacilityError> {
        match self.entry(alias)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(KeyFacilityError::Unavailable(err.to_string())),
        }
    }

    fn load(&self, alias: &str) -> Result<String, KeyFacilityError> {
        match self.entry(alias)?.get_password() {
            Ok(secret) => Ok(secret),
            Err(keyring::Error::NoEntry) => Err(KeyFacilityError::NotFound {
                alias: alias.to_string(),
            }),
            Err(err) => Err(KeyFacilityError::Unavailable(err.to_string())),
        }
    }
}

impl KeyFacility for KeyringFacility {
    #[instrument(skip(self))]
    fn has_keypair(&self, alias: &str) -> Result<bool, KeyFacilityError> {
        match self.load(alias) {
            Ok(_) => Ok(true),
            Err(KeyFacilityError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, validity))]
    fn generate_keypair(&self, alias: &str, validity: KeyValidity) -> Result<(), KeyFacilityError> {
        let record = Zeroizing::new(generate_record(alias, validity)?);
        self.entry(alias)?
            .set_password(&record)
            .map_err(|e| KeyFacilityError::Unavailable(e.to_string()))?;
        debug!(service = %self.service, "stored new keypair in keyring");
        Ok(())
    }

    fn public_key(&self, alias: &str) -> Result<PublicKey, KeyFacilityError> {
        let record = Zeroizing::new(self.load(alias)?);
        decode_public(alias, &record)
    }

    fn private_key(&self, alias: &str) -> Result<SecretKey, KeyFacilityError> {
        let record = Zeroizing::new(self.load(alias)?);
        decode_secret(alias, &record)
    }
}

/// In-memory key facility for tests and ephemeral sessions.
///
/// Records are kept in the same serialized form the keyring facility uses.
#[derive(Default, Clone)]
pub struct InMemoryKeyFacility {
    inner: Arc<Mutex<HashMap<String, Zeroizing<String>>>>,
    generated: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryKeyFacility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keypairs generated over the lifetime of this facility.
    pub fn generated_count(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Simulate the facility going away; every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), KeyFacilityError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KeyFacilityError::Unavailable(
                "in-memory facility marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn load(&self, alias: &str) -> Result<Zeroizing<String>, KeyFacilityError> {
        self.check_available()?;
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyFacilityError::Unavailable(format!("lock poisoned: {err}")))?;
        guard
            .get(alias)
            .cloned()
            .ok_or_else(|| KeyFacilityError::NotFound {
                alias: alias.to_string(),
            })
    }
}

impl std::fmt::Debug for InMemoryKeyFacility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyFacility")
            .field("generated", &self.generated_count())
            .finish_non_exhaustive()
    }
}

impl KeyFacility for InMemoryKeyFacility {
    fn has_keypair(&self, alias: &str) -> Result<bool, KeyFacilityError> {
        self.check_available()?;
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyFacilityError::Unavailable(format!("lock poisoned: {err}")))?;
        Ok(guard.contains_key(alias))
    }

    fn generate_keypair(&self, alias: &str, validity: KeyValidity) -> Result<(), KeyFacilityError> {
        self.check_available()?;
        let record = Zeroizing::new(generate_record(alias, validity)?);
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyFacilityError::Unavailable(format!("lock poisoned: {err}")))?;
        guard.insert(alias.to_string(), record);
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn public_key(&self, alias: &str) -> Result<PublicKey, KeyFacilityError> {
        decode_public(alias, &self.load(alias)?)
    }

    fn private_key(&self, alias: &str) -> Result<SecretKey, KeyFacilityError> {
        decode_secret(alias, &self.load(alias)?)
    }
}

fn generate_record(alias: &str, validity: KeyValidity) -> Result<String, KeyFacilityError> {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    let secret_bytes = Zeroizing::new(secret.to_bytes());

    let record = KeypairRecord {
        subject: format!("CN={alias}, O=prefs-helper"),
        public: general_purpose::STANDARD.encode(public.as_bytes()),
        secret: general_purpose::STANDARD.encode(secret_bytes.as_slice()),
        not_before: validity.not_before,
        not_after: validity.not_after,
    };
    serde_json::to_string(&record).map_err(|e| KeyFacilityError::Generation(e.to_string()))
}

fn parse_record(alias: &str, raw: &str) -> Result<KeypairRecord, KeyFacilityError> {
    serde_json::from_str(raw).map_err(|e| corrupt(alias, e))
}

fn decode_key(alias: &str, encoded: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyFacilityError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| corrupt(alias, e))?,
    );

    if bytes.len() != KEY_SIZE {
        return Err(corrupt(
            alias,
            format!("expected {KEY_SIZE} bytes, got {}", bytes.len()),
        ));
    }

    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn decode_public(alias: &str, raw: &str) -> Result<PublicKey, KeyFacilityError> {
    let record = parse_record(alias, raw)?;
    // Expiry is informational; the key stays usable.
    if !record.validity().contains(Utc::now()) {
        debug!(%alias, not_after = %record.not_after, "keypair is outside its validity window");
    }
    let bytes = decode_key(alias, &record.public)?;
    Ok(PublicKey::from_bytes(*bytes))
}

fn decode_secret(alias: &str, raw: &str) -> Result<SecretKey, KeyFacilityError> {
    let record = Zeroizing::new(parse_record(alias, raw)?.secret);
    let bytes = decode_key(alias, &record)?;
    Ok(SecretKey::from_bytes(*bytes))
}

fn corrupt(alias: &str, reason: impl ToString) -> KeyFacilityError {
    KeyFacilityError::Corrupt {
        alias: alias.to_string(),
        reason: reason.to_string(),
    }
}
