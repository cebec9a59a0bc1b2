//! Envelope encryption for confidential string preferences.
//!
//! Values are sealed to the public half of a named X25519 keypair held by a
//! [`KeyFacility`]: an ephemeral X25519 exchange feeds HKDF-SHA256, and the
//! derived key encrypts the plaintext with AES-256-GCM. The printable envelope
//! is standard base64 of `ephemeral public key || nonce || ciphertext`.
//!
//! The envelope carries no alias or algorithm tag; decryption assumes the
//! active alias produced it.

use std::sync::{Arc, Mutex};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hkdf::Hkdf;
use prefs_core::keys::{
    KeyFacility, KeyFacilityError, KeyValidity, PublicKey, SecretKey, KEY_SIZE,
};
use rand::rngs::OsRng;
use sha2::Sha256;
use tracing::{debug, info, instrument};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{PrefsError, Result};

/// Domain separator for the envelope key derivation.
const ENVELOPE_CONTEXT: &[u8] = b"prefs-helper envelope v1";

const NONCE_SIZE: usize = 12;
const HEADER_SIZE: usize = KEY_SIZE + NONCE_SIZE;

/// Resolved keypair for the active alias.
struct KeyHandle {
    alias: String,
    public: PublicKey,
    secret: SecretKey,
}

enum KeyState {
    Uninitialized,
    Ready(Arc<KeyHandle>),
}

struct EnvelopeState {
    alias: Option<String>,
    key: KeyState,
}

/// Lazily provisioned encrypt/decrypt over one active key alias.
///
/// The first `encrypt` or `decrypt` resolves the alias against the facility,
/// generating a keypair valid for one year if none exists. Resolution happens
/// under a lock, so concurrent first use provisions once. Switching to a
/// different alias drops the resolved key and the next call resolves again.
pub struct EncryptionEnvelope<F: KeyFacility> {
    facility: F,
    state: Mutex<EnvelopeState>,
}

impl<F: KeyFacility> EncryptionEnvelope<F> {
    pub fn new(facility: F) -> Self {
        Self {
            facility,
            state: Mutex::new(EnvelopeState {
                alias: None,
                key: KeyState::Uninitialized,
            }),
        }
    }

    pub fn with_alias(facility: F, alias: impl Into<String>) -> Result<Self> {
        let envelope = Self::new(facility);
        envelope.set_alias(alias)?;
        Ok(envelope)
    }

    pub fn facility(&self) -> &F {
        &self.facility
    }

    pub fn set_alias(&self, alias: impl Into<String>) -> Result<()> {
        let alias = alias.into();
        if alias.is_empty() {
            return Err(PrefsError::InvalidArgument(
                "key alias must not be empty".to_string(),
            ));
        }

        let mut state = self.lock()?;
        if state.alias.as_deref() == Some(alias.as_str()) {
            return Ok(());
        }
        if let KeyState::Ready(handle) = &state.key {
            debug!(from = %handle.alias, to = %alias, "alias changed, dropping resolved key");
        }
        state.alias = Some(alias);
        state.key = KeyState::Uninitialized;
        Ok(())
    }

    pub fn alias(&self) -> Option<String> {
        self.lock().ok().and_then(|state| state.alias.clone())
    }

    /// Whether a key has been resolved for the active alias.
    pub fn is_ready(&self) -> bool {
        self.lock()
            .map(|state| matches!(state.key, KeyState::Ready(_)))
            .unwrap_or(false)
    }

    #[instrument(skip_all)]
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Err(PrefsError::InvalidArgument(
                "plaintext must not be empty".to_string(),
            ));
        }
        let handle = self.ready()?;

        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519Public::from(&ephemeral);
        let recipient = X25519Public::from(*handle.public.as_bytes());
        let shared = ephemeral.diffie_hellman(&recipient);

        let cipher = derive_cipher(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            handle.public.as_bytes(),
        )?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| PrefsError::Cipher(format!("encrypt failed: {e}")))?;

        let mut blob = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        blob.extend_from_slice(ephemeral_public.as_bytes());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    #[instrument(skip_all)]
    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        if envelope.is_empty() {
            return Err(PrefsError::InvalidArgument(
                "ciphertext must not be empty".to_string(),
            ));
        }
        let handle = self.ready()?;

        let blob = STANDARD
            .decode(envelope)
            .map_err(|e| PrefsError::Cipher(format!("envelope decode failed: {e}")))?;
        if blob.len() <= HEADER_SIZE {
            return Err(PrefsError::Cipher(format!(
                "envelope too short: {} bytes",
                blob.len()
            )));
        }
        let (ephemeral_bytes, rest) = blob.split_at(KEY_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let mut ephemeral = [0u8; KEY_SIZE];
        ephemeral.copy_from_slice(ephemeral_bytes);
        let secret = StaticSecret::from(*handle.secret.as_bytes());
        let shared = secret.diffie_hellman(&X25519Public::from(ephemeral));

        let cipher = derive_cipher(shared.as_bytes(), &ephemeral, handle.public.as_bytes())?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|e| PrefsError::Cipher(format!("decrypt failed: {e}")))?,
        );

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| PrefsError::Cipher(format!("decrypted value is not utf-8: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EnvelopeState>> {
        self.state
            .lock()
            .map_err(|err| {
                PrefsError::from(KeyFacilityError::Unavailable(format!("lock poisoned: {err}")))
            })
    }

    /// Resolve the key for the active alias, provisioning it on first use.
    fn ready(&self) -> Result<Arc<KeyHandle>> {
        let mut state = self.lock()?;
        if let KeyState::Ready(handle) = &state.key {
            return Ok(Arc::clone(handle));
        }

        let alias = state.alias.clone().ok_or_else(|| {
            PrefsError::Configuration("key alias must be set before use".to_string())
        })?;
        let handle = Arc::new(self.provision(alias)?);
        state.key = KeyState::Ready(Arc::clone(&handle));
        Ok(handle)
    }

    fn provision(&self, alias: String) -> Result<KeyHandle> {
        if !self.facility.has_keypair(&alias)? {
            let validity = KeyValidity::one_year_from(Utc::now());
            info!(%alias, not_after = %validity.not_after, "generating keypair");
            self.facility.generate_keypair(&alias, validity)?;
        } else {
            debug!(%alias, "using existing keypair");
        }

        let public = self.facility.public_key(&alias)?;
        let secret = self.facility.private_key(&alias)?;
        Ok(KeyHandle {
            alias,
            public,
            secret,
        })
    }
}

fn derive_cipher(
    shared: &[u8; KEY_SIZE],
    ephemeral_public: &[u8; KEY_SIZE],
    recipient_public: &[u8; KEY_SIZE],
) -> Result<Aes256Gcm> {
    let mut salt = [0u8; KEY_SIZE * 2];
    salt[..KEY_SIZE].copy_from_slice(ephemeral_public);
    salt[KEY_SIZE..].copy_from_slice(recipient_public);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(ENVELOPE_CONTEXT, &mut okm[..])
        .map_err(|e| PrefsError::Cipher(format!("key derivation failed: {e}")))?;
    Aes256Gcm::new_from_slice(&okm[..])
        .map_err(|e| PrefsError::Cipher(format!("cipher init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use std::thread;

    use prefs_storage::key_facility::InMemoryKeyFacility;

    use super::*;

    fn envelope(alias: &str) -> EncryptionEnvelope<InMemoryKeyFacility> {
        EncryptionEnvelope::with_alias(InMemoryKeyFacility::new(), alias).expect("alias")
    }

    #[test]
    fn round_trips_plaintext() {
        let envelope = envelope("A");
        let long = "x".repeat(4096);
        for plaintext in [
            "secret",
            "allo allo this is nighthawk",
            "ünïcødé ✓",
            long.as_str(),
        ] {
            let sealed = envelope.encrypt(plaintext).expect("encrypt");
            assert_ne!(sealed, plaintext);
            assert_eq!(envelope.decrypt(&sealed).expect("decrypt"), plaintext);
        }
    }

    #[test]
    fn envelope_is_printable_base64() {
        let envelope = envelope("A");
        let sealed = envelope.encrypt("U357 is on the way").expect("encrypt");
        assert!(sealed.chars().all(|c| c.is_ascii_graphic()));
        assert!(!sealed.contains("U357"));
    }

    #[test]
    fn empty_input_is_invalid() {
        let envelope = envelope("A");
        assert!(matches!(
            envelope.encrypt(""),
            Err(PrefsError::InvalidArgument(_))
        ));
        assert!(matches!(
            envelope.decrypt(""),
            Err(PrefsError::InvalidArgument(_))
        ));
        assert!(!envelope.is_ready());
    }

    #[test]
    fn use_without_alias_is_a_configuration_error() {
        let envelope = EncryptionEnvelope::new(InMemoryKeyFacility::new());
        let err = envelope.encrypt("secret").expect_err("should fail");
        assert!(matches!(err, PrefsError::Configuration(_)));
        assert!(!envelope.is_ready());
        assert_eq!(envelope.facility().generated_count(), 0);
    }

    #[test]
    fn empty_alias_is_rejected() {
        let envelope = EncryptionEnvelope::new(InMemoryKeyFacility::new());
        assert!(matches!(
            envelope.set_alias(""),
            Err(PrefsError::InvalidArgument(_))
        ));
        assert_eq!(envelope.alias(), None);
    }

    #[test]
    fn provisions_once_and_reuses_handle() {
        let envelope = envelope("A");
        assert!(!envelope.is_ready());

        let sealed = envelope.encrypt("one").expect("encrypt");
        envelope.encrypt("two").expect("encrypt");
        envelope.decrypt(&sealed).expect("decrypt");

        assert!(envelope.is_ready());
        assert_eq!(envelope.facility().generated_count(), 1);
    }

    #[test]
    fn existing_keypair_is_not_regenerated() {
        let facility = InMemoryKeyFacility::new();
        facility
            .generate_keypair("A", KeyValidity::one_year_from(Utc::now()))
            .expect("pre-generate");

        let first = EncryptionEnvelope::with_alias(facility.clone(), "A").expect("alias");
        let sealed = first.encrypt("persisted").expect("encrypt");

        // A fresh envelope over the same facility stands in for a restart.
        let second = EncryptionEnvelope::with_alias(facility.clone(), "A").expect("alias");
        assert_eq!(second.decrypt(&sealed).expect("decrypt"), "persisted");
        assert_eq!(facility.generated_count(), 1);
    }

    #[test]
    fn concurrent_first_use_provisions_once() {
        let envelope = Arc::new(envelope("A"));
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let envelope = Arc::clone(&envelope);
                thread::spawn(move || envelope.encrypt(&format!("value-{i}")))
            })
            .collect();

        for worker in workers {
            worker.join().expect("join").expect("encrypt");
        }
        assert_eq!(envelope.facility().generated_count(), 1);
    }

    #[test]
    fn alias_change_resolves_new_key() {
        let envelope = envelope("A");
        let sealed_a = envelope.encrypt("under A").expect("encrypt");
        assert!(envelope.is_ready());

        envelope.set_alias("B").expect("alias");
        assert!(!envelope.is_ready());
        assert_eq!(envelope.alias().as_deref(), Some("B"));

        let sealed_b = envelope.encrypt("under B").expect("encrypt");
        assert_eq!(envelope.facility().generated_count(), 2);
        assert_eq!(envelope.decrypt(&sealed_b).expect("decrypt"), "under B");
        assert!(matches!(
            envelope.decrypt(&sealed_a),
            Err(PrefsError::Cipher(_))
        ));

        envelope.set_alias("A").expect("alias");
        assert_eq!(envelope.decrypt(&sealed_a).expect("decrypt"), "under A");
        assert_eq!(envelope.facility().generated_count(), 2);
    }

    #[test]
    fn setting_same_alias_keeps_handle() {
        let envelope = envelope("A");
        envelope.encrypt("x").expect("encrypt");
        envelope.set_alias("A").expect("alias");
        assert!(envelope.is_ready());
    }

    #[test]
    fn facility_failure_is_explicit() {
        let facility = InMemoryKeyFacility::new();
        facility.set_unavailable(true);
        let envelope = EncryptionEnvelope::with_alias(facility, "A").expect("alias");

        let err = envelope.encrypt("secret").expect_err("should fail");
        assert!(matches!(
            err,
            PrefsError::KeyFacility(KeyFacilityError::Unavailable(_))
        ));
        assert!(!envelope.is_ready());
    }

    #[test]
    fn poisoned_state_reports_unavailable_keys() {
        let envelope = envelope("A");
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = envelope.state.lock().unwrap();
            panic!("poison the envelope state");
        }));

        let err = envelope.encrypt("secret").expect_err("should fail");
        assert!(matches!(
            err,
            PrefsError::KeyFacility(KeyFacilityError::Unavailable(_))
        ));
        assert!(matches!(
            envelope.set_alias("B"),
            Err(PrefsError::KeyFacility(KeyFacilityError::Unavailable(_)))
        ));
    }

    #[test]
    fn tampered_or_malformed_envelopes_fail() {
        let envelope = envelope("A");
        let sealed = envelope.encrypt("secret").expect("encrypt");

        let mut bytes = STANDARD.decode(&sealed).expect("base64");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = STANDARD.encode(bytes);

        for bad in [tampered.as_str(), "not base64!", "c2hvcnQ="] {
            assert!(matches!(envelope.decrypt(bad), Err(PrefsError::Cipher(_))));
        }
    }
}
