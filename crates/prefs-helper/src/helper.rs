use std::sync::Arc;

use prefs_core::{
    keys::KeyFacility,
    storage::{PendingWrite, PreferenceStore, SyncMode},
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::instrument;

use crate::{
    codec::{CodecRegistry, JsonCodec, PrefAdapter, StructuredCodec},
    envelope::EncryptionEnvelope,
    error::{require_key, Result},
    typed::Preference,
};

/// Typed store over a `PreferenceStore`, with a codec registry for structured
/// values and an encryption envelope for confidential strings.
pub struct PreferencesHelper<S, F, C = JsonCodec>
where
    S: PreferenceStore,
    F: KeyFacility,
    C: StructuredCodec,
{
    store: S,
    envelope: EncryptionEnvelope<F>,
    codec: Arc<CodecRegistry<C>>,
}

impl<S: PreferenceStore, F: KeyFacility> PreferencesHelper<S, F, JsonCodec> {
    pub fn new(store: S, facility: F) -> Self {
        Self::with_parts(
            store,
            EncryptionEnvelope::new(facility),
            Arc::new(CodecRegistry::new()),
        )
    }
}

impl<S, F, C> PreferencesHelper<S, F, C>
where
    S: PreferenceStore,
    F: KeyFacility,
    C: StructuredCodec,
{
    /// Build from explicit parts; share `codec` to give several helpers one
    /// adapter table.
    pub fn with_parts(store: S, envelope: EncryptionEnvelope<F>, codec: Arc<CodecRegistry<C>>) -> Self {
        Self {
            store,
            envelope,
            codec,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn envelope(&self) -> &EncryptionEnvelope<F> {
        &self.envelope
    }

    pub fn codec(&self) -> &Arc<CodecRegistry<C>> {
        &self.codec
    }

    /// Select the key alias used by `set_and_encrypt` / `get_encrypted`.
    pub fn set_alias(&self, alias: impl Into<String>) -> Result<()> {
        self.envelope.set_alias(alias)
    }

    /// Get the value stored under `key` as a `T`.
    ///
    /// `default` is optional for primitives (zero values are used) and
    /// mandatory for structured types.
    #[instrument(skip(self, default), fields(kind = ?T::KIND))]
    pub fn get<T: Preference>(&self, key: &str, default: Option<T>) -> Result<T> {
        require_key(key)?;
        T::read(&self.store, self.codec.as_ref(), key, default)
    }

    /// Same as `get`, with the default always supplied.
    pub fn get_or<T: Preference>(&self, key: &str, default: T) -> Result<T> {
        self.get(key, Some(default))
    }

    /// Store `value`, returning before the write is durable.
    pub fn set<T: Preference>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_mode(key, value, SyncMode::Apply)
    }

    /// Store `value`, returning once the write is durable.
    pub fn set_sync<T: Preference>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_mode(key, value, SyncMode::Commit)
    }

    #[instrument(skip(self, value), fields(kind = ?T::KIND))]
    pub fn set_with_mode<T: Preference>(&self, key: &str, value: &T, mode: SyncMode) -> Result<()> {
        require_key(key)?;
        let stored = value.to_stored(self.codec.as_ref())?;
        PendingWrite::new(&self.store, key, stored).finish(mode)?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        require_key(key)?;
        Ok(self.store.contains(key)?)
    }

    /// Register or replace the adapter override for `T`.
    pub fn add_adapter<T: 'static>(&self, adapter: impl PrefAdapter<T> + 'static) {
        self.codec.add_adapter(adapter);
    }

    /// Encrypt `value` with the envelope, then store the ciphertext.
    #[instrument(skip(self, value))]
    pub fn set_and_encrypt(&self, key: &str, value: &str) -> Result<()> {
        require_key(key)?;
        let sealed = self.envelope.encrypt(value)?;
        self.set(key, &sealed)
    }

    /// Read the ciphertext stored under `key` and decrypt it. A key that was
    /// never written has nothing to decrypt and fails as an invalid argument.
    #[instrument(skip(self))]
    pub fn get_encrypted(&self, key: &str) -> Result<String> {
        let sealed: String = self.get(key, None)?;
        self.envelope.decrypt(&sealed)
    }

    pub fn serialize_into_string<T: Serialize + 'static>(&self, value: &T) -> Result<String> {
        self.codec.encode(value)
    }

    pub fn serialize_from_string<T: DeserializeOwned + 'static>(
        &self,
        input: &str,
        default: T,
    ) -> Result<T> {
        self.codec.decode(input, default)
    }
}
