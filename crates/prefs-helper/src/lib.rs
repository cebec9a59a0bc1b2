//! Typed preferences on top of a plain key-value store.
//!
//! Primitives go straight to the store; any other type is encoded to a string
//! by the codec registry (JSON by default, with per-type adapter overrides).
//! Confidential strings can be sealed with an [`EncryptionEnvelope`] before
//! they are written.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod helper;
pub mod typed;

pub use codec::{AdapterError, CodecRegistry, FnAdapter, JsonCodec, PrefAdapter, StructuredCodec};
pub use envelope::EncryptionEnvelope;
pub use error::{PrefsError, Result};
pub use helper::PreferencesHelper;
pub use prefs_core::storage::SyncMode;
pub use typed::{PrefKind, Preference, Structured};
