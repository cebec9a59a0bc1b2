//! Type classification for preference values.
//!
//! Exactly four Rust types take the primitive fast path: `i64`, `i32`, `bool`
//! and `String`. Everything else opts in through [`Structured`] and is always
//! stored as a codec-encoded string, even when it wraps a primitive.

use prefs_core::storage::{PrefValue, PreferenceStore};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    codec::{CodecRegistry, StructuredCodec},
    error::{PrefsError, Result},
};

/// How a type is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefKind {
    Long,
    Int,
    Bool,
    String,
    Structured,
}

/// Marker for types persisted through the structured codec.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Profile { name: String, age: i32 }
/// impl Structured for Profile {}
/// ```
pub trait Structured: Serialize + DeserializeOwned + Send + 'static {}

/// A type the typed store knows how to read and write.
pub trait Preference: Sized + 'static {
    const KIND: PrefKind;

    /// Read the value stored under `key`, falling back to `default`.
    fn read<C: StructuredCodec>(
        store: &dyn PreferenceStore,
        codec: &CodecRegistry<C>,
        key: &str,
        default: Option<Self>,
    ) -> Result<Self>;

    /// Convert into the value handed to the underlying store.
    fn to_stored<C: StructuredCodec>(&self, codec: &CodecRegistry<C>) -> Result<PrefValue>;
}

macro_rules! primitive_preference {
    ($ty:ty, $kind:ident, $getter:ident, $zero:expr) => {
        impl Preference for $ty {
            const KIND: PrefKind = PrefKind::$kind;

            fn read<C: StructuredCodec>(
                store: &dyn PreferenceStore,
                _codec: &CodecRegistry<C>,
                key: &str,
                default: Option<Self>,
            ) -> Result<Self> {
                Ok(store.$getter(key, default.unwrap_or($zero))?)
            }

            fn to_stored<C: StructuredCodec>(&self, _codec: &CodecRegistry<C>) -> Result<PrefValue> {
                Ok(PrefValue::$kind(*self))
            }
        }
    };
}

primitive_preference!(i64, Long, get_long, 0);
primitive_preference!(i32, Int, get_int, 0);
primitive_preference!(bool, Bool, get_bool, false);

impl Preference for String {
    const KIND: PrefKind = PrefKind::String;

    fn read<C: StructuredCodec>(
        store: &dyn PreferenceStore,
        _codec: &CodecRegistry<C>,
        key: &str,
        default: Option<Self>,
    ) -> Result<Self> {
        Ok(store.get_string(key, default.as_deref().unwrap_or(""))?)
    }

    fn to_stored<C: StructuredCodec>(&self, _codec: &CodecRegistry<C>) -> Result<PrefValue> {
        Ok(PrefValue::String(self.clone()))
    }
}

impl<T: Structured> Preference for T {
    const KIND: PrefKind = PrefKind::Structured;

    fn read<C: StructuredCodec>(
        store: &dyn PreferenceStore,
        codec: &CodecRegistry<C>,
        key: &str,
        default: Option<Self>,
    ) -> Result<Self> {
        // There is no zero value for an arbitrary type.
        let default = default.ok_or_else(|| {
            PrefsError::InvalidArgument(format!(
                "reading {} requires a default value",
                std::any::type_name::<T>()
            ))
        })?;
        let raw = store.get_string(key, "")?;
        codec.decode(&raw, default)
    }

    fn to_stored<C: StructuredCodec>(&self, codec: &CodecRegistry<C>) -> Result<PrefValue> {
        Ok(PrefValue::String(codec.encode(self)?))
    }
}
