//! Structured codec and per-type adapter overrides.
//!
//! Every encode/decode consults at most one override: the one registered for
//! the exact target type. Overrides for other types are never looked at, so a
//! misbehaving adapter can only affect its own type.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    marker::PhantomData,
    sync::{Arc, PoisonError, RwLock},
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{PrefsError, Result};

/// Error type adapters may return from either direction.
pub type AdapterError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a codec engine.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(String);

impl CodecError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Pluggable engine that turns structured values into strings and back.
///
/// Malformed input must fail with a `CodecError`, never decode to a default.
pub trait StructuredCodec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> std::result::Result<String, CodecError>;
    fn decode<T: DeserializeOwned>(&self, input: &str) -> std::result::Result<T, CodecError>;
}

/// Default JSON engine. Object keys come out sorted so the stored text for a
/// given value is stable regardless of field declaration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl StructuredCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> std::result::Result<String, CodecError> {
        // Sorting comes from `serde_json::Map` being a `BTreeMap`, which holds
        // as long as the `preserve_order` feature stays off in the build.
        // Integers outside the 64-bit range cannot become a `Value` and fail
        // here as an encode error.
        let value = serde_json::to_value(value).map_err(|e| CodecError::new(e.to_string()))?;
        Ok(value.to_string())
    }

    fn decode<T: DeserializeOwned>(&self, input: &str) -> std::result::Result<T, CodecError> {
        serde_json::from_str(input).map_err(|e| CodecError::new(e.to_string()))
    }
}

/// Custom string representation for exactly one type.
pub trait PrefAdapter<T>: Send + Sync {
    fn to_pref_string(&self, value: &T) -> std::result::Result<String, AdapterError>;
    fn from_pref_string(&self, input: &str) -> std::result::Result<T, AdapterError>;
}

/// Adapter built from a pair of closures.
pub struct FnAdapter<T, E, D> {
    encode: E,
    decode: D,
    _target: PhantomData<fn() -> T>,
}

impl<T, E, D> FnAdapter<T, E, D>
where
    E: Fn(&T) -> std::result::Result<String, AdapterError> + Send + Sync,
    D: Fn(&str) -> std::result::Result<T, AdapterError> + Send + Sync,
{
    pub fn new(encode: E, decode: D) -> Self {
        Self {
            encode,
            decode,
            _target: PhantomData,
        }
    }
}

impl<T, E, D> PrefAdapter<T> for FnAdapter<T, E, D>
where
    E: Fn(&T) -> std::result::Result<String, AdapterError> + Send + Sync,
    D: Fn(&str) -> std::result::Result<T, AdapterError> + Send + Sync,
{
    fn to_pref_string(&self, value: &T) -> std::result::Result<String, AdapterError> {
        (self.encode)(value)
    }

    fn from_pref_string(&self, input: &str) -> std::result::Result<T, AdapterError> {
        (self.decode)(input)
    }
}

type SharedAdapter<T> = Arc<dyn PrefAdapter<T>>;

/// Codec engine plus the adapter override table, keyed by target type.
pub struct CodecRegistry<C = JsonCodec> {
    engine: C,
    adapters: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl CodecRegistry<JsonCodec> {
    pub fn new() -> Self {
        Self::with_engine(JsonCodec)
    }
}

impl Default for CodecRegistry<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: StructuredCodec> CodecRegistry<C> {
    pub fn with_engine(engine: C) -> Self {
        Self {
            engine,
            adapters: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &C {
        &self.engine
    }

    /// Register the override for `T`, replacing any earlier one.
    pub fn add_adapter<T: 'static>(&self, adapter: impl PrefAdapter<T> + 'static) {
        let shared: SharedAdapter<T> = Arc::new(adapter);
        // The map is never left half-updated, so a poisoned lock is still usable.
        let mut adapters = self.adapters.write().unwrap_or_else(PoisonError::into_inner);
        if adapters
            .insert(TypeId::of::<T>(), Box::new(shared))
            .is_some()
        {
            debug!(type_name = type_name::<T>(), "replaced adapter override");
        } else {
            debug!(type_name = type_name::<T>(), "registered adapter override");
        }
    }

    pub fn has_adapter<T: 'static>(&self) -> bool {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }

    fn adapter_for<T: 'static>(&self) -> Option<SharedAdapter<T>> {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<SharedAdapter<T>>())
            .cloned()
    }

    /// Encode `value` with the override for `T` if one is registered,
    /// otherwise with the engine.
    pub fn encode<T: Serialize + 'static>(&self, value: &T) -> Result<String> {
        let encoded = match self.adapter_for::<T>() {
            Some(adapter) => adapter.to_pref_string(value).map_err(|e| e.to_string()),
            None => self.engine.encode(value).map_err(|e| e.to_string()),
        };
        encoded.map_err(|reason| PrefsError::Encode {
            type_name: type_name::<T>(),
            reason,
        })
    }

    /// Decode `input` into `T`. Empty input yields `default` without touching
    /// the adapter or the engine.
    pub fn decode<T: DeserializeOwned + 'static>(&self, input: &str, default: T) -> Result<T> {
        if input.is_empty() {
            return Ok(default);
        }

        let decoded = match self.adapter_for::<T>() {
            Some(adapter) => adapter.from_pref_string(input).map_err(|e| e.to_string()),
            None => self.engine.decode(input).map_err(|e| e.to_string()),
        };
        decoded.map_err(|reason| {
            warn!(type_name = type_name::<T>(), %reason, "stored value failed to decode");
            PrefsError::Decode {
                input: input.to_string(),
                type_name: type_name::<T>(),
                reason,
            }
        })
    }
}
