use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by preference store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The key holds a value of a different primitive kind than requested.
    #[error("value for key {key} is a {found}, not a {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Values the underlying store holds natively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PrefValue {
    Long(i64),
    Int(i32),
    Bool(bool),
    String(String),
}

impl PrefValue {
    /// Short name of the stored kind, used in mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PrefValue::Long(_) => "long",
            PrefValue::Int(_) => "int",
            PrefValue::Bool(_) => "bool",
            PrefValue::String(_) => "string",
        }
    }
}

/// How a write is handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fire-and-forget: visible to readers immediately, durable eventually.
    #[default]
    Apply,
    /// Returns only once the write is durable.
    Commit,
}

/// Contract for the string/primitive key-value store the typed layer sits on.
///
/// Implementations only need `read` and `write`; the typed getters and
/// pending-write builders are provided on top of them.
pub trait PreferenceStore: Send + Sync {
    /// Raw lookup of the value stored under `key`.
    fn read(&self, key: &str) -> Result<Option<PrefValue>, StoreError>;

    /// Store `value` under `key`, overwriting any existing entry.
    fn write(&self, key: &str, value: PrefValue, mode: SyncMode) -> Result<(), StoreError>;

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.read(key)?.is_some())
    }

    fn get_string(&self, key: &str, fallback: &str) -> Result<String, StoreError> {
        match self.read(key)? {
            None => Ok(fallback.to_string()),
            Some(PrefValue::String(value)) => Ok(value),
            Some(other) => Err(mismatch(key, "string", &other)),
        }
    }

    fn get_int(&self, key: &str, fallback: i32) -> Result<i32, StoreError> {
        match self.read(key)? {
            None => Ok(fallback),
            Some(PrefValue::Int(value)) => Ok(value),
            Some(other) => Err(mismatch(key, "int", &other)),
        }
    }

    fn get_long(&self, key: &str, fallback: i64) -> Result<i64, StoreError> {
        match self.read(key)? {
            None => Ok(fallback),
            Some(PrefValue::Long(value)) => Ok(value),
            Some(other) => Err(mismatch(key, "long", &other)),
        }
    }

    fn get_bool(&self, key: &str, fallback: bool) -> Result<bool, StoreError> {
        match self.read(key)? {
            None => Ok(fallback),
            Some(PrefValue::Bool(value)) => Ok(value),
            Some(other) => Err(mismatch(key, "bool", &other)),
        }
    }

    fn set_string(&self, key: &str, value: impl Into<String>) -> PendingWrite<'_>
    where
        Self: Sized,
    {
        PendingWrite::new(self, key, PrefValue::String(value.into()))
    }

    fn set_int(&self, key: &str, value: i32) -> PendingWrite<'_>
    where
        Self: Sized,
    {
        PendingWrite::new(self, key, PrefValue::Int(value))
    }

    fn set_long(&self, key: &str, value: i64) -> PendingWrite<'_>
    where
        Self: Sized,
    {
        PendingWrite::new(self, key, PrefValue::Long(value))
    }

    fn set_bool(&self, key: &str, value: bool) -> PendingWrite<'_>
    where
        Self: Sized,
    {
        PendingWrite::new(self, key, PrefValue::Bool(value))
    }
}

fn mismatch(key: &str, expected: &'static str, found: &PrefValue) -> StoreError {
    StoreError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.kind_name(),
    }
}

/// A staged write that is not visible until applied or committed.
#[must_use = "a pending write does nothing until applied or committed"]
pub struct PendingWrite<'a> {
    store: &'a dyn PreferenceStore,
    key: String,
    value: PrefValue,
}

impl<'a> PendingWrite<'a> {
    pub fn new(store: &'a dyn PreferenceStore, key: impl Into<String>, value: PrefValue) -> Self {
        Self {
            store,
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &PrefValue {
        &self.value
    }

    /// Hand the write over without waiting for durability.
    pub fn apply(self) -> Result<(), StoreError> {
        self.finish(SyncMode::Apply)
    }

    /// Block until the write is durable.
    pub fn commit(self) -> Result<(), StoreError> {
        self.finish(SyncMode::Commit)
    }

    pub fn finish(self, mode: SyncMode) -> Result<(), StoreError> {
        self.store.write(&self.key, self.value, mode)
    }
}

impl fmt::Debug for PendingWrite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWrite")
            .field("key", &self.key)
            .field("kind", &self.value.kind_name())
            .finish()
    }
}

/// In-memory preference store for tests and smoke runs. Both sync modes are
/// immediate since there is nothing to make durable.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPreferenceStore {
    inner: Arc<Mutex<HashMap<String, PrefValue>>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn read(&self, key: &str) -> Result<Option<PrefValue>, StoreError> {
        let map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(map.get(key).cloned())
    }

    fn write(&self, key: &str, value: PrefValue, _mode: SyncMode) -> Result<(), StoreError> {
        let mut map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.insert(key.to_string(), value);
        Ok(())
    }
}
