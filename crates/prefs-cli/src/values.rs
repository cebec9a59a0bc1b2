use color_eyre::{eyre::WrapErr, Result};
use prefs_core::{keys::KeyFacility, storage::PreferenceStore};
use prefs_helper::{PreferencesHelper, Structured, SyncMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cli::ValueKind;

/// Free-form JSON value, stored through the structured codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonDocument(pub Value);

impl Structured for JsonDocument {}

/// Read `key` as `kind` and render it for display.
pub fn read<S, F>(prefs: &PreferencesHelper<S, F>, key: &str, kind: ValueKind) -> Result<String>
where
    S: PreferenceStore,
    F: KeyFacility,
{
    let rendered = match kind {
        ValueKind::Long => prefs.get::<i64>(key, None)?.to_string(),
        ValueKind::Int => prefs.get::<i32>(key, None)?.to_string(),
        ValueKind::Bool => prefs.get::<bool>(key, None)?.to_string(),
        ValueKind::String => prefs.get::<String>(key, None)?,
        ValueKind::Json => prefs.get(key, Some(JsonDocument(Value::Null)))?.0.to_string(),
    };
    Ok(rendered)
}

/// Parse `raw` as `kind` and store it under `key`.
pub fn write<S, F>(
    prefs: &PreferencesHelper<S, F>,
    key: &str,
    raw: &str,
    kind: ValueKind,
    mode: SyncMode,
) -> Result<()>
where
    S: PreferenceStore,
    F: KeyFacility,
{
    let invalid = || format!("`{raw}` is not a valid {kind:?} value");
    match kind {
        ValueKind::Long => {
            let value: i64 = raw.parse().wrap_err_with(invalid)?;
            prefs.set_with_mode(key, &value, mode)?;
        }
        ValueKind::Int => {
            let value: i32 = raw.parse().wrap_err_with(invalid)?;
            prefs.set_with_mode(key, &value, mode)?;
        }
        ValueKind::Bool => {
            let value: bool = raw.parse().wrap_err_with(invalid)?;
            prefs.set_with_mode(key, &value, mode)?;
        }
        ValueKind::String => prefs.set_with_mode(key, &raw.to_string(), mode)?,
        ValueKind::Json => {
            let value: Value = serde_json::from_str(raw).wrap_err_with(invalid)?;
            prefs.set_with_mode(key, &JsonDocument(value), mode)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use prefs_core::storage::InMemoryPreferenceStore;
    use prefs_storage::key_facility::InMemoryKeyFacility;

    use super::*;

    fn prefs() -> PreferencesHelper<InMemoryPreferenceStore, InMemoryKeyFacility> {
        PreferencesHelper::new(InMemoryPreferenceStore::new(), InMemoryKeyFacility::new())
    }

    #[test]
    fn writes_and_reads_every_kind() {
        let prefs = prefs();
        let cases = [
            ("limit", "6942069", ValueKind::Long),
            ("port", "451", ValueKind::Int),
            ("enabled", "true", ValueKind::Bool),
            ("greeting", "hello there", ValueKind::String),
        ];
        for (key, raw, kind) in cases {
            write(&prefs, key, raw, kind, SyncMode::Apply).expect("write");
            assert_eq!(read(&prefs, key, kind).expect("read"), raw);
        }
    }

    #[test]
    fn json_values_are_stored_canonically() {
        let prefs = prefs();
        write(
            &prefs,
            "profile",
            r#"{ "name": "Bilbo", "age": 111 }"#,
            ValueKind::Json,
            SyncMode::Commit,
        )
        .expect("write");

        assert_eq!(
            prefs.store().get_string("profile", "").unwrap(),
            r#"{"age":111,"name":"Bilbo"}"#
        );
        assert_eq!(
            read(&prefs, "profile", ValueKind::Json).expect("read"),
            r#"{"age":111,"name":"Bilbo"}"#
        );
        assert_eq!(read(&prefs, "missing", ValueKind::Json).expect("read"), "null");
    }

    #[test]
    fn unparsable_value_is_rejected_before_writing() {
        let prefs = prefs();
        let err = write(&prefs, "limit", "lots", ValueKind::Long, SyncMode::Apply)
            .expect_err("should fail");
        assert!(err.to_string().contains("not a valid Long value"));
        assert!(!prefs.contains("limit").unwrap());
    }

    #[test]
    fn reading_with_the_wrong_kind_fails() {
        let prefs = prefs();
        write(&prefs, "port", "451", ValueKind::Int, SyncMode::Apply).expect("write");
        assert!(read(&prefs, "port", ValueKind::Bool).is_err());
    }
}
