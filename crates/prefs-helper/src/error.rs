use prefs_core::{keys::KeyFacilityError, storage::StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unable to decode {input:?} into {type_name}: {reason}")]
    Decode {
        input: String,
        type_name: &'static str,
        reason: String,
    },

    #[error("unable to encode {type_name}: {reason}")]
    Encode {
        type_name: &'static str,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("key facility error: {0}")]
    KeyFacility(#[from] KeyFacilityError),

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PrefsError>;

pub(crate) fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(PrefsError::InvalidArgument(
            "preference key must not be empty".to_string(),
        ));
    }
    Ok(())
}
