use std::path::Path;

use crate::config::Config;
use color_eyre::Result;
use prefs_helper::PreferencesHelper;
use prefs_storage::{
    file_store::FilePreferenceStore,
    key_facility::{InMemoryKeyFacility, KeyringFacility},
};
use tracing::debug;

pub type CliPreferences = PreferencesHelper<FilePreferenceStore, KeyringFacility>;
pub type ScratchPreferences = PreferencesHelper<FilePreferenceStore, InMemoryKeyFacility>;

/// Build the preferences helper for the configured file, backed by the OS keychain.
pub fn helper_from_config(config: &Config) -> Result<CliPreferences> {
    let path = config.data_file()?;
    debug!(?path, "opening preferences file");
    let store = FilePreferenceStore::open(path)?;
    let prefs = PreferencesHelper::new(store, KeyringFacility::new(config.keyring_service()));
    prefs.set_alias(config.alias())?;
    Ok(prefs)
}

/// Helper rooted at `dir` whose keys never leave the process.
pub fn scratch_helper(dir: &Path, alias: &str) -> Result<ScratchPreferences> {
    let store = FilePreferenceStore::open(dir.join("preferences.json"))?;
    let prefs = PreferencesHelper::new(store, InMemoryKeyFacility::new());
    prefs.set_alias(alias)?;
    Ok(prefs)
}
