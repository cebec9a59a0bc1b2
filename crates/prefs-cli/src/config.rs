use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::{config_dir, data_dir};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ALIAS: &str = "prefs-default";
pub const DEFAULT_KEYRING_SERVICE: &str = "prefs-cli";

/// User-level configuration loaded from `~/.config/prefs/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the preferences file.
    pub data_file: Option<PathBuf>,
    /// Key alias used for encrypted values.
    pub alias: Option<String>,
    /// Keyring service name keypairs are stored under.
    pub keyring_service: Option<String>,
}

impl Config {
    pub fn data_file(&self) -> Result<PathBuf> {
        match &self.data_file {
            Some(path) => Ok(path.clone()),
            None => default_data_file(),
        }
    }

    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(DEFAULT_ALIAS)
    }

    pub fn keyring_service(&self) -> &str {
        self.keyring_service
            .as_deref()
            .unwrap_or(DEFAULT_KEYRING_SERVICE)
    }

    /// Copy with every field filled in, as written by `config init`.
    pub fn resolved(&self) -> Result<Config> {
        Ok(Config {
            data_file: Some(self.data_file()?),
            alias: Some(self.alias().to_string()),
            keyring_service: Some(self.keyring_service().to_string()),
        })
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("prefs").join("config.toml"))
}

/// Resolve the default preferences file (platform aware).
pub fn default_data_file() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("prefs").join("preferences.json"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
