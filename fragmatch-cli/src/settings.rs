//! Settings file (`~/.config/fragmatch/settings.toml`) and store location
//! resolution.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::CliError;

/// Store used when neither `--db` nor the settings file name one.
pub(crate) const DEFAULT_DATABASE: &str = "fragmatch.db";

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub database: DatabaseSettings,
    pub history: HistorySettings,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct DatabaseSettings {
    /// Connection URL or SQLite file path.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct HistorySettings {
    pub enabled: bool,
    /// Recorded as the author of every write.
    pub user: Option<String>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        HistorySettings {
            enabled: true,
            user: None,
        }
    }
}

/// Canonical path to the settings file: `~/.config/fragmatch/settings.toml`.
pub(crate) fn settings_path() -> PathBuf {
    let config = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config.join("fragmatch").join("settings.toml")
}

impl Settings {
    /// Load the settings file. A missing file gives the defaults; a file that
    /// does not parse is an error.
    pub(crate) fn load() -> Result<Settings, CliError> {
        let path = settings_path();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&contents)
            .map_err(|e| CliError::config(format!("{}: {}", path.display(), e)))
    }

    /// Resolve the store location:
    ///
    /// 1. `--db` (if given)
    /// 2. `database.url` in `settings.toml`
    /// 3. `fragmatch.db` in the current directory
    pub(crate) fn database_url(&self, cli_override: Option<&str>) -> String {
        cli_override
            .map(str::to_string)
            .or_else(|| self.database.url.clone().filter(|url| !url.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
    }

    pub(crate) fn store_options(&self) -> fragmatch_db::StoreOptions {
        let options = fragmatch_db::StoreOptions::new().history(self.history.enabled);
        match &self.history.user {
            Some(user) => options.user(user.clone()),
            None => options,
        }
    }

    pub(crate) fn to_toml(&self) -> Result<String, CliError> {
        toml::to_string_pretty(self).map_err(|e| CliError::config(e.to_string()))
    }
}
