pub(crate) mod config;
pub(crate) mod fields;
pub(crate) mod matches;
pub(crate) mod transfer;

use fragmatch_db::MatchStore;

use crate::CliError;
use crate::settings::Settings;

/// Open the store at `db` with the history options from the settings file.
pub(crate) fn open_store(db: &str, settings: &Settings) -> Result<MatchStore, CliError> {
    MatchStore::open(db, settings.store_options())
        .map_err(|e| CliError::database(format!("Failed to open match store {}: {}", db, e)))
}
