use std::path::Path;

use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use fragmatch_db::{ConnectionDescriptor, ConnectionManager, MatchStore, schema};
use fragmatch_import::{ImportOptions, LogProgress};

use crate::CliError;
use crate::settings::Settings;

use super::open_store;

/// Create (or check) the store, optionally from a custom DDL file.
pub(crate) fn run_init(db: &str, schema_file: Option<&Path>) -> Result<(), CliError> {
    let descriptor = ConnectionDescriptor::parse(db)
        .map_err(|e| CliError::invalid_argument(format!("{}: {}", db, e)))?;

    let bootstrap = match schema_file {
        Some(path) => Some(
            schema::bootstrap_from_file(path)
                .map_err(|e| CliError::database(format!("{}: {}", path.display(), e)))?,
        ),
        None => None,
    };

    let conn = ConnectionManager::global()
        .open_with_bootstrap(&descriptor, bootstrap.as_deref())
        .map_err(|e| CliError::database(format!("Failed to open {}: {}", db, e)))?;
    let store = MatchStore::new(conn, Default::default())?;

    log::info!(
        "{} {}",
        "Store ready:".if_supports_color(Stdout, |t| t.green()),
        store.connection().key(),
    );
    log::info!("  Fields:  {}", store.registry().len());
    Ok(())
}

pub(crate) fn run_import(
    db: &str,
    settings: &Settings,
    file: &Path,
    history: bool,
) -> Result<(), CliError> {
    let mut store = open_store(db, settings)?;
    let options = ImportOptions {
        record_history: history,
    };

    log::info!(
        "Importing {}",
        file.display().if_supports_color(Stdout, |t| t.cyan()),
    );
    let stats = fragmatch_import::import_file(&mut store, file, &options, &LogProgress)?;

    crate::log_blank();
    log::info!(
        "{}",
        "Import complete".if_supports_color(Stdout, |t| t.bold()),
    );
    log::info!("  Matches in file:   {:>8}", stats.total_matches);
    log::info!("  Created:           {:>8}", stats.matches_created);
    log::info!("  Updated:           {:>8}", stats.matches_updated);
    log::info!("  Fields created:    {:>8}", stats.fields_created);
    log::info!("  Values written:    {:>8}", stats.values_written);
    log::info!(
        "  Conflicts:         {:>8} new, {} existing",
        stats.conflicts_created,
        stats.conflicts_existing,
    );
    if stats.conflicts_dangling > 0 {
        log::warn!(
            "{} conflict references pointed at unknown matches and were skipped",
            stats.conflicts_dangling,
        );
    }
    Ok(())
}

pub(crate) fn run_export(db: &str, settings: &Settings, file: &Path) -> Result<(), CliError> {
    let store = open_store(db, settings)?;
    let written = fragmatch_import::export_file(&store, file)?;
    log::info!(
        "{} {} matches to {}",
        "Exported".if_supports_color(Stdout, |t| t.green()),
        written,
        file.display(),
    );
    Ok(())
}
