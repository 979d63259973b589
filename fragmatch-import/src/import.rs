//! Apply a match document to a store.
//!
//! The whole document is applied inside one store batch: either every match,
//! field and conflict lands, or nothing does. A `<match>` whose explicit id
//! already exists updates that match (fragments, transform and the
//! attributes the element carries) instead of creating a new one, so
//! importing the same document twice leaves the store as the first import
//! did.

use std::path::Path;

use fragmatch_db::{MatchStore, StoreError, Value, ValueType};

use crate::error::ImportError;
use crate::progress::ImportProgress;
use crate::xml::{MatchDocument, parse_matches_file};

/// Attributes every match store is expected to carry, with their type and
/// the default for matches that never had them set.
pub const STANDARD_FIELDS: &[(&str, ValueType, &str)] = &[
    ("status", ValueType::Text, "unknown"),
    ("overlap", ValueType::Real, ""),
    ("error", ValueType::Real, ""),
    ("volume", ValueType::Real, ""),
    ("old_volume", ValueType::Real, ""),
];

/// Options for a single import.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Append history records for imported attribute values.
    pub record_history: bool,
}

/// Statistics from a single import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub total_matches: u64,
    pub matches_created: u64,
    pub matches_updated: u64,
    pub fields_created: u64,
    pub values_written: u64,
    pub conflicts_created: u64,
    pub conflicts_existing: u64,
    /// Conflicts naming a match id that is in neither the document nor the store.
    pub conflicts_dangling: u64,
}

/// Import a parsed document.
pub fn import_matches(
    store: &mut MatchStore,
    doc: &MatchDocument,
    options: &ImportOptions,
    progress: &dyn ImportProgress,
) -> Result<ImportStats, ImportError> {
    let history = store.options().history_enabled;
    store.set_history_enabled(history && options.record_history);
    let result = store.batch(|s| apply(s, doc, progress));
    store.set_history_enabled(history);

    let stats = result?;
    progress.on_complete(&format!(
        "Imported {} matches ({} new, {} updated), {} new fields, {} new conflicts",
        stats.total_matches,
        stats.matches_created,
        stats.matches_updated,
        stats.fields_created,
        stats.conflicts_created,
    ));
    Ok(stats)
}

/// Parse and import a document file.
pub fn import_file(
    store: &mut MatchStore,
    path: &Path,
    options: &ImportOptions,
    progress: &dyn ImportProgress,
) -> Result<ImportStats, ImportError> {
    progress.on_phase(&format!("Reading {}", path.display()));
    let doc = parse_matches_file(path)?;
    import_matches(store, &doc, options, progress)
}

fn apply(
    store: &mut MatchStore,
    doc: &MatchDocument,
    progress: &dyn ImportProgress,
) -> Result<ImportStats, StoreError> {
    let mut stats = ImportStats {
        total_matches: doc.len() as u64,
        ..Default::default()
    };

    progress.on_phase("Creating fields");
    stats.fields_created = ensure_fields(store, doc)?;

    progress.on_phase(&format!("Importing {} matches", doc.len()));
    let mut ids = Vec::with_capacity(doc.len());
    for (i, record) in doc.matches.iter().enumerate() {
        let id = match record.id {
            Some(id) if store.contains(id)? => {
                store.update_match(id, &record.source, &record.target, &record.transform)?;
                stats.matches_updated += 1;
                id
            }
            id => {
                let created = store.add_match(&record.source, &record.target, &record.transform, id)?;
                stats.matches_created += 1;
                created.id
            }
        };

        for (name, raw) in &record.attributes {
            let value_type = store.registry().resolve(name)?.value_type;
            store.set_attribute(id, name, Value::parse_as(raw, value_type))?;
            stats.values_written += 1;
        }

        ids.push(id);
        progress.on_match(i + 1, doc.len(), id);
    }

    progress.on_phase("Recording conflicts");
    for (record, &id) in doc.matches.iter().zip(&ids) {
        for &other in &record.conflicts {
            match store.add_conflict(id, other) {
                Ok(true) => stats.conflicts_created += 1,
                Ok(false) => stats.conflicts_existing += 1,
                Err(StoreError::MatchNotFound(missing)) => {
                    log::warn!("Match {id} lists conflict with unknown match {missing}");
                    stats.conflicts_dangling += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(stats)
}

/// Create the standard fields and any attribute the document uses that the
/// store does not know yet. Returns the number of fields created.
fn ensure_fields(store: &mut MatchStore, doc: &MatchDocument) -> Result<u64, StoreError> {
    let mut created = 0;

    for &(name, value_type, default) in STANDARD_FIELDS {
        if !store.registry().contains(name) {
            store.add_real_field(name, value_type, Value::parse_as(default, value_type))?;
            created += 1;
        }
    }

    for name in doc.attribute_names() {
        if store.registry().contains(name) {
            continue;
        }
        let value_type = infer_type(doc, name);
        log::info!("Creating field '{name}' ({value_type}) from document");
        store.add_real_field(name, value_type, Value::Null)?;
        created += 1;
    }

    Ok(created)
}

/// Type of the first non-empty value of `name`; text if there is none.
fn infer_type(doc: &MatchDocument, name: &str) -> ValueType {
    doc.matches
        .iter()
        .filter_map(|record| record.attribute(name))
        .find_map(|raw| Value::infer(raw).value_type())
        .unwrap_or(ValueType::Text)
}
