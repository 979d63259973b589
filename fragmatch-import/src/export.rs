//! Dump a store back into the `<matches>` document format.

use std::io::Write;
use std::path::Path;

use fragmatch_db::{MatchStore, QueryParameters, StoreError};

use crate::error::ImportError;
use crate::xml::{MatchDocument, MatchRecord, write_matches};

/// Every match, ordered by id, with all non-NULL real-field values and its
/// conflicts. View fields are not exported.
pub fn document_from_store(store: &MatchStore) -> Result<MatchDocument, StoreError> {
    let fields: Vec<String> = store
        .registry()
        .real_fields()
        .map(|f| f.name.clone())
        .collect();
    let matches = store.get_matches(&QueryParameters::new().with_preload(fields.iter().cloned()))?;

    let mut doc = MatchDocument::default();
    for m in matches {
        let mut attributes = Vec::with_capacity(fields.len());
        for name in &fields {
            let value = match m.cached(name) {
                Some(value) => value,
                None => store.attribute(m.id, name)?,
            };
            if !value.is_null() {
                attributes.push((name.clone(), value.to_string()));
            }
        }
        doc.matches.push(MatchRecord {
            id: Some(m.id),
            conflicts: store.conflicts(m.id)?,
            source: m.source,
            target: m.target,
            transform: m.transform,
            attributes,
        });
    }
    Ok(doc)
}

/// Write every match in the store as a document. Returns the number of
/// matches written.
pub fn export_matches<W: Write>(store: &MatchStore, writer: W) -> Result<usize, ImportError> {
    let doc = document_from_store(store)?;
    write_matches(writer, &doc)?;
    Ok(doc.len())
}

/// Export to a file, replacing it if it exists.
pub fn export_file(store: &MatchStore, path: &Path) -> Result<usize, ImportError> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    let count = export_matches(store, &mut writer)?;
    writer.flush()?;
    log::info!("Exported {count} matches to {}", path.display());
    Ok(count)
}
