//! Bulk import and export of match documents.
//!
//! This crate owns the XML document format: parsing `<matches>` files,
//! applying them to a [`MatchStore`](fragmatch_db::MatchStore) in one batch,
//! and writing a store back out.

pub mod error;
pub mod export;
pub mod import;
pub mod progress;
pub mod xml;

pub use error::ImportError;
pub use export::{document_from_store, export_file, export_matches};
pub use import::{ImportOptions, ImportStats, STANDARD_FIELDS, import_file, import_matches};
pub use progress::{ImportProgress, LogProgress, SilentProgress};
pub use xml::{MatchDocument, MatchRecord, parse_matches, parse_matches_file, write_matches};
