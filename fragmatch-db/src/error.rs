//! Error types for the match store.

use thiserror::Error;

use crate::dialect::Dialect;
use crate::transform::TransformError;

/// Failure to open, probe or bootstrap a backend connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid connection descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },
    #[error("No driver available for {0} backends")]
    DriverUnavailable(Dialect),
    #[error("Bootstrap statement failed: {statement}: {source}")]
    Bootstrap {
        statement: String,
        source: rusqlite::Error,
    },
}

impl ConnectionError {
    pub fn invalid_descriptor(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }
}

/// Structural problems with the attribute schema. Recoverable; the caller decides.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid field name '{0}'")]
    InvalidName(String),
    #[error("Field '{name}' collides with existing field '{existing}'")]
    Collision { name: String, existing: String },
    #[error("Unknown field '{0}'")]
    UnknownField(String),
    #[error("View '{0}' must expose an 'id' column and a column named after the view")]
    InvalidView(String),
    #[error("Field '{0}' is a view and cannot be written")]
    ReadOnlyField(String),
    #[error("Match id {0} already exists")]
    DuplicateId(i64),
    #[error("{dialect} connection lacks the '{capability}' capability")]
    MissingCapability {
        capability: &'static str,
        dialect: Dialect,
    },
}

/// A statement the backend rejected, or a query that cannot be rendered.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query failed: {source}\n  statement: {sql}")]
    Backend { sql: String, source: rusqlite::Error },
    #[error("Keyset pagination requires a sort field")]
    KeysetWithoutSort,
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),
}

impl QueryError {
    pub fn backend(sql: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Backend {
            sql: sql.into(),
            source,
        }
    }
}

/// Umbrella error returned by [`MatchStore`](crate::MatchStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Match {0} not found")]
    MatchNotFound(i64),
    #[error("Invalid transform on match {id}: {source}")]
    Transform { id: i64, source: TransformError },
}
