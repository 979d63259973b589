use thiserror::Error;

/// Errors that can occur during CLI command execution.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Opening or querying the match store failed
    #[error("Database error: {0}")]
    Database(String),

    /// Import or export failed
    #[error("Import error: {0}")]
    Import(String),

    /// Settings file error
    #[error("Config error: {0}")]
    Config(String),

    /// A command argument that parsed but makes no sense
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    pub(crate) fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub(crate) fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<fragmatch_db::StoreError> for CliError {
    fn from(e: fragmatch_db::StoreError) -> Self {
        Self::database(e.to_string())
    }
}

impl From<fragmatch_import::ImportError> for CliError {
    fn from(e: fragmatch_import::ImportError) -> Self {
        Self::import(e.to_string())
    }
}
