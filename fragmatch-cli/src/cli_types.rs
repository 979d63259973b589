//! CLI type definitions: command enums and argument structs.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use fragmatch_db::ValueType;

#[derive(Parser)]
#[command(name = "fragmatch")]
#[command(about = "Curate pairwise fragment matches and their attributes", long_about = None)]
pub(crate) struct Cli {
    /// Match store URL or SQLite file (defaults to settings, then ./fragmatch.db)
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Only show warnings and errors (suppress normal output)
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Enable verbose/debug logging (timestamps + debug-level messages, rendered SQL)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Filter clauses shared by `list` and `count`.
#[derive(Args, Clone, Default)]
pub(crate) struct FilterArgs {
    /// SQL boolean clause over field names (repeatable; clauses are AND-ed)
    #[arg(short, long = "filter", value_name = "SQL")]
    pub filters: Vec<String>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Create an empty store (or check an existing one)
    Init {
        /// Bootstrap an empty database from this DDL file instead of the built-in schema
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Import a <matches> XML document
    Import {
        file: PathBuf,

        /// Record history entries for imported values
        #[arg(long)]
        history: bool,
    },

    /// Export every match to a <matches> XML document
    Export { file: PathBuf },

    /// Manage attribute fields
    Fields {
        #[command(subcommand)]
        action: FieldsAction,
    },

    /// List matches
    List {
        /// Field to sort by (ties broken by id)
        #[arg(short, long)]
        sort: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        #[command(flatten)]
        filter: FilterArgs,

        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Maximum rows to show
        #[arg(short, long, default_value_t = 50)]
        limit: u64,

        /// Fields to show as columns (e.g., error,status)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Show one match with every field value and its conflicts
    Show { id: i64 },

    /// Set a field value on a match
    Set {
        id: i64,
        field: String,
        /// New value (empty string for NULL)
        value: String,
    },

    /// Show the write history of one field on a match
    History { id: i64, field: String },

    /// Count matches
    Count {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Inspect the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum FieldsAction {
    /// List fields with their kind and type
    List,

    /// Add a real (table-backed) field; existing matches get the default
    AddReal {
        name: String,

        /// text, real or integer
        value_type: ValueType,

        /// Default value for existing and future matches
        #[arg(long)]
        default: Option<String>,
    },

    /// Add a view field computed by a SELECT exposing `id` and a column named after the field
    AddView { name: String, select: String },

    /// Remove a field and its history
    Remove { name: String },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show the settings in effect
    Show,

    /// Print the settings file path
    Path,
}
