//! Entity-attribute-value persistence for fragment matches.
//!
//! Matches live in one core table; every attribute is a table (or view) of
//! its own keyed by match id, created at runtime. Queries join only the
//! attribute tables they need and can page by keyset instead of offset.
//! SQLite is the executable backend (via rusqlite with the bundled
//! feature); MySQL and PostgreSQL are available as SQL rendering profiles.

pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod events;
pub mod filter;
pub mod query;
pub mod schema;
pub mod store;
pub mod transform;
pub mod value;

pub use config::StoreOptions;
pub use connection::{ConnectionDescriptor, ConnectionManager, SharedConnection};
pub use dialect::{Capabilities, Dialect};
pub use error::{ConnectionError, QueryError, SchemaError, StoreError};
pub use events::{LogObserver, StoreEvent, StoreObserver};
pub use filter::Filter;
pub use query::{
    Direction, Keyset, LoadedRow, Pager, Pagination, QueryParameters, QuerySynthesizer,
    SelectStatement, SortOrder,
};
pub use schema::{Field, FieldKind, SchemaRegistry};
pub use store::{AttributeCache, HistoryRecord, Match, MatchStore, QueryStats};
pub use transform::{Transform, TransformError};
pub use value::{Value, ValueType};
