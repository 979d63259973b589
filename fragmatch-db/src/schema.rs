//! Schema bootstrap and the attribute field registry.
//!
//! Every real field `f` is backed by a table `f(id, f)` keyed by match id and
//! a history table `f_history(id, user_id, timestamp, f)`. View fields are
//! backend views exposing `(id, v)`. The registry is an in-memory mirror of
//! what introspection finds; it is rebuilt on open and after every
//! structural change, never patched by hand.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::Connection;

use crate::dialect::Dialect;
use crate::error::{ConnectionError, SchemaError};
use crate::value::{Value, ValueType};

/// Current schema version. Increment when adding migrations.
pub const CURRENT_VERSION: i32 = 1;

pub const MATCHES_TABLE: &str = "matches";
pub const CONFLICTS_TABLE: &str = "conflicts";
const RESERVED: &[&str] = &[MATCHES_TABLE, CONFLICTS_TABLE, "schema_version"];
const HISTORY_SUFFIX: &str = "_history";

// ── Bootstrap ───────────────────────────────────────────────────────────────

/// The built-in schema for an empty backend.
pub fn default_bootstrap(dialect: Dialect) -> String {
    let auto = dialect.auto_increment_key();
    let key = dialect.key_type();
    format!(
        r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- One row per proposed fragment correspondence
CREATE TABLE IF NOT EXISTS matches (
    id {auto},
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    transform TEXT NOT NULL
);

-- Undirected conflicts between matches, stored with match_id < other_id
CREATE TABLE IF NOT EXISTS conflicts (
    match_id {key} NOT NULL REFERENCES matches(id),
    other_id {key} NOT NULL REFERENCES matches(id),
    PRIMARY KEY (match_id, other_id)
);
CREATE INDEX idx_conflicts_other ON conflicts(other_id);

INSERT INTO schema_version (version) VALUES ({CURRENT_VERSION});
"#
    )
}

/// Read a bootstrap file (semicolon-separated DDL).
pub fn bootstrap_from_file(path: &Path) -> Result<String, ConnectionError> {
    Ok(std::fs::read_to_string(path)?)
}

/// Split a script into statements on `;`, ignoring semicolons inside quotes
/// and comments. Comments are dropped; empty statements are skipped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                current.push(c);
                i += 1;
                while i < chars.len() {
                    current.push(chars[i]);
                    i += 1;
                    if chars[i - 1] == c {
                        if chars.get(i) == Some(&c) {
                            current.push(c);
                            i += 1;
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            ';' => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Execute a bootstrap script in one transaction.
pub fn run_bootstrap(conn: &Connection, sql: &str) -> Result<(), ConnectionError> {
    let tx = conn.unchecked_transaction()?;
    for statement in split_statements(sql) {
        log::debug!("bootstrap: {statement}");
        tx.execute_batch(&statement)
            .map_err(|source| ConnectionError::Bootstrap {
                statement: statement.clone(),
                source,
            })?;
    }
    tx.commit()?;
    Ok(())
}

/// Whether the backend already carries a recognizable store schema.
pub fn has_schema(conn: &Connection, dialect: Dialect) -> rusqlite::Result<bool> {
    Ok(list_relations(conn, dialect)?
        .iter()
        .any(|(name, is_view)| !is_view && name.eq_ignore_ascii_case(MATCHES_TABLE)))
}

/// `(name, is_view)` for every user relation.
fn list_relations(conn: &Connection, dialect: Dialect) -> rusqlite::Result<Vec<(String, bool)>> {
    let mut stmt = conn.prepare(dialect.introspection_query())?;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(0)?;
        let kind: String = row.get(1)?;
        Ok((name, kind.to_ascii_lowercase().contains("view")))
    })?;
    rows.collect()
}

struct Column {
    name: String,
    declared: String,
    default: Option<String>,
}

fn list_columns(conn: &Connection, dialect: Dialect, relation: &str) -> rusqlite::Result<Vec<Column>> {
    let mut stmt = conn.prepare(&dialect.column_query())?;
    let rows = stmt.query_map([relation], |row| {
        Ok(Column {
            name: row.get(0)?,
            declared: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            default: row.get(2)?,
        })
    })?;
    rows.collect()
}

// ── Fields ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Backed by a writable table.
    Real,
    /// Backed by a computed view; read-only.
    View,
}

/// A registered attribute field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub value_type: ValueType,
    /// Value given to matches that never had this field written.
    pub default: Value,
}

impl Field {
    pub fn is_real(&self) -> bool {
        self.kind == FieldKind::Real
    }

    pub fn history_table(&self) -> String {
        format!("{}{HISTORY_SUFFIX}", self.name)
    }
}

/// Plain identifier, not reserved, not shaped like a history table.
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
        && !name.to_ascii_lowercase().ends_with(HISTORY_SUFFIX)
}

/// In-memory mirror of the backend's attribute fields, keyed case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    fields: BTreeMap<String, Field>,
}

impl SchemaRegistry {
    /// Rebuild the mirror from backend introspection.
    pub fn load(conn: &Connection, dialect: Dialect) -> rusqlite::Result<Self> {
        let mut fields = BTreeMap::new();
        for (name, is_view) in list_relations(conn, dialect)? {
            if !is_valid_field_name(&name) {
                continue;
            }
            let columns = list_columns(conn, dialect, &name)?;
            let has_id = columns.iter().any(|c| c.name.eq_ignore_ascii_case("id"));
            let Some(value_column) = columns.iter().find(|c| c.name.eq_ignore_ascii_case(&name))
            else {
                log::debug!("Ignoring relation '{name}': no column named after it");
                continue;
            };
            if !has_id {
                log::debug!("Ignoring relation '{name}': no id column");
                continue;
            }

            let value_type = ValueType::from_declared(&value_column.declared);
            let (kind, default) = if is_view {
                (FieldKind::View, Value::Null)
            } else {
                (
                    FieldKind::Real,
                    Value::from_sql_literal(value_column.default.as_deref(), value_type),
                )
            };
            fields.insert(
                name.to_ascii_lowercase(),
                Field {
                    name,
                    kind,
                    value_type,
                    default,
                },
            );
        }
        Ok(SchemaRegistry { fields })
    }

    /// Names of every field.
    pub fn fields(&self) -> BTreeSet<String> {
        self.fields.values().map(|f| f.name.clone()).collect()
    }

    /// Field names in case-insensitive order.
    pub fn names(&self) -> Vec<String> {
        self.fields.values().map(|f| f.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn real_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| f.is_real())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn is_real_field(&self, name: &str) -> bool {
        self.field(name).is_some_and(Field::is_real)
    }

    /// Look up a field, failing with `UnknownField`.
    pub fn resolve(&self, name: &str) -> Result<&Field, SchemaError> {
        self.field(name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))
    }

    /// Check that `name` may be used for a new field.
    pub fn check_new_name(&self, name: &str) -> Result<(), SchemaError> {
        if !is_valid_field_name(name) {
            return Err(SchemaError::InvalidName(name.to_string()));
        }
        if let Some(existing) = self.field(name) {
            return Err(SchemaError::Collision {
                name: name.to_string(),
                existing: existing.name.clone(),
            });
        }
        Ok(())
    }

    fn reload(&mut self, conn: &Connection, dialect: Dialect) -> Result<(), SchemaError> {
        *self = SchemaRegistry::load(conn, dialect)?;
        Ok(())
    }

    // ── Structural changes ──────────────────────────────────────────────────

    /// Create a real field and back-fill every existing match with `default`.
    ///
    /// Runs inside a savepoint: either the value table, the history table and
    /// every back-fill row exist afterwards, or none of them do.
    pub fn add_real_field(
        &mut self,
        conn: &mut Connection,
        dialect: Dialect,
        name: &str,
        value_type: ValueType,
        default: Value,
    ) -> Result<(), SchemaError> {
        self.check_new_name(name)?;
        let default = default.coerce(value_type);

        let table = dialect.quote(name);
        let history = dialect.quote(&format!("{name}{HISTORY_SUFFIX}"));
        let index = dialect.quote(&format!("{name}{HISTORY_SUFFIX}_idx"));
        let key = dialect.key_type();
        let column_type = dialect.column_type(value_type);
        let statements = [
            format!(
                "CREATE TABLE {table} (id {key} PRIMARY KEY REFERENCES matches(id), \
                 {table} {column_type} DEFAULT {})",
                default.to_sql_literal()
            ),
            format!(
                "CREATE TABLE {history} (id {key} NOT NULL REFERENCES matches(id), \
                 user_id TEXT, timestamp BIGINT NOT NULL, {table} {column_type})"
            ),
            format!("CREATE INDEX {index} ON {history} (id, timestamp)"),
        ];
        let backfill = format!(
            "INSERT INTO {table} (id, {table}) SELECT id, {} FROM matches",
            dialect.placeholder(1)
        );

        let sp = conn.savepoint()?;
        for statement in &statements {
            log::debug!("{statement}");
            sp.execute(statement, [])?;
        }
        let filled = sp.execute(&backfill, [&default])?;
        sp.commit()?;

        log::info!("Added real field '{name}' ({value_type}), back-filled {filled} matches");
        self.reload(conn, dialect)
    }

    /// Create (or replace) a view field from a SELECT exposing `id` and a
    /// column named after the field.
    pub fn add_view_field(
        &mut self,
        conn: &mut Connection,
        dialect: Dialect,
        name: &str,
        select: &str,
    ) -> Result<(), SchemaError> {
        self.check_new_name(name)?;

        let sp = conn.savepoint()?;
        for statement in dialect.create_view(name, select) {
            log::debug!("{statement}");
            sp.execute(&statement, [])?;
        }
        let columns = list_columns(&sp, dialect, name)?;
        let exposes = |col: &str| columns.iter().any(|c| c.name.eq_ignore_ascii_case(col));
        if !exposes("id") || !exposes(name) {
            return Err(SchemaError::InvalidView(name.to_string()));
        }
        sp.commit()?;

        log::info!("Added view field '{name}'");
        self.reload(conn, dialect)
    }

    /// Drop a field's backing table (and history) or view.
    ///
    /// Cached prepared statements are flushed first: a handle that still
    /// references the dropped relation must never be reused.
    pub fn remove_field(
        &mut self,
        conn: &mut Connection,
        dialect: Dialect,
        name: &str,
    ) -> Result<Field, SchemaError> {
        let field = self.resolve(name)?.clone();
        conn.flush_prepared_statement_cache();

        let sp = conn.savepoint()?;
        match field.kind {
            FieldKind::Real => {
                sp.execute(&dialect.drop_table(&field.history_table()), [])?;
                sp.execute(&dialect.drop_table(&field.name), [])?;
            }
            FieldKind::View => {
                sp.execute(&dialect.drop_view(&field.name), [])?;
            }
        }
        sp.commit()?;

        log::info!("Removed field '{}'", field.name);
        self.reload(conn, dialect)?;
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_quotes_and_comments() {
        let sql = "-- header; not a statement\n\
                   CREATE TABLE a (x TEXT DEFAULT ';');\n\
                   /* block; comment */ INSERT INTO a VALUES ('it''s;');\n\
                   ;\n\
                   SELECT 1";
        let statements = split_statements(sql);
        assert_eq!(
            statements,
            vec![
                "CREATE TABLE a (x TEXT DEFAULT ';')",
                "INSERT INTO a VALUES ('it''s;')",
                "SELECT 1",
            ]
        );
    }

    #[test]
    fn field_name_validation() {
        assert!(is_valid_field_name("error"));
        assert!(is_valid_field_name("old_volume"));
        assert!(is_valid_field_name("_x1"));
        assert!(!is_valid_field_name("1st"));
        assert!(!is_valid_field_name("bad-name"));
        assert!(!is_valid_field_name("x; DROP TABLE matches"));
        assert!(!is_valid_field_name("Matches"));
        assert!(!is_valid_field_name("error_history"));
        assert!(!is_valid_field_name(""));
    }

    #[test]
    fn default_bootstrap_uses_dialect_keys() {
        assert!(default_bootstrap(Dialect::Sqlite).contains("INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(default_bootstrap(Dialect::MySql).contains("BIGINT AUTO_INCREMENT PRIMARY KEY"));
        assert!(default_bootstrap(Dialect::Postgres).contains("BIGSERIAL PRIMARY KEY"));
    }
}
