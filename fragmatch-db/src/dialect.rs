//! Backend dialects: capability profiles and SQL fragment rendering.
//!
//! Everything above this module renders SQL through a [`Dialect`], so the
//! schema registry and query synthesizer produce backend-native statements
//! for SQLite, MySQL and PostgreSQL alike. Only SQLite has a driver compiled
//! in; the other profiles exist for rendering and for descriptor handling.

use std::fmt;

use rusqlite::Connection;

use crate::value::ValueType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    MySql,
    Postgres,
}

impl Dialect {
    /// Resolve a URL scheme (`sqlite`, `mysql`, `postgres`, ...).
    pub fn from_scheme(scheme: &str) -> Option<Dialect> {
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Dialect::Sqlite),
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Some(Dialect::Postgres),
            _ => None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    /// Embedded backends are addressed by file name rather than host/port.
    pub fn is_embedded(&self) -> bool {
        matches!(self, Dialect::Sqlite)
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Dialect::Sqlite => None,
            Dialect::MySql => Some(3306),
            Dialect::Postgres => Some(5432),
        }
    }

    /// Capabilities the backend is expected to offer before probing.
    pub fn expected_capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    pub fn quote_char(&self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Sqlite | Dialect::Postgres => '"',
        }
    }

    /// Quote an identifier, doubling any embedded quote characters.
    pub fn quote(&self, ident: &str) -> String {
        let q = self.quote_char();
        let escaped = ident.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{index}"),
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${index}"),
        }
    }

    /// Values beyond `i64::MAX` are clamped; backends reject larger literals.
    pub fn limit_clause(&self, offset: u64, limit: u64) -> String {
        let offset = offset.min(i64::MAX as u64);
        let limit = limit.min(i64::MAX as u64);
        match self {
            Dialect::Sqlite | Dialect::MySql => format!("LIMIT {offset}, {limit}"),
            Dialect::Postgres => format!("LIMIT {limit} OFFSET {offset}"),
        }
    }

    pub fn column_type(&self, ty: ValueType) -> &'static str {
        match (self, ty) {
            (_, ValueType::Text) => "TEXT",
            (Dialect::Sqlite, ValueType::Real) => "REAL",
            (Dialect::Sqlite, ValueType::Integer) => "INTEGER",
            (Dialect::MySql, ValueType::Real) => "DOUBLE",
            (Dialect::Postgres, ValueType::Real) => "DOUBLE PRECISION",
            (Dialect::MySql | Dialect::Postgres, ValueType::Integer) => "BIGINT",
        }
    }

    /// Column type of a match id reference.
    pub fn key_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER",
            Dialect::MySql | Dialect::Postgres => "BIGINT",
        }
    }

    /// Declaration of an auto-assigned primary key that never reuses ids.
    pub fn auto_increment_key(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// Statements that create (or replace) a view.
    pub fn create_view(&self, name: &str, select: &str) -> Vec<String> {
        let quoted = self.quote(name);
        let select = self.rewrite_concat(select.trim().trim_end_matches(';'));
        match self {
            Dialect::Sqlite => vec![
                format!("DROP VIEW IF EXISTS {quoted}"),
                format!("CREATE VIEW {quoted} AS {select}"),
            ],
            Dialect::MySql | Dialect::Postgres => {
                vec![format!("CREATE OR REPLACE VIEW {quoted} AS {select}")]
            }
        }
    }

    pub fn drop_view(&self, name: &str) -> String {
        format!("DROP VIEW IF EXISTS {}", self.quote(name))
    }

    pub fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote(name))
    }

    /// Query listing `(name, kind)` for every user relation. `kind` contains
    /// "view" (any case) for views; everything else is a table.
    pub fn introspection_query(&self) -> &'static str {
        match self {
            Dialect::Sqlite => {
                "SELECT name, type FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            Dialect::MySql => {
                "SELECT table_name, table_type FROM information_schema.tables \
                 WHERE table_schema = DATABASE() ORDER BY table_name"
            }
            Dialect::Postgres => {
                "SELECT table_name, table_type FROM information_schema.tables \
                 WHERE table_schema = current_schema() ORDER BY table_name"
            }
        }
    }

    /// Query listing `(column, declared type, default expression)` for the
    /// relation bound to the first placeholder.
    pub fn column_query(&self) -> String {
        match self {
            Dialect::Sqlite => {
                "SELECT name, type, dflt_value FROM pragma_table_info(?1) ORDER BY cid".to_string()
            }
            Dialect::MySql | Dialect::Postgres => format!(
                "SELECT column_name, data_type, column_default FROM information_schema.columns \
                 WHERE table_name = {} ORDER BY ordinal_position",
                self.placeholder(1)
            ),
        }
    }

    /// Whether keyset predicates use row-value comparison `(a, b) > (x, y)`
    /// rather than the expanded `a > x OR (a = x AND b > y)` form.
    pub fn supports_row_values(&self) -> bool {
        match self {
            Dialect::Sqlite | Dialect::Postgres => true,
            // MySQL accepts row values but cannot use an index for them.
            Dialect::MySql => false,
        }
    }

    /// Whether NULL sorts before every value in ascending order.
    pub fn nulls_sort_first(&self) -> bool {
        match self {
            Dialect::Sqlite | Dialect::MySql => true,
            Dialect::Postgres => false,
        }
    }

    /// Rewrite ANSI `a || b` string concatenation into the backend's form.
    pub fn rewrite_concat(&self, sql: &str) -> String {
        match self {
            Dialect::MySql => rewrite_pipes_as_concat(sql),
            Dialect::Sqlite | Dialect::Postgres => sql.to_string(),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

// ── Capabilities ────────────────────────────────────────────────────────────

/// The four capabilities the store relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub last_insert_id: bool,
    pub transactions: bool,
    pub prepared_statements: bool,
    pub placeholders: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Capabilities {
            last_insert_id: true,
            transactions: true,
            prepared_statements: true,
            placeholders: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.last_insert_id {
            missing.push("last_insert_id");
        }
        if !self.transactions {
            missing.push("transactions");
        }
        if !self.prepared_statements {
            missing.push("prepared_statements");
        }
        if !self.placeholders {
            missing.push("placeholders");
        }
        missing
    }
}

/// Probe a live SQLite connection. Never fails: a failing probe just reports
/// the capability as absent.
pub fn probe_sqlite(conn: &Connection) -> Capabilities {
    let prepared_statements = conn.prepare("SELECT 1").is_ok();
    let placeholders = conn
        .prepare("SELECT ?1")
        .map(|stmt| stmt.parameter_count() == 1)
        .unwrap_or(false);
    let transactions = conn
        .execute_batch("SAVEPOINT fragmatch_probe; RELEASE fragmatch_probe;")
        .is_ok();
    let last_insert_id = conn
        .query_row("SELECT last_insert_rowid()", [], |row| row.get::<_, i64>(0))
        .is_ok();

    Capabilities {
        last_insert_id,
        transactions,
        prepared_statements,
        placeholders,
    }
}

// ── Concatenation rewrite ───────────────────────────────────────────────────

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AS", "AND", "OR", "NOT", "IN", "IS", "LIKE", "BETWEEN", "CASE",
    "WHEN", "THEN", "ELSE", "END", "ON", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "GROUP", "BY",
    "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "ALL", "DISTINCT", "ASC", "DESC",
];

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Operand(String),
    Concat,
    Verbatim(String),
}

/// Replace chains of `a || b || c` with `CONCAT(a, b, c)`.
///
/// Operands are literals, (dotted) identifiers, function calls and
/// parenthesised groups. Keywords, commas and operators end an operand.
fn rewrite_pipes_as_concat(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut pos = 0;
    render_pieces(&scan_pieces(&chars, &mut pos, false))
}

fn scan_pieces(chars: &[char], pos: &mut usize, nested: bool) -> Vec<Piece> {
    let mut pieces = Vec::new();
    while *pos < chars.len() {
        let c = chars[*pos];
        match c {
            '\'' | '"' | '`' => {
                let quoted = read_quoted(chars, pos, c);
                push_operand(&mut pieces, quoted);
            }
            '(' => {
                *pos += 1;
                let inner = scan_pieces(chars, pos, true);
                let group = format!("({})", render_pieces(&inner));
                match pieces.last_mut() {
                    // function call: `name(` with no space in between
                    Some(Piece::Operand(prev)) => prev.push_str(&group),
                    _ => pieces.push(Piece::Operand(group)),
                }
            }
            ')' if nested => {
                *pos += 1;
                return pieces;
            }
            '|' if chars.get(*pos + 1) == Some(&'|') => {
                *pos += 2;
                pieces.push(Piece::Concat);
            }
            c if c.is_whitespace() => {
                let start = *pos;
                while *pos < chars.len() && chars[*pos].is_whitespace() {
                    *pos += 1;
                }
                pieces.push(Piece::Verbatim(chars[start..*pos].iter().collect()));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let start = *pos;
                while *pos < chars.len()
                    && (chars[*pos].is_alphanumeric() || chars[*pos] == '_' || chars[*pos] == '.')
                {
                    *pos += 1;
                }
                let word: String = chars[start..*pos].iter().collect();
                if KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(&word)) {
                    pieces.push(Piece::Verbatim(word));
                } else {
                    push_operand(&mut pieces, word);
                }
            }
            other => {
                *pos += 1;
                pieces.push(Piece::Verbatim(other.to_string()));
            }
        }
    }
    pieces
}

fn read_quoted(chars: &[char], pos: &mut usize, quote: char) -> String {
    let mut out = String::new();
    out.push(quote);
    *pos += 1;
    while *pos < chars.len() {
        let c = chars[*pos];
        out.push(c);
        *pos += 1;
        if c == quote {
            if chars.get(*pos) == Some(&quote) {
                out.push(quote);
                *pos += 1;
            } else {
                break;
            }
        }
    }
    out
}

/// Append an operand, gluing it onto a preceding one across a `.` so that
/// `"t".col` and `t."col"` stay single operands.
fn push_operand(pieces: &mut Vec<Piece>, text: String) {
    if let Some(Piece::Operand(prev)) = pieces.last_mut() {
        if prev.ends_with('.') || text.starts_with('.') {
            prev.push_str(&text);
            return;
        }
    }
    pieces.push(Piece::Operand(text));
}

fn render_pieces(pieces: &[Piece]) -> String {
    let is_space = |p: Option<&Piece>| matches!(p, Some(Piece::Verbatim(s)) if s.trim().is_empty());
    let mut out = String::new();
    let mut i = 0;
    while i < pieces.len() {
        match &pieces[i] {
            Piece::Operand(first) => {
                let mut operands = vec![first.as_str()];
                let mut next = i + 1;
                loop {
                    let mut k = next;
                    while is_space(pieces.get(k)) {
                        k += 1;
                    }
                    if pieces.get(k) != Some(&Piece::Concat) {
                        break;
                    }
                    k += 1;
                    while is_space(pieces.get(k)) {
                        k += 1;
                    }
                    match pieces.get(k) {
                        Some(Piece::Operand(operand)) => {
                            operands.push(operand);
                            next = k + 1;
                        }
                        _ => break,
                    }
                }
                if operands.len() > 1 {
                    out.push_str(&format!("CONCAT({})", operands.join(", ")));
                } else {
                    out.push_str(first);
                }
                i = next;
            }
            Piece::Concat => {
                out.push_str("||");
                i += 1;
            }
            Piece::Verbatim(text) => {
                out.push_str(text);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_per_dialect() {
        assert_eq!(Dialect::Sqlite.quote("error"), "\"error\"");
        assert_eq!(Dialect::MySql.quote("error"), "`error`");
        assert_eq!(Dialect::Postgres.quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn placeholders_and_limits() {
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::MySql.placeholder(2), "?");
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.limit_clause(20, 10), "LIMIT 20, 10");
        assert_eq!(Dialect::Postgres.limit_clause(20, 10), "LIMIT 10 OFFSET 20");
        assert_eq!(
            Dialect::Sqlite.limit_clause(5, u64::MAX),
            format!("LIMIT 5, {}", i64::MAX)
        );
    }

    #[test]
    fn view_creation_per_dialect() {
        let sqlite = Dialect::Sqlite.create_view("score", "SELECT id, 1 AS score FROM matches;");
        assert_eq!(sqlite.len(), 2);
        assert_eq!(sqlite[0], "DROP VIEW IF EXISTS \"score\"");
        assert_eq!(sqlite[1], "CREATE VIEW \"score\" AS SELECT id, 1 AS score FROM matches");

        let pg = Dialect::Postgres.create_view("score", "SELECT id, 1 AS score FROM matches");
        assert_eq!(
            pg,
            vec!["CREATE OR REPLACE VIEW \"score\" AS SELECT id, 1 AS score FROM matches"]
        );
    }

    #[test]
    fn concat_rewrite_for_mysql() {
        assert_eq!(
            Dialect::MySql.rewrite_concat("SELECT id, first || ' ' || last AS name FROM people"),
            "SELECT id, CONCAT(first, ' ', last) AS name FROM people"
        );
        assert_eq!(
            Dialect::MySql.rewrite_concat("upper(a.x || b.y) = 'AB'"),
            "upper(CONCAT(a.x, b.y)) = 'AB'"
        );
        assert_eq!(
            Dialect::MySql.rewrite_concat("source||'-'||target"),
            "CONCAT(source, '-', target)"
        );
    }

    #[test]
    fn concat_rewrite_leaves_strings_alone() {
        let sql = "status = 'a || b'";
        assert_eq!(Dialect::MySql.rewrite_concat(sql), sql);
        assert_eq!(Dialect::Sqlite.rewrite_concat("a || b"), "a || b");
    }

    #[test]
    fn scheme_aliases() {
        assert_eq!(Dialect::from_scheme("PostgreSQL"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_scheme("mariadb"), Some(Dialect::MySql));
        assert_eq!(Dialect::from_scheme("oracle"), None);
    }

    #[test]
    fn sqlite_in_memory_has_every_capability() {
        let conn = Connection::open_in_memory().unwrap();
        let caps = probe_sqlite(&conn);
        assert!(caps.is_complete(), "missing: {:?}", caps.missing());
    }

    #[test]
    fn missing_capabilities_are_named() {
        let caps = Capabilities {
            transactions: false,
            ..Capabilities::all()
        };
        assert_eq!(caps.missing(), vec!["transactions"]);
    }
}
