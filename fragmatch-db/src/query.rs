//! Query parameters, SQL synthesis and the keyset pager.
//!
//! A SELECT joins exactly the field tables it needs: the preload fields, the
//! sort field and the filter's dependencies, each once. Field names are
//! validated against the [`SchemaRegistry`] and quoted through the
//! [`Dialect`] before they reach the statement; filter clauses are passed
//! through verbatim (after the dialect's concatenation rewrite).

use crate::dialect::Dialect;
use crate::error::{QueryError, SchemaError, StoreError};
use crate::filter::Filter;
use crate::schema::{Field, SchemaRegistry};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }

    fn reversed(&self) -> SortOrder {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

/// Which way a keyset page extends from its pivot, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A cursor anchored on a known row.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyset {
    pub pivot_id: i64,
    /// The pivot's value of the sort field.
    pub pivot_value: Value,
    pub direction: Direction,
    /// Include the pivot row itself.
    pub inclusive: bool,
    /// Rows to skip past the pivot.
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Pagination {
    #[default]
    All,
    Absolute {
        offset: u64,
        limit: u64,
    },
    Keyset(Keyset),
}

/// Everything a caller can say about which matches it wants.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryParameters {
    pub preload: Vec<String>,
    pub sort: Option<String>,
    pub order: SortOrder,
    pub filter: Filter,
    pub pagination: Pagination,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preload<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preload = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(field.into());
        self.order = order;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn window(mut self, offset: u64, limit: u64) -> Self {
        self.pagination = Pagination::Absolute { offset, limit };
        self
    }

    pub fn keyset(mut self, keyset: Keyset) -> Self {
        self.pagination = Pagination::Keyset(keyset);
        self
    }

    /// The same query without any pagination.
    pub fn unpaged(&self) -> Self {
        QueryParameters {
            pagination: Pagination::All,
            ..self.clone()
        }
    }
}

/// A rendered statement ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Field columns following the four core match columns, in order.
    pub fields: Vec<String>,
    /// Rows come back in reverse display order (backward keyset pages).
    pub reversed: bool,
}

/// Renders SELECT and COUNT statements for one dialect and field registry.
pub struct QuerySynthesizer<'a> {
    dialect: Dialect,
    registry: &'a SchemaRegistry,
}

impl<'a> QuerySynthesizer<'a> {
    pub fn new(dialect: Dialect, registry: &'a SchemaRegistry) -> Self {
        QuerySynthesizer { dialect, registry }
    }

    /// Preload fields, then the sort field, then filter dependencies; each
    /// once (case-insensitively).
    pub fn required_fields(&self, params: &QueryParameters) -> Result<Vec<&'a Field>, SchemaError> {
        let mut required: Vec<&'a Field> = Vec::new();
        let mut push = |field: &'a Field| {
            if !required.iter().any(|f| f.name == field.name) {
                required.push(field);
            }
        };

        for name in &params.preload {
            push(self.registry.resolve(name)?);
        }
        if let Some(sort) = &params.sort {
            push(self.registry.resolve(sort)?);
        }
        for name in self.filter_dependencies(&params.filter) {
            push(self.registry.resolve(&name)?);
        }
        Ok(required)
    }

    fn filter_dependencies(&self, filter: &Filter) -> Vec<String> {
        let names = self.registry.names();
        filter
            .dependencies_among(names.iter().map(String::as_str))
            .into_iter()
            .collect()
    }

    fn column(&self, field: &Field) -> String {
        let q = self.dialect.quote(&field.name);
        format!("{q}.{q}")
    }

    fn joins(&self, fields: &[&Field]) -> String {
        fields
            .iter()
            .map(|f| {
                let q = self.dialect.quote(&f.name);
                format!(" INNER JOIN {q} ON matches.id = {q}.id")
            })
            .collect()
    }

    fn where_clauses(&self, filter: &Filter) -> Vec<String> {
        filter
            .clauses()
            .into_iter()
            .map(|c| format!("({})", self.dialect.rewrite_concat(c)))
            .collect()
    }

    /// Render the statement for `params`.
    pub fn select(&self, params: &QueryParameters) -> Result<SelectStatement, StoreError> {
        let fields = self.required_fields(params)?;
        let sort = match &params.sort {
            Some(name) => Some(self.registry.resolve(name)?),
            None => None,
        };

        let mut sql = String::from("SELECT matches.id, matches.source, matches.target, matches.transform");
        for field in &fields {
            sql.push_str(", ");
            sql.push_str(&self.column(field));
        }
        sql.push_str(" FROM matches");
        sql.push_str(&self.joins(&fields));

        let mut conditions = self.where_clauses(&params.filter);
        let mut values = Vec::new();
        let mut order = params.order;
        let mut reversed = false;
        let mut window = None;

        match &params.pagination {
            Pagination::All => {}
            Pagination::Absolute { offset, limit } => window = Some((*offset, *limit)),
            Pagination::Keyset(keyset) => {
                let sort = sort.ok_or(QueryError::KeysetWithoutSort)?;
                if keyset.pivot_value.is_null() {
                    return Err(QueryError::InvalidPagination(
                        "keyset pivot has no sort value".to_string(),
                    )
                    .into());
                }
                conditions.push(self.keyset_predicate(sort, params.order, keyset, &mut values));
                if keyset.direction == Direction::Backward {
                    order = order.reversed();
                    reversed = true;
                }
                window = Some((keyset.offset, keyset.limit));
            }
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let dir = order.keyword();
        match sort {
            Some(field) => sql.push_str(&format!(
                " ORDER BY {} {dir}, matches.id {dir}",
                self.column(field)
            )),
            None => sql.push_str(&format!(" ORDER BY matches.id {dir}")),
        }

        if let Some((offset, limit)) = window {
            sql.push(' ');
            sql.push_str(&self.dialect.limit_clause(offset, limit));
        }

        Ok(SelectStatement {
            sql,
            params: values,
            fields: fields.iter().map(|f| f.name.clone()).collect(),
            reversed,
        })
    }

    /// `(sort, id) <op> (pivot value, pivot id)`, where `<op>` follows the
    /// sort order and direction: forward through an ascending sort is `>`.
    fn keyset_predicate(
        &self,
        sort: &Field,
        order: SortOrder,
        keyset: &Keyset,
        values: &mut Vec<Value>,
    ) -> String {
        let ascending_walk = matches!(
            (order, keyset.direction),
            (SortOrder::Ascending, Direction::Forward) | (SortOrder::Descending, Direction::Backward)
        );
        let strict = if ascending_walk { ">" } else { "<" };
        let op = if keyset.inclusive {
            format!("{strict}=")
        } else {
            strict.to_string()
        };
        let column = self.column(sort);
        let mut next = |v: Value| {
            values.push(v);
            self.dialect.placeholder(values.len())
        };

        let predicate = if self.dialect.supports_row_values() {
            let pv = next(keyset.pivot_value.clone());
            let pid = next(Value::Integer(keyset.pivot_id));
            format!("({column}, matches.id) {op} ({pv}, {pid})")
        } else {
            let pv = next(keyset.pivot_value.clone());
            let pv_eq = next(keyset.pivot_value.clone());
            let pid = next(Value::Integer(keyset.pivot_id));
            format!("({column} {strict} {pv} OR ({column} = {pv_eq} AND matches.id {op} {pid}))")
        };

        // Comparisons with NULL are never true; rows past the pivot on the
        // NULL side must be admitted explicitly. The pivot itself is non-NULL.
        let toward_nulls = ascending_walk != self.dialect.nulls_sort_first();
        if toward_nulls {
            format!("({predicate} OR {column} IS NULL)")
        } else {
            predicate
        }
    }

    /// `SELECT COUNT(*)` over the rows `filter` admits.
    pub fn count(&self, filter: &Filter) -> Result<SelectStatement, StoreError> {
        let mut fields: Vec<&Field> = Vec::new();
        for name in self.filter_dependencies(filter) {
            fields.push(self.registry.resolve(&name)?);
        }

        let mut sql = String::from("SELECT COUNT(*) FROM matches");
        sql.push_str(&self.joins(&fields));
        let conditions = self.where_clauses(filter);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        Ok(SelectStatement {
            sql,
            params: Vec::new(),
            fields: Vec::new(),
            reversed: false,
        })
    }
}

// ── Pager ───────────────────────────────────────────────────────────────────

/// A row of a loaded window: its id and its value of the sort field.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRow {
    pub id: i64,
    pub sort_value: Value,
}

#[derive(Debug, Clone)]
struct LoadedWindow {
    offset: u64,
    rows: Vec<LoadedRow>,
}

/// Remembers the last loaded window of one query so the next request near it
/// can be served by a keyset page instead of an offset scan.
///
/// The pager plans a keyset query only when the requested window overlaps or
/// touches the loaded one and a sort field is set; anything else (first
/// load, a jump, an unsorted query, a NULL pivot) falls back to absolute
/// pagination. Changing the query resets it.
#[derive(Debug, Clone, Default)]
pub struct Pager {
    query: Option<QueryParameters>,
    window: Option<LoadedWindow>,
}

impl Pager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.query = None;
        self.window = None;
    }

    /// `(offset, row count)` of the loaded window.
    pub fn loaded(&self) -> Option<(u64, usize)> {
        self.window.as_ref().map(|w| (w.offset, w.rows.len()))
    }

    /// Forget the loaded window if `params` (ignoring pagination) differ from
    /// the query it was loaded for.
    pub fn track(&mut self, params: &QueryParameters) {
        let unpaged = params.unpaged();
        if self.query.as_ref() != Some(&unpaged) {
            self.window = None;
            self.query = Some(unpaged);
        }
    }

    /// Choose how to fetch rows `[offset, offset + limit)`.
    pub fn plan(&self, sorted: bool, offset: u64, limit: u64) -> Pagination {
        let absolute = Pagination::Absolute { offset, limit };
        let Some(window) = self.window.as_ref().filter(|w| !w.rows.is_empty()) else {
            return absolute;
        };
        if !sorted || limit == 0 {
            return absolute;
        }

        let start = window.offset;
        let Some(end) = start.checked_add(window.rows.len() as u64) else {
            return absolute;
        };
        // Saturating: an open-ended request never ends inside the window.
        let last = offset.saturating_add(limit - 1);

        let (pivot, direction, inclusive) = if offset >= start && offset < end {
            (&window.rows[(offset - start) as usize], Direction::Forward, true)
        } else if offset == end {
            (&window.rows[window.rows.len() - 1], Direction::Forward, false)
        } else if offset < start && last >= start && last < end {
            (&window.rows[(last - start) as usize], Direction::Backward, true)
        } else if offset < start && last == start - 1 {
            (&window.rows[0], Direction::Backward, false)
        } else {
            return absolute;
        };

        if pivot.sort_value.is_null() {
            return absolute;
        }

        Pagination::Keyset(Keyset {
            pivot_id: pivot.id,
            pivot_value: pivot.sort_value.clone(),
            direction,
            inclusive,
            offset: 0,
            limit,
        })
    }

    /// Remember the rows just loaded at `offset`.
    pub fn record(&mut self, offset: u64, rows: Vec<LoadedRow>) {
        self.window = Some(LoadedWindow { offset, rows });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ids: &[i64]) -> Vec<LoadedRow> {
        ids.iter()
            .map(|&id| LoadedRow {
                id,
                sort_value: Value::Real(id as f64 / 10.0),
            })
            .collect()
    }

    #[test]
    fn first_request_is_absolute() {
        let pager = Pager::new();
        assert_eq!(
            pager.plan(true, 0, 10),
            Pagination::Absolute { offset: 0, limit: 10 }
        );
    }

    #[test]
    fn scrolling_past_the_window_continues_from_the_last_row() {
        let mut pager = Pager::new();
        pager.record(0, rows(&[1, 2, 3, 4]));
        match pager.plan(true, 4, 4) {
            Pagination::Keyset(k) => {
                assert_eq!(k.pivot_id, 4);
                assert_eq!(k.direction, Direction::Forward);
                assert!(!k.inclusive);
                assert_eq!(k.limit, 4);
            }
            other => panic!("expected keyset, got {other:?}"),
        }
    }

    #[test]
    fn overlapping_forward_request_pivots_inside_the_window() {
        let mut pager = Pager::new();
        pager.record(10, rows(&[11, 12, 13, 14]));
        match pager.plan(true, 12, 4) {
            Pagination::Keyset(k) => {
                assert_eq!(k.pivot_id, 13);
                assert!(k.inclusive);
                assert_eq!(k.direction, Direction::Forward);
            }
            other => panic!("expected keyset, got {other:?}"),
        }
    }

    #[test]
    fn scrolling_back_pivots_on_the_last_requested_row() {
        let mut pager = Pager::new();
        pager.record(10, rows(&[11, 12, 13, 14]));
        match pager.plan(true, 8, 4) {
            Pagination::Keyset(k) => {
                assert_eq!(k.pivot_id, 12);
                assert!(k.inclusive);
                assert_eq!(k.direction, Direction::Backward);
            }
            other => panic!("expected keyset, got {other:?}"),
        }
        match pager.plan(true, 6, 4) {
            Pagination::Keyset(k) => {
                assert_eq!(k.pivot_id, 11);
                assert!(!k.inclusive);
                assert_eq!(k.direction, Direction::Backward);
            }
            other => panic!("expected keyset, got {other:?}"),
        }
    }

    #[test]
    fn jumps_and_unsorted_queries_fall_back_to_absolute() {
        let mut pager = Pager::new();
        pager.record(10, rows(&[11, 12, 13, 14]));
        assert_eq!(
            pager.plan(true, 100, 4),
            Pagination::Absolute { offset: 100, limit: 4 }
        );
        assert_eq!(
            pager.plan(true, 0, 4),
            Pagination::Absolute { offset: 0, limit: 4 }
        );
        // request engulfing the whole window
        assert_eq!(
            pager.plan(true, 8, 10),
            Pagination::Absolute { offset: 8, limit: 10 }
        );
        assert_eq!(
            pager.plan(false, 12, 4),
            Pagination::Absolute { offset: 12, limit: 4 }
        );
    }

    #[test]
    fn null_pivot_falls_back_to_absolute() {
        let mut pager = Pager::new();
        pager.record(
            0,
            vec![LoadedRow {
                id: 7,
                sort_value: Value::Null,
            }],
        );
        assert_eq!(
            pager.plan(true, 1, 5),
            Pagination::Absolute { offset: 1, limit: 5 }
        );
    }

    #[test]
    fn open_ended_requests_do_not_overflow() {
        let mut pager = Pager::new();
        pager.record(0, rows(&[1, 2, 3, 4]));
        match pager.plan(true, 4, u64::MAX) {
            Pagination::Keyset(k) => {
                assert_eq!(k.pivot_id, 4);
                assert!(!k.inclusive);
                assert_eq!(k.limit, u64::MAX);
            }
            other => panic!("expected keyset, got {other:?}"),
        }
        assert_eq!(
            pager.plan(true, 5, u64::MAX),
            Pagination::Absolute { offset: 5, limit: u64::MAX }
        );

        pager.record(u64::MAX - 1, rows(&[1, 2, 3]));
        assert_eq!(
            pager.plan(true, u64::MAX, 1),
            Pagination::Absolute { offset: u64::MAX, limit: 1 }
        );
    }

    #[test]
    fn changing_the_query_forgets_the_window() {
        let mut pager = Pager::new();
        let params = QueryParameters::new().sorted_by("error", SortOrder::Ascending);
        pager.track(&params.clone().window(0, 4));
        pager.record(0, rows(&[1, 2, 3, 4]));

        pager.track(&params.clone().window(4, 4));
        assert!(pager.loaded().is_some());

        pager.track(&params.sorted_by("error", SortOrder::Descending));
        assert!(pager.loaded().is_none());
    }
}
