//! Named filter clauses and their field dependencies.
//!
//! Clauses are backend-native SQL boolean fragments and are never parsed.
//! A clause depends on every known field whose name occurs in its text,
//! case-insensitively. This over-approximates (an extra join costs little)
//! but never misses a field that is named directly. A clause that only
//! reaches a field through a view wrapping it depends on the view, not on
//! the wrapped field.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: BTreeMap<String, String>,
    known_fields: Vec<String>,
    dependencies: BTreeSet<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty filter aware of the given field names.
    pub fn with_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut filter = Self::default();
        filter.set_known_fields(fields);
        filter
    }

    /// Add or replace the clause stored under `key`.
    pub fn set_filter(&mut self, key: impl Into<String>, clause: impl Into<String>) {
        self.clauses.insert(key.into(), clause.into());
        self.recompute();
    }

    /// Returns false if there was no clause under `key`.
    pub fn remove_filter(&mut self, key: &str) -> bool {
        let removed = self.clauses.remove(key).is_some();
        if removed {
            self.recompute();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.clauses.clear();
        self.dependencies.clear();
    }

    /// Replace the field list dependencies are detected against.
    pub fn set_known_fields<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_fields = fields.into_iter().map(Into::into).collect();
        self.recompute();
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.clauses.get(key).map(String::as_str)
    }

    /// Clauses ordered by key.
    pub fn clauses(&self) -> Vec<&str> {
        self.clauses.values().map(String::as_str).collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.clauses.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Dependencies against an explicit field list rather than the stored one.
    pub fn dependencies_among<'a, I>(&self, fields: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let lowered: Vec<String> = self.clauses.values().map(|c| c.to_lowercase()).collect();
        fields
            .into_iter()
            .filter(|field| {
                let needle = field.to_lowercase();
                lowered.iter().any(|clause| clause.contains(&needle))
            })
            .map(str::to_string)
            .collect()
    }

    /// Every clause parenthesised and joined with `AND`.
    pub fn where_clause(&self) -> Option<String> {
        if self.clauses.is_empty() {
            return None;
        }
        Some(
            self.clauses
                .values()
                .map(|c| format!("({c})"))
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    }

    fn recompute(&mut self) {
        let fields = std::mem::take(&mut self.known_fields);
        self.dependencies = self.dependencies_among(fields.iter().map(String::as_str));
        self.known_fields = fields;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Filter {
        Filter::with_fields(["status", "overlap", "error", "volume", "old_volume"])
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dependencies_track_filter_changes() {
        let mut filter = fields();
        filter.set_filter("k", "error < 0.5");
        assert_eq!(filter.dependencies(), &set(&["error"]));

        filter.set_filter("v", "volume > 10");
        assert_eq!(filter.dependencies(), &set(&["error", "volume"]));

        assert!(filter.remove_filter("k"));
        assert_eq!(filter.dependencies(), &set(&["volume"]));
        assert!(!filter.remove_filter("k"));
    }

    #[test]
    fn detection_is_case_insensitive_and_over_inclusive() {
        let mut filter = fields();
        filter.set_filter("old", "OLD_VOLUME IS NOT NULL");
        // "volume" is a substring of "old_volume": an extra join, never a missing one
        assert_eq!(filter.dependencies(), &set(&["old_volume", "volume"]));
    }

    #[test]
    fn known_field_changes_recompute() {
        let mut filter = Filter::new();
        filter.set_filter("s", "score > 3");
        assert!(filter.dependencies().is_empty());
        filter.set_known_fields(["score"]);
        assert_eq!(filter.dependencies(), &set(&["score"]));
    }

    #[test]
    fn where_clause_conjoins_in_key_order() {
        let mut filter = fields();
        assert_eq!(filter.where_clause(), None);
        filter.set_filter("b", "volume > 1");
        filter.set_filter("a", "error < 0.5 OR error IS NULL");
        assert_eq!(
            filter.where_clause().as_deref(),
            Some("(error < 0.5 OR error IS NULL) AND (volume > 1)")
        );
        assert_eq!(filter.clauses(), vec!["error < 0.5 OR error IS NULL", "volume > 1"]);
    }

    #[test]
    fn replacing_a_clause_keeps_keys_unique() {
        let mut filter = fields();
        filter.set_filter("k", "error < 0.5");
        filter.set_filter("k", "status = 'ok'");
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.dependencies(), &set(&["status"]));
    }
}
