//! The match store: entity CRUD, attribute reads and writes, history and the
//! shared attribute cache.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::config::StoreOptions;
use crate::connection::{ConnectionManager, SharedConnection};
use crate::error::{QueryError, SchemaError, StoreError};
use crate::events::{StoreEvent, StoreObserver};
use crate::filter::Filter;
use crate::query::{LoadedRow, Pager, QueryParameters, QuerySynthesizer, SelectStatement};
use crate::schema::{Field, SchemaRegistry};
use crate::transform::Transform;
use crate::value::{Value, ValueType};

// ── Cache ───────────────────────────────────────────────────────────────────

/// Last read or written attribute values per match, shared by the store and
/// every [`Match`] it hands out. Field names are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct AttributeCache {
    inner: Arc<RwLock<HashMap<i64, HashMap<String, Value>>>>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64, field: &str) -> Option<Value> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&id)
            .and_then(|fields| fields.get(&field.to_ascii_lowercase()))
            .cloned()
    }

    pub fn insert(&self, id: i64, field: &str, value: Value) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(id)
            .or_default()
            .insert(field.to_ascii_lowercase(), value);
    }

    /// Drop everything cached for one match.
    pub fn invalidate(&self, id: i64) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(&id);
    }

    /// Replace everything cached for one match.
    pub fn replace<I>(&self, id: i64, values: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let fields = values
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(id, fields);
    }

    pub fn clear(&self) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
    }

    /// Number of matches with at least one cached value.
    pub fn len(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Entities ────────────────────────────────────────────────────────────────

/// A match as returned by the store. Attribute values live in the store's
/// [`AttributeCache`]; the entity only holds a handle to it.
#[derive(Debug, Clone)]
pub struct Match {
    pub id: i64,
    pub source: String,
    pub target: String,
    pub transform: Transform,
    cache: AttributeCache,
}

impl Match {
    /// The cached value of `field`, if it was joined in or written.
    pub fn cached(&self, field: &str) -> Option<Value> {
        self.cache.get(self.id, field)
    }
}

impl PartialEq for Match {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.source == other.source
            && self.target == other.target
            && self.transform == other.transform
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub match_id: i64,
    pub user_id: Option<String>,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    pub value: Value,
}

/// Round-trip counters, mostly for tests and `--verbose` output.
#[derive(Debug, Default)]
pub struct QueryStats {
    selects: AtomicU64,
    single_row_fetches: AtomicU64,
}

impl QueryStats {
    /// Multi-row SELECTs issued by `get_matches`.
    pub fn selects(&self) -> u64 {
        self.selects.load(Ordering::Relaxed)
    }

    /// Single-attribute queries issued on cache misses.
    pub fn single_row_fetches(&self) -> u64 {
        self.single_row_fetches.load(Ordering::Relaxed)
    }
}

struct RawMatch {
    id: i64,
    source: String,
    target: String,
    transform: String,
    values: Vec<Value>,
}

// ── Store ───────────────────────────────────────────────────────────────────

/// An attribute store over one shared backend connection.
pub struct MatchStore {
    conn: Arc<SharedConnection>,
    registry: SchemaRegistry,
    cache: AttributeCache,
    options: StoreOptions,
    observers: Vec<Arc<dyn StoreObserver>>,
    stats: QueryStats,
    batch_depth: u32,
    rows_changed: bool,
}

impl MatchStore {
    /// Wrap a live connection and load its field registry.
    pub fn new(conn: Arc<SharedConnection>, options: StoreOptions) -> Result<Self, StoreError> {
        let registry = SchemaRegistry::load(&conn.lock(), conn.dialect())?;
        log::debug!(
            "Store on {} with {} fields: {}",
            conn.key(),
            registry.len(),
            registry.names().join(", ")
        );
        Ok(MatchStore {
            conn,
            registry,
            cache: AttributeCache::new(),
            options,
            observers: Vec::new(),
            stats: QueryStats::default(),
            batch_depth: 0,
            rows_changed: false,
        })
    }

    /// Open `url` through the process-wide [`ConnectionManager`].
    pub fn open(url: &str, options: StoreOptions) -> Result<Self, StoreError> {
        let conn = ConnectionManager::global().open_url(url)?;
        Self::new(conn, options)
    }

    pub fn connection(&self) -> &Arc<SharedConnection> {
        &self.conn
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn set_history_enabled(&mut self, enabled: bool) {
        self.options.history_enabled = enabled;
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    pub fn cache(&self) -> &AttributeCache {
        &self.cache
    }

    pub fn subscribe(&mut self, observer: Arc<dyn StoreObserver>) {
        self.observers.push(observer);
    }

    fn emit(&self, event: StoreEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    fn rows_did_change(&mut self) {
        if self.batch_depth > 0 {
            self.rows_changed = true;
        } else {
            self.emit(StoreEvent::RowCountChanged);
        }
    }

    // ── Fields ──────────────────────────────────────────────────────────────

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn fields(&self) -> BTreeSet<String> {
        self.registry.fields()
    }

    pub fn is_real_field(&self, name: &str) -> bool {
        self.registry.is_real_field(name)
    }

    /// An empty filter that detects dependencies on this store's fields.
    pub fn filter(&self) -> Filter {
        Filter::with_fields(self.registry.names())
    }

    /// Re-derive the registry from the backend.
    pub fn refresh_fields(&mut self) -> Result<(), StoreError> {
        self.registry = SchemaRegistry::load(&self.conn.lock(), self.conn.dialect())?;
        self.cache.clear();
        Ok(())
    }

    fn require_transactions(&self) -> Result<(), SchemaError> {
        if self.conn.capabilities().transactions {
            Ok(())
        } else {
            Err(SchemaError::MissingCapability {
                capability: "transactions",
                dialect: self.conn.dialect(),
            })
        }
    }

    fn schema_did_change(&mut self) {
        self.cache.clear();
        self.emit(StoreEvent::SchemaChanged);
    }

    pub fn add_real_field(
        &mut self,
        name: &str,
        value_type: ValueType,
        default: impl Into<Value>,
    ) -> Result<(), StoreError> {
        self.require_transactions()?;
        {
            let mut conn = self.conn.lock();
            self.registry.add_real_field(
                &mut conn,
                self.conn.dialect(),
                name,
                value_type,
                default.into(),
            )?;
        }
        self.schema_did_change();
        Ok(())
    }

    pub fn add_view_field(&mut self, name: &str, select: &str) -> Result<(), StoreError> {
        self.require_transactions()?;
        {
            let mut conn = self.conn.lock();
            self.registry
                .add_view_field(&mut conn, self.conn.dialect(), name, select)?;
        }
        self.schema_did_change();
        Ok(())
    }

    pub fn remove_field(&mut self, name: &str) -> Result<Field, StoreError> {
        self.require_transactions()?;
        let removed = {
            let mut conn = self.conn.lock();
            self.registry
                .remove_field(&mut conn, self.conn.dialect(), name)?
        };
        self.schema_did_change();
        Ok(removed)
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    fn hydrate(&self, raw: RawMatch, fields: &[String]) -> Result<Match, StoreError> {
        let transform = raw
            .transform
            .parse::<Transform>()
            .map_err(|source| StoreError::Transform { id: raw.id, source })?;
        self.cache
            .replace(raw.id, fields.iter().cloned().zip(raw.values));
        Ok(Match {
            id: raw.id,
            source: raw.source,
            target: raw.target,
            transform,
            cache: self.cache.clone(),
        })
    }

    /// Fetch one match. Cached values for it are discarded.
    pub fn get_match(&self, id: i64) -> Result<Option<Match>, StoreError> {
        let raw = self
            .conn
            .lock()
            .query_row(
                "SELECT id, source, target, transform FROM matches WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RawMatch {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        target: row.get(2)?,
                        transform: row.get(3)?,
                        values: Vec::new(),
                    })
                },
            )
            .optional()?;
        raw.map(|raw| self.hydrate(raw, &[])).transpose()
    }

    pub fn contains(&self, id: i64) -> Result<bool, StoreError> {
        Ok(match_exists(&self.conn.lock(), id)?)
    }

    /// Run the query described by `params`. Joined fields are cached on
    /// every returned match.
    pub fn get_matches(&self, params: &QueryParameters) -> Result<Vec<Match>, StoreError> {
        let statement = QuerySynthesizer::new(self.conn.dialect(), &self.registry).select(params)?;
        log::debug!("{}", statement.sql);

        let mut rows = self.run_select(&statement)?;
        self.stats.selects.fetch_add(1, Ordering::Relaxed);
        if statement.reversed {
            rows.reverse();
        }
        rows.into_iter()
            .map(|raw| self.hydrate(raw, &statement.fields))
            .collect()
    }

    fn run_select(&self, statement: &SelectStatement) -> Result<Vec<RawMatch>, StoreError> {
        let conn = self.conn.lock();
        let sql = statement.sql.as_str();
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| QueryError::backend(sql, e))?;
        let width = statement.fields.len();
        let rows = stmt
            .query_map(params_from_iter(statement.params.iter()), |row| {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(row.get::<_, Value>(4 + i)?);
                }
                Ok(RawMatch {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    target: row.get(2)?,
                    transform: row.get(3)?,
                    values,
                })
            })
            .map_err(|e| QueryError::backend(sql, e))?;
        let rows = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| QueryError::backend(sql, e))?;
        Ok(rows)
    }

    /// Matches admitted by `filter`.
    pub fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let statement = QuerySynthesizer::new(self.conn.dialect(), &self.registry).count(filter)?;
        log::debug!("{}", statement.sql);
        let sql = statement.sql.as_str();
        let n: i64 = self
            .conn
            .lock()
            .query_row(sql, [], |row| row.get(0))
            .map_err(|e| QueryError::backend(sql, e))?;
        Ok(n.max(0) as u64)
    }

    /// Fetch rows `[offset, offset + limit)` of `params`, letting `pager` turn
    /// the request into a keyset query when it is near the last window.
    pub fn page(
        &self,
        pager: &mut Pager,
        params: &QueryParameters,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Match>, StoreError> {
        pager.track(params);
        let plan = pager.plan(params.sort.is_some(), offset, limit);
        log::debug!("Page [{offset}, +{limit}) planned as {plan:?}");

        let query = QueryParameters {
            pagination: plan,
            ..params.clone()
        };
        let matches = self.get_matches(&query)?;

        let loaded = matches
            .iter()
            .map(|m| LoadedRow {
                id: m.id,
                sort_value: params
                    .sort
                    .as_deref()
                    .and_then(|s| m.cached(s))
                    .unwrap_or_default(),
            })
            .collect();
        pager.record(offset, loaded);
        Ok(matches)
    }

    /// Value of `field` for match `id`, from the cache or one single-row query.
    pub fn attribute(&self, id: i64, field: &str) -> Result<Value, StoreError> {
        let field = self.registry.resolve(field)?;
        if let Some(value) = self.cache.get(id, &field.name) {
            return Ok(value);
        }

        let q = self.conn.dialect().quote(&field.name);
        let sql = format!("SELECT {q}.{q} FROM {q} WHERE {q}.id = ?1");
        let conn = self.conn.lock();
        self.stats.single_row_fetches.fetch_add(1, Ordering::Relaxed);
        let value: Option<Value> = conn
            .query_row(&sql, params![id], |row| row.get(0))
            .optional()
            .map_err(|e| QueryError::backend(&sql, e))?;

        let value = match value {
            Some(value) => value,
            None if match_exists(&conn, id)? => Value::Null,
            None => return Err(StoreError::MatchNotFound(id)),
        };
        drop(conn);

        self.cache.insert(id, &field.name, value.clone());
        Ok(value)
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    /// Insert a match. Without an explicit id the backend assigns one. Every
    /// real field gets its default value for the new match.
    pub fn add_match(
        &mut self,
        source: &str,
        target: &str,
        transform: &Transform,
        id: Option<i64>,
    ) -> Result<Match, StoreError> {
        if id.is_none() && !self.conn.capabilities().last_insert_id {
            return Err(SchemaError::MissingCapability {
                capability: "last_insert_id",
                dialect: self.conn.dialect(),
            }
            .into());
        }

        let xf = transform.to_string();
        let id = {
            let mut conn = self.conn.lock();
            let sp = conn.savepoint()?;
            let id = match id {
                Some(id) => {
                    if match_exists(&sp, id)? {
                        return Err(SchemaError::DuplicateId(id).into());
                    }
                    sp.execute(
                        "INSERT INTO matches (id, source, target, transform) VALUES (?1, ?2, ?3, ?4)",
                        params![id, source, target, xf],
                    )?;
                    id
                }
                None => {
                    sp.execute(
                        "INSERT INTO matches (source, target, transform) VALUES (?1, ?2, ?3)",
                        params![source, target, xf],
                    )?;
                    sp.last_insert_rowid()
                }
            };
            for field in self.registry.real_fields() {
                let q = self.conn.dialect().quote(&field.name);
                sp.execute(&format!("INSERT INTO {q} (id) VALUES (?1)"), params![id])?;
            }
            sp.commit()?;
            id
        };

        log::debug!("Added match {id}: {source} -> {target}");
        self.cache.replace(
            id,
            self.registry
                .real_fields()
                .map(|f| (f.name.clone(), f.default.clone())),
        );
        self.rows_did_change();

        Ok(Match {
            id,
            source: source.to_string(),
            target: target.to_string(),
            transform: *transform,
            cache: self.cache.clone(),
        })
    }

    /// Replace the fragments and transform of an existing match.
    pub fn update_match(
        &self,
        id: i64,
        source: &str,
        target: &str,
        transform: &Transform,
    ) -> Result<(), StoreError> {
        let changed = self.conn.lock().execute(
            "UPDATE matches SET source = ?1, target = ?2, transform = ?3 WHERE id = ?4",
            params![source, target, transform.to_string(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::MatchNotFound(id));
        }
        Ok(())
    }

    /// Write `value` to a real field, updating the cache in the same call and
    /// appending a history record unless history is disabled.
    pub fn set_attribute(
        &self,
        id: i64,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), StoreError> {
        let field = self.registry.resolve(field)?;
        if !field.is_real() {
            return Err(SchemaError::ReadOnlyField(field.name.clone()).into());
        }
        let value = value.into().coerce(field.value_type);
        let q = self.conn.dialect().quote(&field.name);

        let conn = self.conn.lock();
        let update = format!("UPDATE {q} SET {q} = ?1 WHERE id = ?2");
        let changed = conn
            .execute(&update, params![value, id])
            .map_err(|e| QueryError::backend(&update, e))?;
        if changed == 0 {
            if !match_exists(&conn, id)? {
                return Err(StoreError::MatchNotFound(id));
            }
            let insert = format!("INSERT INTO {q} (id, {q}) VALUES (?1, ?2)");
            conn.execute(&insert, params![id, value])
                .map_err(|e| QueryError::backend(&insert, e))?;
        }

        if self.options.history_enabled {
            if let Err(e) = self.append_history(&conn, field, id, &value) {
                log::warn!("History for match {id} field '{}' not recorded: {e}", field.name);
            }
        }
        drop(conn);

        self.cache.insert(id, &field.name, value);
        Ok(())
    }

    fn append_history(
        &self,
        conn: &Connection,
        field: &Field,
        id: i64,
        value: &Value,
    ) -> rusqlite::Result<()> {
        let dialect = self.conn.dialect();
        let table = dialect.quote(&field.history_table());
        let column = dialect.quote(&field.name);

        let last: Option<i64> = conn.query_row(
            &format!("SELECT MAX(timestamp) FROM {table} WHERE id = ?1"),
            params![id],
            |row| row.get(0),
        )?;
        let now = chrono::Utc::now().timestamp_micros();
        let timestamp = match last {
            Some(last) if last >= now => last + 1,
            _ => now,
        };

        conn.execute(
            &format!("INSERT INTO {table} (id, user_id, timestamp, {column}) VALUES (?1, ?2, ?3, ?4)"),
            params![id, self.options.user_id, timestamp, value],
        )?;
        Ok(())
    }

    /// Every recorded write of `field` on match `id`, oldest first.
    pub fn history(&self, id: i64, field: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        let field = self.registry.resolve(field)?;
        if !field.is_real() {
            return Err(SchemaError::ReadOnlyField(field.name.clone()).into());
        }
        let dialect = self.conn.dialect();
        let sql = format!(
            "SELECT id, user_id, timestamp, {} FROM {} WHERE id = ?1 ORDER BY timestamp",
            dialect.quote(&field.name),
            dialect.quote(&field.history_table()),
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(HistoryRecord {
                match_id: row.get(0)?,
                user_id: row.get(1)?,
                timestamp: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Conflicts ───────────────────────────────────────────────────────────

    /// Ids of the matches recorded as conflicting with `id`, ascending.
    pub fn conflicts(&self, id: i64) -> Result<Vec<i64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT other_id FROM conflicts WHERE match_id = ?1 \
             UNION SELECT match_id FROM conflicts WHERE other_id = ?1 ORDER BY 1",
        )?;
        let rows = stmt.query_map(params![id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
    }

    /// Record that `a` and `b` conflict. Returns false if the pair was
    /// already recorded or `a == b`.
    pub fn add_conflict(&self, a: i64, b: i64) -> Result<bool, StoreError> {
        if a == b {
            return Ok(false);
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };

        let conn = self.conn.lock();
        for id in [low, high] {
            if !match_exists(&conn, id)? {
                return Err(StoreError::MatchNotFound(id));
            }
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO conflicts (match_id, other_id) VALUES (?1, ?2)",
            params![low, high],
        )?;
        Ok(inserted > 0)
    }

    // ── Batches ─────────────────────────────────────────────────────────────

    /// Run `f` inside a savepoint. If `f` fails, everything it wrote is
    /// rolled back, the field registry is re-derived and the cache cleared.
    /// `RowCountChanged` is emitted once when the outermost batch succeeds.
    pub fn batch<T, F>(&mut self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut MatchStore) -> Result<T, StoreError>,
    {
        self.require_transactions()?;
        let name = format!("fragmatch_batch_{}", self.batch_depth);
        self.conn.lock().execute_batch(&format!("SAVEPOINT {name}"))?;
        self.batch_depth += 1;

        let outcome = match f(self) {
            Ok(value) => self
                .conn
                .lock()
                .execute_batch(&format!("RELEASE {name}"))
                .map(|_| value)
                .map_err(StoreError::from),
            Err(e) => Err(e),
        };

        self.batch_depth -= 1;
        match outcome {
            Ok(value) => {
                if self.batch_depth == 0 && std::mem::take(&mut self.rows_changed) {
                    self.emit(StoreEvent::RowCountChanged);
                }
                Ok(value)
            }
            Err(e) => {
                log::warn!("Rolling back {name}: {e}");
                if let Err(rollback) = self
                    .conn
                    .lock()
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))
                {
                    log::error!("Rollback of {name} failed: {rollback}");
                }
                if self.batch_depth == 0 {
                    self.rows_changed = false;
                }
                let before = self.registry.fields();
                self.refresh_fields()?;
                if self.registry.fields() != before {
                    self.emit(StoreEvent::SchemaChanged);
                }
                Err(e)
            }
        }
    }
}

fn match_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM matches WHERE id = ?1", params![id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}
