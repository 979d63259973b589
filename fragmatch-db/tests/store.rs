use std::sync::{Arc, Mutex};

use fragmatch_db::*;

fn store() -> MatchStore {
    MatchStore::open("sqlite::memory:", StoreOptions::default()).unwrap()
}

fn add(store: &mut MatchStore, n: usize) -> Vec<i64> {
    (0..n)
        .map(|i| {
            store
                .add_match(
                    &format!("frag{i}a"),
                    &format!("frag{i}b"),
                    &Transform::translation(i as f64, 0.0, 0.0),
                    None,
                )
                .unwrap()
                .id
        })
        .collect()
}

#[derive(Default)]
struct Recorder(Mutex<Vec<StoreEvent>>);

impl StoreObserver for Recorder {
    fn on_event(&self, event: &StoreEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl Recorder {
    fn events(&self) -> Vec<StoreEvent> {
        self.0.lock().unwrap().clone()
    }
}

#[test]
fn add_and_get_match() {
    let mut store = store();
    let m = store
        .add_match("wall1", "wall7", &Transform::translation(1.0, 2.0, 3.0), None)
        .unwrap();

    let fetched = store.get_match(m.id).unwrap().unwrap();
    assert_eq!(fetched, m);
    assert_eq!(fetched.transform.get(0, 3), 1.0);
    assert_eq!(fetched.transform.get(2, 3), 3.0);
    assert!(store.get_match(m.id + 100).unwrap().is_none());
}

#[test]
fn explicit_ids_are_kept_and_never_duplicated() {
    let mut store = store();
    let m = store
        .add_match("a", "b", &Transform::IDENTITY, Some(42))
        .unwrap();
    assert_eq!(m.id, 42);

    let err = store
        .add_match("c", "d", &Transform::IDENTITY, Some(42))
        .unwrap_err();
    assert!(matches!(err, StoreError::Schema(SchemaError::DuplicateId(42))));

    let next = store.add_match("c", "d", &Transform::IDENTITY, None).unwrap();
    assert!(next.id > 42);
    assert_eq!(store.count(&Filter::new()).unwrap(), 2);
}

#[test]
fn adding_a_real_field_backfills_existing_matches() {
    let mut store = store();
    let ids = add(&mut store, 3);
    store
        .add_real_field("score", ValueType::Real, 1.5)
        .unwrap();

    assert!(store.is_real_field("SCORE"));
    let matches = store
        .get_matches(&QueryParameters::new().with_preload(["score"]))
        .unwrap();
    assert_eq!(matches.len(), 3);
    for m in &matches {
        assert!(ids.contains(&m.id));
        assert_eq!(m.cached("score"), Some(Value::Real(1.5)));
    }

    // matches added afterwards get the default too
    let later = store.add_match("x", "y", &Transform::IDENTITY, None).unwrap();
    store.refresh_fields().unwrap();
    assert_eq!(store.attribute(later.id, "score").unwrap(), Value::Real(1.5));
}

#[test]
fn set_then_get_returns_the_written_value() {
    let mut store = store();
    let ids = add(&mut store, 2);
    store
        .add_real_field("status", ValueType::Text, "unknown")
        .unwrap();

    store.set_attribute(ids[0], "status", "confirmed").unwrap();
    assert_eq!(
        store.attribute(ids[0], "status").unwrap(),
        Value::Text("confirmed".to_string())
    );
    assert_eq!(store.stats().single_row_fetches(), 0);

    // a cold cache goes to the backend exactly once
    store.cache().clear();
    assert_eq!(
        store.attribute(ids[0], "Status").unwrap(),
        Value::Text("confirmed".to_string())
    );
    assert_eq!(
        store.attribute(ids[0], "status").unwrap(),
        Value::Text("confirmed".to_string())
    );
    assert_eq!(store.stats().single_row_fetches(), 1);

    assert_eq!(
        store.attribute(ids[1], "status").unwrap(),
        Value::Text("unknown".to_string())
    );
}

#[test]
fn writes_are_coerced_to_the_field_type() {
    let mut store = store();
    let ids = add(&mut store, 1);
    store.add_real_field("error", ValueType::Real, Value::Null).unwrap();

    store.set_attribute(ids[0], "error", 2_i64).unwrap();
    assert_eq!(store.attribute(ids[0], "error").unwrap(), Value::Real(2.0));
    store.cache().clear();
    assert_eq!(store.attribute(ids[0], "error").unwrap(), Value::Real(2.0));
}

#[test]
fn refetching_a_match_invalidates_its_cache() {
    let mut store = store();
    let ids = add(&mut store, 1);
    store.add_real_field("error", ValueType::Real, 0.0).unwrap();
    store.set_attribute(ids[0], "error", 0.25).unwrap();

    let m = store.get_match(ids[0]).unwrap().unwrap();
    assert_eq!(m.cached("error"), None);
    assert_eq!(store.attribute(ids[0], "error").unwrap(), Value::Real(0.25));
    assert_eq!(m.cached("error"), Some(Value::Real(0.25)));
}

#[test]
fn set_attribute_rejects_bad_targets() {
    let mut store = store();
    let ids = add(&mut store, 1);
    store.add_real_field("error", ValueType::Real, 0.0).unwrap();
    store
        .add_view_field("error_pct", "SELECT id, error * 100 AS error_pct FROM error")
        .unwrap();

    assert!(matches!(
        store.set_attribute(ids[0], "nope", 1.0).unwrap_err(),
        StoreError::Schema(SchemaError::UnknownField(_))
    ));
    assert!(matches!(
        store.set_attribute(ids[0], "error_pct", 1.0).unwrap_err(),
        StoreError::Schema(SchemaError::ReadOnlyField(_))
    ));
    assert!(matches!(
        store.set_attribute(999, "error", 1.0).unwrap_err(),
        StoreError::MatchNotFound(999)
    ));
}

#[test]
fn view_fields_are_readable_and_sortable() {
    let mut store = store();
    let ids = add(&mut store, 3);
    store.add_real_field("error", ValueType::Real, 0.0).unwrap();
    for (id, e) in ids.iter().zip([0.3, 0.1, 0.2]) {
        store.set_attribute(*id, "error", e).unwrap();
    }
    store
        .add_view_field("error_pct", "SELECT id, error * 100 AS error_pct FROM error")
        .unwrap();
    assert!(store.fields().contains("error_pct"));
    assert!(!store.is_real_field("error_pct"));

    let sorted: Vec<i64> = store
        .get_matches(&QueryParameters::new().sorted_by("error_pct", SortOrder::Descending))
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(sorted, vec![ids[0], ids[2], ids[1]]);
    assert_eq!(
        store.attribute(ids[1], "error_pct").unwrap(),
        Value::Real(10.0)
    );
}

#[test]
fn invalid_view_leaves_no_trace() {
    let mut store = store();
    store.add_real_field("error", ValueType::Real, 0.0).unwrap();
    let before = store.fields();

    let err = store
        .add_view_field("broken", "SELECT id, error FROM error")
        .unwrap_err();
    assert!(matches!(err, StoreError::Schema(SchemaError::InvalidView(_))));
    assert_eq!(store.fields(), before);

    let exists: i64 = store
        .connection()
        .lock()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'broken'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 0);
}

#[test]
fn removing_an_unknown_field_changes_nothing() {
    let mut store = store();
    store.add_real_field("error", ValueType::Real, 0.0).unwrap();
    let before = store.fields();

    let err = store.remove_field("volume").unwrap_err();
    assert!(matches!(err, StoreError::Schema(SchemaError::UnknownField(_))));
    assert_eq!(store.fields(), before);
}

#[test]
fn colliding_names_fail_without_ddl() {
    let mut store = store();
    store.add_real_field("error", ValueType::Real, 0.0).unwrap();
    let relations = |store: &MatchStore| -> i64 {
        store
            .connection()
            .lock()
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))
            .unwrap()
    };
    let before = relations(&store);

    let err = store
        .add_real_field("ERROR", ValueType::Text, Value::Null)
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Schema(SchemaError::Collision { .. })
    ));
    let err = store
        .add_view_field("Error", "SELECT id, 1 AS Error FROM matches")
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Schema(SchemaError::Collision { .. })
    ));
    assert_eq!(relations(&store), before);
}

#[test]
fn remove_field_drops_table_and_history() {
    let mut store = store();
    let ids = add(&mut store, 1);
    store.add_real_field("volume", ValueType::Real, 0.0).unwrap();
    store.set_attribute(ids[0], "volume", 3.0).unwrap();

    let removed = store.remove_field("Volume").unwrap();
    assert_eq!(removed.name, "volume");
    assert!(!store.fields().contains("volume"));

    let leftovers: i64 = store
        .connection()
        .lock()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'volume%'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(leftovers, 0);
    assert!(store.attribute(ids[0], "volume").is_err());
}

#[test]
fn history_records_every_write_in_order() {
    let conn = ConnectionManager::global().open_url("sqlite::memory:").unwrap();
    let mut store = MatchStore::new(conn, StoreOptions::new().user("curator")).unwrap();
    let ids = add(&mut store, 1);
    store.add_real_field("status", ValueType::Text, "unknown").unwrap();

    for status in ["maybe", "yes", "no"] {
        store.set_attribute(ids[0], "status", status).unwrap();
    }
    let history = store.history(ids[0], "status").unwrap();
    let values: Vec<String> = history.iter().map(|h| h.value.to_string()).collect();
    assert_eq!(values, vec!["maybe", "yes", "no"]);
    assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(history.iter().all(|h| h.user_id.as_deref() == Some("curator")));
    assert!(history.iter().all(|h| h.match_id == ids[0]));

    store.set_history_enabled(false);
    store.set_attribute(ids[0], "status", "maybe").unwrap();
    assert_eq!(store.history(ids[0], "status").unwrap().len(), 3);
}

#[test]
fn failed_history_write_does_not_fail_the_value_write() {
    let mut store = store();
    let ids = add(&mut store, 1);
    store.add_real_field("error", ValueType::Real, Value::Null).unwrap();
    store
        .connection()
        .lock()
        .execute_batch("DROP TABLE error_history")
        .unwrap();

    store.set_attribute(ids[0], "error", 0.4).unwrap();
    assert_eq!(store.cache().get(ids[0], "error"), Some(Value::Real(0.4)));

    // refetching drops the cache, so this read goes to the backend
    store.get_match(ids[0]).unwrap();
    let fetches = store.stats().single_row_fetches();
    assert_eq!(store.attribute(ids[0], "error").unwrap(), Value::Real(0.4));
    assert_eq!(store.stats().single_row_fetches(), fetches + 1);
}

#[test]
fn rejected_writes_report_the_statement() {
    let mut store = store();
    let ids = add(&mut store, 1);
    store.add_real_field("error", ValueType::Real, Value::Null).unwrap();
    store
        .connection()
        .lock()
        .execute_batch("DROP TABLE error_history; DROP TABLE error")
        .unwrap();

    match store.set_attribute(ids[0], "error", 0.4) {
        Err(StoreError::Query(QueryError::Backend { sql, .. })) => {
            assert!(sql.starts_with("UPDATE \"error\""), "{sql}");
        }
        other => panic!("expected a backend error, got {other:?}"),
    }
    assert_eq!(store.cache().get(ids[0], "error"), None);
}

#[test]
fn conflicts_are_undirected() {
    let mut store = store();
    let ids = add(&mut store, 3);

    assert!(store.add_conflict(ids[1], ids[0]).unwrap());
    assert!(!store.add_conflict(ids[0], ids[1]).unwrap());
    assert!(store.add_conflict(ids[0], ids[2]).unwrap());
    assert!(!store.add_conflict(ids[2], ids[2]).unwrap());

    assert_eq!(store.conflicts(ids[0]).unwrap(), vec![ids[1], ids[2]]);
    assert_eq!(store.conflicts(ids[1]).unwrap(), vec![ids[0]]);
    assert!(matches!(
        store.add_conflict(ids[0], 999).unwrap_err(),
        StoreError::MatchNotFound(999)
    ));
}

#[test]
fn failed_batch_rolls_back_rows_and_fields() {
    let mut store = store();
    add(&mut store, 1);

    let result: Result<(), StoreError> = store.batch(|s| {
        s.add_real_field("error", ValueType::Real, 0.0)?;
        s.add_match("x", "y", &Transform::IDENTITY, Some(77))?;
        Err(StoreError::MatchNotFound(0))
    });
    assert!(result.is_err());
    assert!(!store.fields().contains("error"));
    assert!(store.get_match(77).unwrap().is_none());
    assert_eq!(store.count(&Filter::new()).unwrap(), 1);

    let n = store
        .batch(|s| {
            s.add_real_field("error", ValueType::Real, 0.0)?;
            s.add_match("x", "y", &Transform::IDENTITY, Some(77))?;
            s.count(&Filter::new())
        })
        .unwrap();
    assert_eq!(n, 2);
    assert!(store.fields().contains("error"));
}

#[test]
fn observers_see_schema_and_row_count_changes() {
    let mut store = store();
    let recorder = Arc::new(Recorder::default());
    store.subscribe(recorder.clone());

    store.add_real_field("error", ValueType::Real, 0.0).unwrap();
    add(&mut store, 1);
    store
        .batch(|s| {
            add(s, 5);
            Ok(())
        })
        .unwrap();
    store.remove_field("error").unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            StoreEvent::SchemaChanged,
            StoreEvent::RowCountChanged,
            StoreEvent::RowCountChanged,
            StoreEvent::SchemaChanged,
        ]
    );
}

#[test]
fn count_joins_only_what_the_filter_needs() {
    let mut store = store();
    let ids = add(&mut store, 4);
    store.add_real_field("error", ValueType::Real, 1.0).unwrap();
    store.add_real_field("volume", ValueType::Real, 0.0).unwrap();
    store.set_attribute(ids[0], "error", 0.1).unwrap();
    store.set_attribute(ids[1], "error", 0.2).unwrap();
    store.set_attribute(ids[1], "volume", 5.0).unwrap();

    let mut filter = store.filter();
    filter.set_filter("err", "error < 0.5");
    assert_eq!(store.count(&filter).unwrap(), 2);
    filter.set_filter("vol", "volume > 1");
    assert_eq!(store.count(&filter).unwrap(), 1);
    filter.remove_filter("err");
    assert_eq!(store.count(&filter).unwrap(), 1);
    assert_eq!(store.count(&Filter::new()).unwrap(), 4);
}
