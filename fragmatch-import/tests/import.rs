use fragmatch_db::*;
use fragmatch_import::*;

const THREE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<matches>
  <match id="1" src="wall1_f3" tgt="wall1_f8" error="0.9" status="rejected" conflict="2"/>
  <match id="2" src="wall1_f3" tgt="wall2_f1" error="0.1" volume="12.5"
         xf="1 0 0 0.5 0 1 0 0 0 0 1 0 0 0 0 1" conflict="1"/>
  <match id="3" src="wall2_f1" tgt="wall2_f9" error="0.5" conflict="1 44" rank="2"/>
</matches>
"#;

fn store() -> MatchStore {
    MatchStore::open("sqlite::memory:", StoreOptions::default()).unwrap()
}

fn import(store: &mut MatchStore, xml: &str) -> Result<ImportStats, ImportError> {
    let doc = parse_matches(xml.as_bytes())?;
    import_matches(store, &doc, &ImportOptions::default(), &SilentProgress)
}

fn ids(matches: &[Match]) -> Vec<i64> {
    matches.iter().map(|m| m.id).collect()
}

#[test]
fn import_then_sort_then_keyset() {
    let mut store = store();
    let stats = import(&mut store, THREE).unwrap();
    assert_eq!(stats.matches_created, 3);
    assert_eq!(stats.matches_updated, 0);

    let sorted = QueryParameters::new().sorted_by("error", SortOrder::Ascending);
    assert_eq!(ids(&store.get_matches(&sorted).unwrap()), vec![2, 3, 1]);

    let page = store
        .get_matches(&sorted.clone().keyset(Keyset {
            pivot_id: 2,
            pivot_value: store.attribute(2, "error").unwrap(),
            direction: Direction::Forward,
            inclusive: false,
            offset: 0,
            limit: 1,
        }))
        .unwrap();
    assert_eq!(ids(&page), vec![3]);
}

#[test]
fn standard_and_inferred_fields_are_created() {
    let mut store = store();
    let stats = import(&mut store, THREE).unwrap();

    for name in ["status", "overlap", "error", "volume", "old_volume", "rank"] {
        assert!(store.is_real_field(name), "missing {name}");
    }
    assert_eq!(stats.fields_created, 6);

    let registry = store.registry();
    assert_eq!(registry.field("status").unwrap().value_type, ValueType::Text);
    assert_eq!(registry.field("error").unwrap().value_type, ValueType::Real);
    assert_eq!(registry.field("rank").unwrap().value_type, ValueType::Integer);

    assert_eq!(
        store.attribute(2, "status").unwrap(),
        Value::Text("unknown".to_string())
    );
    assert_eq!(store.attribute(1, "volume").unwrap(), Value::Null);
    assert_eq!(store.attribute(2, "volume").unwrap(), Value::Real(12.5));
    assert_eq!(store.attribute(3, "rank").unwrap(), Value::Integer(2));

    let m = store.get_match(2).unwrap().unwrap();
    assert_eq!(m.transform, Transform::translation(0.5, 0.0, 0.0));
}

#[test]
fn conflicts_are_recorded_once_and_dangling_ones_skipped() {
    let mut store = store();
    let stats = import(&mut store, THREE).unwrap();

    // 1-2 is listed from both sides, 3-1 from one side only
    assert_eq!(stats.conflicts_created, 2);
    assert_eq!(stats.conflicts_existing, 1);
    assert_eq!(stats.conflicts_dangling, 1);
    assert_eq!(store.conflicts(1).unwrap(), vec![2, 3]);
    assert_eq!(store.conflicts(2).unwrap(), vec![1]);
    assert_eq!(store.conflicts(3).unwrap(), vec![1]);
}

#[test]
fn importing_twice_updates_instead_of_duplicating() {
    let mut store = store();
    import(&mut store, THREE).unwrap();
    let first = document_from_store(&store).unwrap();

    let stats = import(&mut store, THREE).unwrap();
    assert_eq!(stats.matches_created, 0);
    assert_eq!(stats.matches_updated, 3);
    assert_eq!(stats.fields_created, 0);
    assert_eq!(stats.conflicts_created, 0);

    assert_eq!(store.count(&Filter::new()).unwrap(), 3);
    assert_eq!(document_from_store(&store).unwrap(), first);
}

#[test]
fn reimport_overwrites_values_it_carries() {
    let mut store = store();
    import(&mut store, THREE).unwrap();
    import(
        &mut store,
        r#"<matches><match id="1" src="wall1_f3" tgt="wall1_f9" error="0.05"/></matches>"#,
    )
    .unwrap();

    let m = store.get_match(1).unwrap().unwrap();
    assert_eq!(m.target, "wall1_f9");
    assert!(m.transform.is_identity());
    assert_eq!(store.attribute(1, "error").unwrap(), Value::Real(0.05));
    // not in the second document, so untouched
    assert_eq!(
        store.attribute(1, "status").unwrap(),
        Value::Text("rejected".to_string())
    );
}

#[test]
fn matches_without_ids_get_fresh_ones() {
    let mut store = store();
    import(&mut store, THREE).unwrap();
    let stats = import(
        &mut store,
        r#"<matches><match src="a" tgt="b"/><match src="c" tgt="d" conflict="1"/></matches>"#,
    )
    .unwrap();
    assert_eq!(stats.matches_created, 2);
    assert_eq!(store.count(&Filter::new()).unwrap(), 5);

    let newest = *ids(&store.get_matches(&QueryParameters::new()).unwrap())
        .last()
        .unwrap();
    assert!(newest > 3);
    assert!(store.conflicts(1).unwrap().contains(&newest));
}

#[test]
fn failed_import_leaves_the_store_untouched() {
    let mut store = store();
    store.add_real_field("error", ValueType::Real, Value::Null).unwrap();
    store
        .add_view_field("error_pct", "SELECT id, error * 100 AS error_pct FROM error")
        .unwrap();
    let fields = store.fields();

    let err = import(
        &mut store,
        r#"<matches>
             <match id="1" src="a" tgt="b" error="0.2"/>
             <match id="2" src="c" tgt="d" error_pct="3"/>
           </matches>"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ImportError::Store(StoreError::Schema(SchemaError::ReadOnlyField(_)))
    ));
    assert_eq!(store.count(&Filter::new()).unwrap(), 0);
    assert_eq!(store.fields(), fields);
    assert!(store.options().history_enabled);
}

#[test]
fn history_is_only_recorded_on_request() {
    let mut store = store();
    import(&mut store, THREE).unwrap();
    assert!(store.history(1, "error").unwrap().is_empty());

    let doc = parse_matches(THREE.as_bytes()).unwrap();
    let options = ImportOptions {
        record_history: true,
    };
    import_matches(&mut store, &doc, &options, &LogProgress).unwrap();
    assert_eq!(store.history(1, "error").unwrap().len(), 1);
}

#[test]
fn import_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("matches.xml");
    std::fs::write(&path, THREE).unwrap();

    let mut store = store();
    let stats = import_file(&mut store, &path, &ImportOptions::default(), &SilentProgress).unwrap();
    assert_eq!(stats.total_matches, 3);

    let missing = import_file(
        &mut store,
        &dir.path().join("nope.xml"),
        &ImportOptions::default(),
        &SilentProgress,
    );
    assert!(matches!(missing, Err(ImportError::Io(_))));
}
