use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use fragmatch_db::{Filter, MatchStore, QueryParameters, SortOrder, Value};

use crate::CliError;
use crate::settings::Settings;

use super::open_store;

pub(crate) struct ListArgs {
    pub sort: Option<String>,
    pub descending: bool,
    pub filters: Vec<String>,
    pub offset: u64,
    pub limit: u64,
    pub fields: Vec<String>,
}

/// Store filter with one entry per `--filter` clause.
fn build_filter(store: &MatchStore, clauses: &[String]) -> Filter {
    let mut filter = store.filter();
    for (i, clause) in clauses.iter().enumerate() {
        filter.set_filter(format!("arg{}", i + 1), clause.as_str());
    }
    filter
}

fn display_value(value: &Value) -> String {
    if value.is_null() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

pub(crate) fn run_list(db: &str, settings: &Settings, args: ListArgs) -> Result<(), CliError> {
    let store = open_store(db, settings)?;

    let mut columns = args.fields.clone();
    if let Some(sort) = &args.sort {
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(sort)) {
            columns.insert(0, sort.clone());
        }
    }

    let mut params = QueryParameters::new()
        .with_preload(columns.iter().cloned())
        .with_filter(build_filter(&store, &args.filters))
        .window(args.offset, args.limit);
    if let Some(sort) = &args.sort {
        let order = if args.descending {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        };
        params = params.sorted_by(sort.as_str(), order);
    }

    let rows = store.get_matches(&params)?;
    if rows.is_empty() {
        log::info!("No matches.");
        return Ok(());
    }

    let mut header = format!("{:>8}  {:<20} {:<20}", "id", "source", "target");
    for column in &columns {
        header.push_str(&format!(" {:<12}", column));
    }
    log::info!("{}", header.if_supports_color(Stdout, |t| t.bold()));

    for m in &rows {
        let mut line = format!("{:>8}  {:<20} {:<20}", m.id, m.source, m.target);
        for column in &columns {
            let value = match m.cached(column) {
                Some(value) => value,
                None => store.attribute(m.id, column)?,
            };
            line.push_str(&format!(" {:<12}", display_value(&value)));
        }
        log::info!("{}", line);
    }

    log::debug!(
        "{} select(s), {} single-row fetch(es)",
        store.stats().selects(),
        store.stats().single_row_fetches(),
    );
    Ok(())
}

pub(crate) fn run_show(db: &str, settings: &Settings, id: i64) -> Result<(), CliError> {
    let store = open_store(db, settings)?;
    let Some(m) = store.get_match(id)? else {
        return Err(CliError::invalid_argument(format!("No match with id {}", id)));
    };

    log::info!(
        "{}",
        format!("Match {}", m.id).if_supports_color(Stdout, |t| t.bold()),
    );
    log::info!("  Source:     {}", m.source);
    log::info!("  Target:     {}", m.target);
    if m.transform.is_identity() {
        log::info!("  Transform:  identity");
    } else {
        log::info!("  Transform:  {}", m.transform);
    }

    let names = store.registry().names();
    if !names.is_empty() {
        crate::log_blank();
        let width = names.iter().map(String::len).max().unwrap_or(0);
        for name in &names {
            let value = store.attribute(id, name)?;
            log::info!(
                "  {:<width$}  {}",
                name.as_str().if_supports_color(Stdout, |t| t.cyan()),
                display_value(&value),
                width = width,
            );
        }
    }

    let conflicts = store.conflicts(id)?;
    if !conflicts.is_empty() {
        crate::log_blank();
        let list: Vec<String> = conflicts.iter().map(i64::to_string).collect();
        log::info!(
            "  {} {}",
            "Conflicts:".if_supports_color(Stdout, |t| t.yellow()),
            list.join(", "),
        );
    }
    Ok(())
}

pub(crate) fn run_set(
    db: &str,
    settings: &Settings,
    id: i64,
    field: &str,
    raw: &str,
) -> Result<(), CliError> {
    let store = open_store(db, settings)?;
    let value = match store.registry().field(field) {
        Some(f) => Value::parse_as(raw, f.value_type),
        None => Value::infer(raw),
    };
    store.set_attribute(id, field, value.clone())?;
    log::info!(
        "{} {}.{} = {}",
        "Set".if_supports_color(Stdout, |t| t.green()),
        id,
        field,
        display_value(&value),
    );
    Ok(())
}

pub(crate) fn run_history(
    db: &str,
    settings: &Settings,
    id: i64,
    field: &str,
) -> Result<(), CliError> {
    let store = open_store(db, settings)?;
    let records = store.history(id, field)?;
    if records.is_empty() {
        log::info!("No history for {}.{}", id, field);
        return Ok(());
    }

    log::info!(
        "{}",
        format!("History of {} on match {}", field, id).if_supports_color(Stdout, |t| t.bold()),
    );
    for record in &records {
        let when = chrono::DateTime::from_timestamp_micros(record.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| record.timestamp.to_string());
        log::info!(
            "  {}  {:<12} {}",
            when.if_supports_color(Stdout, |t| t.dimmed()),
            record.user_id.as_deref().unwrap_or("-"),
            display_value(&record.value),
        );
    }
    Ok(())
}

pub(crate) fn run_count(db: &str, settings: &Settings, filters: &[String]) -> Result<(), CliError> {
    let store = open_store(db, settings)?;
    let count = store.count(&build_filter(&store, filters))?;
    log::info!("{}", count);
    Ok(())
}
