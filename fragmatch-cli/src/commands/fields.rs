use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use fragmatch_db::{FieldKind, Value, ValueType};

use crate::CliError;
use crate::settings::Settings;

use super::open_store;

pub(crate) fn run_fields_list(db: &str, settings: &Settings) -> Result<(), CliError> {
    let store = open_store(db, settings)?;
    let registry = store.registry();

    if registry.is_empty() {
        log::info!("No fields defined.");
        return Ok(());
    }

    log::info!(
        "{}",
        format!("{:<24} {:<6} {:<8} {}", "Field", "Kind", "Type", "Default")
            .if_supports_color(Stdout, |t| t.bold()),
    );
    for field in registry.iter() {
        let kind = match field.kind {
            FieldKind::Real => "real",
            FieldKind::View => "view",
        };
        let default = if field.default.is_null() {
            "NULL".to_string()
        } else {
            field.default.to_string()
        };
        log::info!(
            "{:<24} {:<6} {:<8} {}",
            field.name,
            kind,
            field.value_type.as_str(),
            default.if_supports_color(Stdout, |t| t.dimmed()),
        );
    }
    Ok(())
}

pub(crate) fn run_fields_add_real(
    db: &str,
    settings: &Settings,
    name: &str,
    value_type: ValueType,
    default: Option<&str>,
) -> Result<(), CliError> {
    let mut store = open_store(db, settings)?;
    let default = default
        .map(|raw| Value::parse_as(raw, value_type))
        .unwrap_or(Value::Null);
    store.add_real_field(name, value_type, default)?;
    log::info!(
        "{} real field {} ({})",
        "Added".if_supports_color(Stdout, |t| t.green()),
        name.if_supports_color(Stdout, |t| t.bold()),
        value_type,
    );
    Ok(())
}

pub(crate) fn run_fields_add_view(
    db: &str,
    settings: &Settings,
    name: &str,
    select: &str,
) -> Result<(), CliError> {
    let mut store = open_store(db, settings)?;
    store.add_view_field(name, select)?;
    log::info!(
        "{} view field {}",
        "Added".if_supports_color(Stdout, |t| t.green()),
        name.if_supports_color(Stdout, |t| t.bold()),
    );
    Ok(())
}

pub(crate) fn run_fields_remove(db: &str, settings: &Settings, name: &str) -> Result<(), CliError> {
    let mut store = open_store(db, settings)?;
    let removed = store.remove_field(name)?;
    if removed.is_real() {
        log::info!(
            "{} field {} and its history",
            "Removed".if_supports_color(Stdout, |t| t.yellow()),
            removed.name,
        );
    } else {
        log::info!(
            "{} view field {}",
            "Removed".if_supports_color(Stdout, |t| t.yellow()),
            removed.name,
        );
    }
    Ok(())
}
