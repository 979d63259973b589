//! fragmatch CLI
//!
//! Command-line interface for curating pairwise fragment matches.

mod cli_types;
mod commands;
mod error;
mod settings;

use std::io::Write;

use clap::Parser;

use cli_types::{Cli, Commands, ConfigAction, FieldsAction};
pub(crate) use error::CliError;
use settings::Settings;

/// Print an empty line through the logger so `--quiet` suppresses it too.
pub(crate) fn log_blank() {
    log::info!("");
}

fn init_logging(quiet: bool, verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else if quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if !verbose {
        // Plain output for normal use; warnings and errors keep their level tag.
        builder.format(|buf, record| match record.level() {
            log::Level::Info => writeln!(buf, "{}", record.args()),
            level => writeln!(buf, "{}: {}", level, record.args()),
        });
    }
    builder.parse_default_env();
    builder.init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    if let Err(e) = run(cli) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = Settings::load()?;
    let db = settings.database_url(cli.db.as_deref());

    match cli.command {
        Commands::Init { schema } => commands::transfer::run_init(&db, schema.as_deref()),
        Commands::Import { file, history } => {
            commands::transfer::run_import(&db, &settings, &file, history)
        }
        Commands::Export { file } => commands::transfer::run_export(&db, &settings, &file),
        Commands::Fields { action } => match action {
            FieldsAction::List => commands::fields::run_fields_list(&db, &settings),
            FieldsAction::AddReal {
                name,
                value_type,
                default,
            } => commands::fields::run_fields_add_real(
                &db,
                &settings,
                &name,
                value_type,
                default.as_deref(),
            ),
            FieldsAction::AddView { name, select } => {
                commands::fields::run_fields_add_view(&db, &settings, &name, &select)
            }
            FieldsAction::Remove { name } => {
                commands::fields::run_fields_remove(&db, &settings, &name)
            }
        },
        Commands::List {
            sort,
            desc,
            filter,
            offset,
            limit,
            fields,
        } => commands::matches::run_list(
            &db,
            &settings,
            commands::matches::ListArgs {
                sort,
                descending: desc,
                filters: filter.filters,
                offset,
                limit,
                fields,
            },
        ),
        Commands::Show { id } => commands::matches::run_show(&db, &settings, id),
        Commands::Set { id, field, value } => {
            commands::matches::run_set(&db, &settings, id, &field, &value)
        }
        Commands::History { id, field } => {
            commands::matches::run_history(&db, &settings, id, &field)
        }
        Commands::Count { filter } => commands::matches::run_count(&db, &settings, &filter.filters),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::run_config_show(&settings, &db),
            ConfigAction::Path => commands::config::run_config_path(),
        },
    }
}
