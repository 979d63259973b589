use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::CliError;
use crate::settings::{Settings, settings_path};

/// Show the settings in effect and where the store resolves to.
pub(crate) fn run_config_show(settings: &Settings, db: &str) -> Result<(), CliError> {
    let path = settings_path();

    log::info!(
        "{}",
        "fragmatch Configuration".if_supports_color(Stdout, |t| t.bold()),
    );
    crate::log_blank();

    if path.exists() {
        log::info!(
            "  Settings file: {} {}",
            path.display().if_supports_color(Stdout, |t| t.cyan()),
            "(exists)".if_supports_color(Stdout, |t| t.green()),
        );
    } else {
        log::info!(
            "  Settings file: {} {}",
            path.display().if_supports_color(Stdout, |t| t.cyan()),
            "(not found, using defaults)".if_supports_color(Stdout, |t| t.dimmed()),
        );
    }
    log::info!("  Store:         {}", db);
    crate::log_blank();

    for line in settings.to_toml()?.lines() {
        log::info!("  {}", line);
    }
    Ok(())
}

pub(crate) fn run_config_path() -> Result<(), CliError> {
    log::info!("{}", settings_path().display());
    Ok(())
}
