//! Model-definition layer and run driver for the dynamo engine.
//!
//! Provides the built-in models, the bundled table dataset, run
//! configuration, and the export written at the end of a run. The
//! `dynamo_run` binary is a thin CLI over [`run`].

pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod tables;

pub use config::{default_config_toml, ConfigError, RunConfig, RunSection};
pub use error::RunError;
pub use export::{RunExport, SeriesSummary};
pub use models::{BuildOptions, ModelKind};

use tracing::info;

/// Parses a `name=value` setting override.
pub fn parse_override(text: &str) -> Result<(String, f64), RunError> {
    let invalid = || RunError::InvalidOverride(text.to_string());
    let (name, value) = text.split_once('=').ok_or_else(invalid)?;
    let name = name.trim();
    let value: f64 = value.trim().parse().map_err(|_| invalid())?;
    if name.is_empty() {
        return Err(invalid());
    }
    Ok((name.to_string(), value))
}

/// Builds, starts, and runs the configured model to its final time.
///
/// Config-file setting overrides are applied first; `edits` are then staged
/// as pending edits and committed together before the model is built.
pub fn run(config: &RunConfig, edits: &[(String, f64)]) -> Result<RunExport, RunError> {
    let model = config.run.model;
    let tables = tables::bundled()?;

    let mut settings = model.default_settings()?;
    settings.apply_overrides(config.settings.iter().map(|(name, &value)| (name.as_str(), value)))?;
    for (name, value) in edits {
        if let Err(error) = settings.set_pending(name, *value) {
            settings.cancel_all();
            return Err(error.into());
        }
    }
    settings.commit_all();

    let initial_time = config.run.initial_time;
    let final_time = config.final_time();
    if final_time < initial_time {
        return Err(RunError::InvalidHorizon {
            initial_time,
            final_time,
        });
    }

    let options = BuildOptions {
        initial_time,
        diagnostics: config.run.diagnostics,
    };
    let mut scheduler = model.build(&settings, tables, options)?;
    scheduler.start(config.dt())?;
    let ticks = scheduler.run_until(final_time)?;

    let findings = scheduler.findings().len();
    info!(model = %model, ticks, time = scheduler.time(), findings, "run complete");

    let names = config.series();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    RunExport::capture(model, &scheduler, &settings, &names)
}
