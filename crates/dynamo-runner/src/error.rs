//! Runner errors.

use std::path::PathBuf;
use thiserror::Error;

use dynamo_core::{EngineError, TableError};
use dynamo_settings::SettingsError;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("table dataset: {0}")]
    Table(#[from] TableError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid override `{0}`: expected name=value")]
    InvalidOverride(String),

    #[error("final time {final_time} is before initial time {initial_time}")]
    InvalidHorizon { initial_time: f64, final_time: f64 },

    #[error("failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
