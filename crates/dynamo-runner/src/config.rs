//! Run configuration.
//!
//! A run is described by a TOML file with a `[run]` section and an optional
//! `[settings]` table of model setting overrides. Command-line flags are
//! applied on top.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use dynamo_core::DiagnosticsMode;

use crate::models::ModelKind;

/// Complete run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// What to run and for how long
    #[serde(default)]
    pub run: RunSection,
    /// Setting overrides, committed before the model is built
    #[serde(default)]
    pub settings: BTreeMap<String, f64>,
}

impl RunConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parses configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Time step: configured, else the model's default.
    pub fn dt(&self) -> f64 {
        self.run.dt.unwrap_or_else(|| self.run.model.default_dt())
    }

    /// Final time: configured, else the model's default horizon past the
    /// initial time.
    pub fn final_time(&self) -> f64 {
        self.run
            .final_time
            .unwrap_or_else(|| self.run.initial_time + self.run.model.default_final_time())
    }

    /// Series to report: configured, else the model's defaults.
    pub fn series(&self) -> Vec<String> {
        if self.run.series.is_empty() {
            self.run
                .model
                .default_series()
                .iter()
                .map(|name| name.to_string())
                .collect()
        } else {
            self.run.series.clone()
        }
    }
}

/// The `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub model: ModelKind,
    /// Fixed time step; the model's default when absent
    pub dt: Option<f64>,
    pub initial_time: f64,
    /// The model's default horizon when absent
    pub final_time: Option<f64>,
    /// Where to write the JSON export, if anywhere
    pub output: Option<PathBuf>,
    /// Quantities to report; the model's defaults when empty
    pub series: Vec<String>,
    pub diagnostics: DiagnosticsMode,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            model: ModelKind::default(),
            dt: None,
            initial_time: 0.0,
            final_time: None,
            output: None,
            series: Vec::new(),
            diagnostics: DiagnosticsMode::ALL,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Generates a default configuration file content.
pub fn default_config_toml() -> String {
    r#"# dynamo_run configuration

[run]
# decay | inventory
model = "inventory"
# dt = 0.25            # defaults to the model's step
initial_time = 0.0
# final_time = 50.0    # defaults to the model's horizon
# output = "run.json"
series = []            # empty: the model's default series

[run.diagnostics]
enabled = true
check_order = true

# Model setting overrides, by name
[settings]
# demand_step = 40.0
"#
    .to_string()
}
