//! Settings registry errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting `{0}`")]
    UnknownSetting(String),

    #[error("setting `{0}` is defined more than once")]
    Duplicate(String),

    #[error("value {value} for `{name}` is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("setting `{name}` is malformed: {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
