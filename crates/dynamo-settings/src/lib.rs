//! Configuration registry for model parameters.
//!
//! Settings are named, bounded scalars. Edits are two-phase: a value is first
//! staged as pending, then committed or cancelled, one setting at a time or
//! across the whole registry. Definitions and committed values load from and
//! save to TOML.

pub mod error;
pub mod registry;
pub mod setting;

pub use error::SettingsError;
pub use registry::Settings;
pub use setting::{Setting, SettingDef};
