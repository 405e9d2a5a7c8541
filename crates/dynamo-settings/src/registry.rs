//! The settings registry and its TOML form.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::error::SettingsError;
use crate::setting::{Setting, SettingDef};

/// On-disk form: definitions plus committed values that differ from their
/// defaults.
///
/// ```toml
/// [[setting]]
/// name = "decay_rate"
/// default = 0.1
/// min = 0.0
/// max = 1.0
/// step = 0.01
///
/// [values]
/// decay_rate = 0.2
/// ```
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default, rename = "setting")]
    settings: Vec<SettingDef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<String, f64>,
}

/// Named settings in definition order.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    entries: Vec<Setting>,
    index: HashMap<String, usize>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: SettingDef) -> Result<(), SettingsError> {
        if self.index.contains_key(&def.name) {
            return Err(SettingsError::Duplicate(def.name));
        }
        let setting = Setting::new(def)?;
        self.index.insert(setting.name().to_string(), self.entries.len());
        self.entries.push(setting);
        Ok(())
    }

    pub fn setting(&self, name: &str) -> Result<&Setting, SettingsError> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| SettingsError::UnknownSetting(name.to_string()))
    }

    fn setting_mut(&mut self, name: &str) -> Result<&mut Setting, SettingsError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.entries[i]),
            None => Err(SettingsError::UnknownSetting(name.to_string())),
        }
    }

    /// Committed value of `name`.
    pub fn get(&self, name: &str) -> Result<f64, SettingsError> {
        self.setting(name).map(Setting::value)
    }

    pub fn set_pending(&mut self, name: &str, value: f64) -> Result<(), SettingsError> {
        self.setting_mut(name)?.set_pending(value)
    }

    pub fn nudge(&mut self, name: &str, steps: i32) -> Result<(), SettingsError> {
        self.setting_mut(name)?.nudge(steps);
        Ok(())
    }

    pub fn commit(&mut self, name: &str) -> Result<bool, SettingsError> {
        let changed = self.setting_mut(name)?.commit();
        if changed {
            debug!(setting = name, value = self.get(name)?, "setting committed");
        }
        Ok(changed)
    }

    pub fn cancel(&mut self, name: &str) -> Result<bool, SettingsError> {
        Ok(self.setting_mut(name)?.cancel())
    }

    /// Commits every pending edit. Returns how many were committed.
    pub fn commit_all(&mut self) -> usize {
        let committed = self.entries.iter_mut().map(Setting::commit).filter(|&c| c).count();
        if committed > 0 {
            debug!(committed, "pending settings committed");
        }
        committed
    }

    /// Drops every pending edit. Returns how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        self.entries.iter_mut().map(Setting::cancel).filter(|&c| c).count()
    }

    pub fn reset_to_defaults(&mut self) {
        for setting in &mut self.entries {
            setting.reset_to_default();
        }
    }

    pub fn has_pending(&self) -> bool {
        self.entries.iter().any(|s| s.pending().is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets and commits every override, or none of them if any name is
    /// unknown or any value out of range. Other pending edits are kept.
    pub fn apply_overrides<'a, I>(&mut self, overrides: I) -> Result<(), SettingsError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let overrides: Vec<(&str, f64)> = overrides.into_iter().collect();
        for &(name, value) in &overrides {
            self.setting(name)?.check(value)?;
        }

        for &(name, value) in &overrides {
            let setting = self.setting_mut(name)?;
            let kept = setting.pending();
            setting.set_pending(value)?;
            setting.commit();
            if let Some(kept) = kept {
                setting.set_pending(kept)?;
            }
        }
        if !overrides.is_empty() {
            info!(count = overrides.len(), "settings overridden");
        }
        Ok(())
    }

    /// Parses definitions and committed values from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let document: SettingsDocument = toml::from_str(content)?;
        let mut settings = Self::new();
        for def in document.settings {
            settings.define(def)?;
        }
        settings.apply_overrides(document.values.iter().map(|(k, &v)| (k.as_str(), v)))?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serializes definitions and non-default committed values. Pending
    /// edits are not written.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        let document = SettingsDocument {
            settings: self.entries.iter().map(|s| s.def().clone()).collect(),
            values: self
                .entries
                .iter()
                .filter(|s| !s.is_default())
                .map(|s| (s.name().to_string(), s.value()))
                .collect(),
        };
        Ok(toml::to_string_pretty(&document)?)
    }
}
