//! A single bounded setting with a two-phase edit.

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Static description of a setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDef {
    pub name: String,
    /// Free-form help text
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    /// Increment used by [`Setting::nudge`]; zero disables nudging
    #[serde(default)]
    pub step: f64,
}

impl SettingDef {
    pub fn new(name: &str, default: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            default,
            min,
            max,
            step,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |reason: &str| SettingsError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("empty name"));
        }
        if !(self.min.is_finite() && self.max.is_finite()) || self.min > self.max {
            return Err(invalid("bounds must be finite with min <= max"));
        }
        if !self.step.is_finite() || self.step < 0.0 {
            return Err(invalid("step must be finite and non-negative"));
        }
        if !(self.min..=self.max).contains(&self.default) {
            return Err(invalid("default lies outside the bounds"));
        }
        Ok(())
    }
}

/// A setting's committed value plus an optional pending edit.
///
/// Edits land in the pending slot and only become the value on
/// [`Setting::commit`]; [`Setting::cancel`] drops them.
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    def: SettingDef,
    value: f64,
    pending: Option<f64>,
}

impl Setting {
    pub fn new(def: SettingDef) -> Result<Self, SettingsError> {
        def.validate()?;
        Ok(Self {
            value: def.default,
            def,
            pending: None,
        })
    }

    pub fn def(&self) -> &SettingDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Committed value.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn pending(&self) -> Option<f64> {
        self.pending
    }

    /// Pending value if there is one, else the committed value.
    pub fn effective(&self) -> f64 {
        self.pending.unwrap_or(self.value)
    }

    pub fn is_default(&self) -> bool {
        self.value == self.def.default
    }

    /// Checks `value` against the bounds without changing anything.
    pub fn check(&self, value: f64) -> Result<(), SettingsError> {
        if value.is_finite() && (self.def.min..=self.def.max).contains(&value) {
            Ok(())
        } else {
            Err(SettingsError::OutOfRange {
                name: self.def.name.clone(),
                value,
                min: self.def.min,
                max: self.def.max,
            })
        }
    }

    pub fn set_pending(&mut self, value: f64) -> Result<(), SettingsError> {
        self.check(value)?;
        self.pending = Some(value);
        Ok(())
    }

    /// Moves the pending value by `steps` increments, clamped to the bounds.
    pub fn nudge(&mut self, steps: i32) {
        let target = self.effective() + f64::from(steps) * self.def.step;
        self.pending = Some(target.clamp(self.def.min, self.def.max));
    }

    /// Promotes the pending value. Returns whether anything changed.
    pub fn commit(&mut self) -> bool {
        match self.pending.take() {
            Some(value) => {
                self.value = value;
                true
            }
            None => false,
        }
    }

    /// Drops the pending value. Returns whether there was one.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn reset_to_default(&mut self) {
        self.value = self.def.default;
        self.pending = None;
    }
}
