//! Piecewise-linear lookup tables.
//!
//! A [`Table`] samples a curve over a uniform domain. [`TableSet`] holds the
//! named curves a model draws from, and can be installed once as the
//! process-wide read-only dataset.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Slack applied when counting samples, so a domain like `0.0..=0.3` by `0.1`
/// yields four samples despite `0.3 / 0.1` rounding just below three.
const SAMPLE_EPSILON: f64 = 1e-9;

static SHARED: OnceLock<TableSet> = OnceLock::new();

/// Errors produced while building or looking up tables.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid domain: min {min}, max {max}, step {step}")]
    InvalidDomain { min: f64, max: f64, step: f64 },

    #[error("domain needs {expected} values, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("unknown table function `{0}`")]
    UnknownFunction(String),

    #[error("table function `{0}` is defined more than once")]
    DuplicateFunction(String),

    #[error("failed to parse table dataset: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A curve sampled at `min, min + step, ...`. When `max` does not fall on a
/// sample, the last sample point bounds the curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    min: f64,
    max: f64,
    step: f64,
    values: Vec<f64>,
}

impl Table {
    /// Builds a table, rejecting a value array whose length does not match
    /// the domain sampling.
    pub fn new(min: f64, max: f64, step: f64, values: Vec<f64>) -> Result<Self, TableError> {
        let finite = min.is_finite() && max.is_finite() && step.is_finite();
        if !finite || step <= 0.0 || max < min {
            return Err(TableError::InvalidDomain { min, max, step });
        }

        let expected = Self::sample_count(min, max, step);
        if values.len() != expected {
            return Err(TableError::LengthMismatch {
                expected,
                actual: values.len(),
            });
        }

        Ok(Self {
            min,
            max,
            step,
            values,
        })
    }

    /// Number of samples a domain requires: `floor((max - min) / step) + 1`.
    pub fn sample_count(min: f64, max: f64, step: f64) -> usize {
        ((max - min) / step + SAMPLE_EPSILON).floor() as usize + 1
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Position of the last sample, `min + (len - 1) * step`.
    pub fn last_sample(&self) -> f64 {
        self.min + (self.values.len() - 1) as f64 * self.step
    }

    /// Looks up `x`, clamping outside the sampled range and interpolating
    /// linearly between the two bracketing samples inside it.
    ///
    /// A NaN source yields NaN.
    pub fn lookup(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        let last = self.values.len() - 1;
        if x <= self.min || last == 0 {
            return self.values[0];
        }
        if x >= self.last_sample() {
            return self.values[last];
        }

        let index = (((x - self.min) / self.step).floor() as usize).min(last - 1);
        let lower = self.min + index as f64 * self.step;
        let fraction = (x - lower) / self.step;
        let (a, b) = (self.values[index], self.values[index + 1]);
        a + fraction * (b - a)
    }
}

/// One named curve in a serialized dataset.
#[derive(Debug, Clone, Deserialize)]
struct TableEntry {
    name: String,
    min: f64,
    max: f64,
    step: f64,
    values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct TableDocument {
    functions: Vec<TableEntry>,
}

/// Named tables with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    tables: HashMap<String, Table>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a dataset of the form `{"functions": [{"name", "min", "max",
    /// "step", "values"}, ...]}`.
    pub fn from_json(content: &str) -> Result<Self, TableError> {
        let document: TableDocument = serde_json::from_str(content)?;
        let mut set = Self::new();
        for entry in document.functions {
            let table = Table::new(entry.min, entry.max, entry.step, entry.values)?;
            set.insert(&entry.name, table)?;
        }
        Ok(set)
    }

    /// Adds a table; names differing only in case collide.
    pub fn insert(&mut self, name: &str, table: Table) -> Result<(), TableError> {
        let key = name.to_lowercase();
        if self.tables.contains_key(&key) {
            return Err(TableError::DuplicateFunction(name.to_string()));
        }
        self.tables.insert(key, table);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Table, TableError> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| TableError::UnknownFunction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Sorted (lowercased) table names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the process-wide dataset, loading it with `init` on first use.
    ///
    /// The dataset is never mutated after it is installed, so every scheduler
    /// in the process may read it concurrently.
    pub fn global(
        init: impl FnOnce() -> Result<TableSet, TableError>,
    ) -> Result<&'static TableSet, TableError> {
        if let Some(set) = SHARED.get() {
            return Ok(set);
        }
        let set = init()?;
        Ok(SHARED.get_or_init(|| set))
    }

    /// The installed process-wide dataset, if any.
    pub fn installed() -> Option<&'static TableSet> {
        SHARED.get()
    }
}
