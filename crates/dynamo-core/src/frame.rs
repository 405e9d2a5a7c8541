//! The read-only view an equation evaluates against.

use crate::diagnostics::OrderGuard;
use crate::quantity::{QuantityId, Values};

/// Snapshot of the model handed to every equation closure.
///
/// `previous` is the value at the start of the step. `current` is the value
/// computed so far this step: stocks are already integrated when derived
/// quantities run, lower-ranked derived quantities are already evaluated, and
/// flows still hold last step's value until the flow phase.
pub struct Frame<'a> {
    values: &'a Values,
    time: f64,
    dt: f64,
    guard: Option<OrderGuard<'a>>,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(values: &'a Values, time: f64, dt: f64, guard: Option<OrderGuard<'a>>) -> Self {
        Self {
            values,
            time,
            dt,
            guard,
        }
    }

    pub fn current(&self, id: QuantityId) -> f64 {
        if let Some(guard) = &self.guard {
            guard.check(id);
        }
        self.values.current[id.0]
    }

    pub fn previous(&self, id: QuantityId) -> f64 {
        self.values.previous[id.0]
    }

    /// Simulated time at the start of the step.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }
}
