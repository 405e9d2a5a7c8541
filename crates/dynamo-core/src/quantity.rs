//! Quantity handles, metadata, and recorded history.
//!
//! Values live in a double buffer ([`Values`]) indexed by [`QuantityId`]; the
//! per-quantity history and running range live in a [`Record`]. Consumers see
//! both through a borrowed [`QuantityRef`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle assigned to a quantity when it is first named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuantityId(pub(crate) usize);

impl QuantityId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for QuantityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Variant of a quantity, which decides the phase it is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityKind {
    /// Integrated state, updated first from prior-step rates
    Stock,
    /// Rate of change, updated after derived quantities
    Flow,
    /// Instantaneous function, ranked
    Derived,
    /// Instantaneous function evaluated after flows
    AfterFlows,
    /// Source function mapped through a lookup table, ranked
    Table,
    /// First-order exponential smoothing, ranked
    Smooth,
    /// Third-order information delay, ranked
    Delay3,
    /// Fixed-length transport delay, ranked
    Delay,
}

impl QuantityKind {
    /// True for kinds evaluated in the ranked derived phase.
    pub fn is_ranked(self) -> bool {
        matches!(
            self,
            QuantityKind::Derived
                | QuantityKind::Table
                | QuantityKind::Smooth
                | QuantityKind::Delay3
                | QuantityKind::Delay
        )
    }

    /// True for the three lag primitives.
    pub fn is_lag(self) -> bool {
        matches!(
            self,
            QuantityKind::Smooth | QuantityKind::Delay3 | QuantityKind::Delay
        )
    }
}

impl fmt::Display for QuantityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QuantityKind::Stock => "stock",
            QuantityKind::Flow => "flow",
            QuantityKind::Derived => "derived",
            QuantityKind::AfterFlows => "after_flows",
            QuantityKind::Table => "table",
            QuantityKind::Smooth => "smooth",
            QuantityKind::Delay3 => "delay3",
            QuantityKind::Delay => "delay",
        };
        write!(f, "{}", label)
    }
}

/// Value restriction checked by the diagnostics scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    NonNegative,
    NonZero,
}

/// Identity and placement of a quantity. Immutable once the model is finalized.
#[derive(Debug, Clone)]
pub(crate) struct Meta {
    pub name: String,
    pub units: String,
    pub number: Option<u32>,
    pub sector: String,
    pub subsector: String,
    pub kind: QuantityKind,
    pub rank: Option<usize>,
    pub constraints: Vec<Constraint>,
}

/// Recorded history and the running range over every observed value.
#[derive(Debug, Clone, Default)]
pub(crate) struct Record {
    history: Vec<f64>,
    range: Option<(f64, f64)>,
}

impl Record {
    pub fn clear(&mut self) {
        self.history.clear();
        self.range = None;
    }

    /// Widens the range to cover `value`. Non-finite values are left to the
    /// diagnostics scan.
    pub fn observe(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.range = Some(match self.range {
            Some((lo, hi)) => (lo.min(value), hi.max(value)),
            None => (value, value),
        });
    }

    /// Appends one completed step.
    pub fn push(&mut self, value: f64) {
        self.observe(value);
        self.history.push(value);
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }
}

/// Double-buffered values: `previous` is the snapshot at the start of the
/// step, `current` is what the step has computed so far.
#[derive(Debug, Clone, Default)]
pub(crate) struct Values {
    pub current: Vec<f64>,
    pub previous: Vec<f64>,
}

impl Values {
    pub fn with_len(len: usize) -> Self {
        Self {
            current: vec![0.0; len],
            previous: vec![0.0; len],
        }
    }

    pub fn zero(&mut self) {
        self.current.iter_mut().for_each(|v| *v = 0.0);
        self.previous.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Sets both slots, as stock initialization and lag seeding do.
    pub fn seed(&mut self, id: QuantityId, value: f64) {
        self.current[id.0] = value;
        self.previous[id.0] = value;
    }
}

/// Read-only view of one quantity.
#[derive(Debug, Clone, Copy)]
pub struct QuantityRef<'a> {
    pub(crate) id: QuantityId,
    pub(crate) meta: &'a Meta,
    pub(crate) record: &'a Record,
    pub(crate) current: f64,
    pub(crate) previous: f64,
}

impl<'a> QuantityRef<'a> {
    pub fn id(&self) -> QuantityId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        &self.meta.name
    }

    pub fn units(&self) -> &'a str {
        &self.meta.units
    }

    /// Equation number, for display only.
    pub fn number(&self) -> Option<u32> {
        self.meta.number
    }

    pub fn sector(&self) -> &'a str {
        &self.meta.sector
    }

    pub fn subsector(&self) -> &'a str {
        &self.meta.subsector
    }

    pub fn kind(&self) -> QuantityKind {
        self.meta.kind
    }

    /// Position in the derived evaluation order, for ranked kinds.
    pub fn rank(&self) -> Option<usize> {
        self.meta.rank
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn previous(&self) -> f64 {
        self.previous
    }

    /// One entry per completed tick since the last reset.
    pub fn history(&self) -> &'a [f64] {
        self.record.history()
    }

    pub fn minimum(&self) -> Option<f64> {
        self.record.range().map(|(lo, _)| lo)
    }

    pub fn maximum(&self) -> Option<f64> {
        self.record.range().map(|(_, hi)| hi)
    }

    /// Live value projected onto `[0, 1]` over the observed range.
    pub fn normalized(&self) -> Option<f64> {
        self.project(self.current)
    }

    /// History entry `index` projected onto `[0, 1]`.
    pub fn normalized_at(&self, index: usize) -> Option<f64> {
        let value = *self.record.history().get(index)?;
        self.project(value)
    }

    fn project(&self, value: f64) -> Option<f64> {
        let (lo, hi) = self.record.range()?;
        if hi > lo {
            Some((value - lo) / (hi - lo))
        } else {
            Some(0.0)
        }
    }
}
