//! Numerical and ordering diagnostics.
//!
//! Diagnostics are advisory. A finding is logged and kept for later
//! inspection; it never changes a computed value or stops a run.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashSet;
use tracing::warn;

use crate::quantity::{Constraint, Meta, QuantityId, QuantityKind, Values};

/// Runtime switch for the diagnostics layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsMode {
    /// Scan every quantity for NaN/infinite values and constraint breaches
    /// after each tick, and check table inputs
    pub enabled: bool,
    /// Report derived quantities that read values not yet computed this step
    pub check_order: bool,
}

impl DiagnosticsMode {
    pub const OFF: Self = Self {
        enabled: false,
        check_order: false,
    };

    pub const ALL: Self = Self {
        enabled: true,
        check_order: true,
    };
}

/// What a diagnostics check found.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingKind {
    NonFinite { value: f64 },
    Negative { value: f64 },
    Zero,
    NonFiniteTableInput { value: f64 },
    /// A ranked derived quantity read a flow or after-flows quantity
    SameStepFlowRead { source: String },
    /// A ranked derived quantity read a derived quantity ranked after it
    ForwardRead { source: String },
}

/// One diagnostics finding. `tick` is zero during settling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub tick: u64,
    pub quantity: String,
    #[serde(flatten)]
    pub kind: FindingKind,
}

/// Value conditions tracked while they persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Condition {
    NonFinite,
    Negative,
    Zero,
    TableInput,
}

impl FindingKind {
    fn condition(&self) -> Option<Condition> {
        match self {
            FindingKind::NonFinite { .. } => Some(Condition::NonFinite),
            FindingKind::Negative { .. } => Some(Condition::Negative),
            FindingKind::Zero => Some(Condition::Zero),
            FindingKind::NonFiniteTableInput { .. } => Some(Condition::TableInput),
            FindingKind::SameStepFlowRead { .. } | FindingKind::ForwardRead { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct Log {
    findings: Vec<Finding>,
    order_pairs: HashSet<(QuantityId, QuantityId)>,
    /// Conditions already reported and still holding
    active: HashSet<(QuantityId, Condition)>,
}

#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    mode: DiagnosticsMode,
    log: RefCell<Log>,
}

impl Diagnostics {
    pub fn new(mode: DiagnosticsMode) -> Self {
        Self {
            mode,
            log: RefCell::new(Log::default()),
        }
    }

    pub fn mode(&self) -> DiagnosticsMode {
        self.mode
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.log.borrow().findings.clone()
    }

    /// Forgets every finding and every reported condition.
    pub fn clear(&self) {
        *self.log.borrow_mut() = Log::default();
    }

    /// Records `kind` for `id` unless the same condition is still active
    /// from an earlier step.
    fn raise(&self, tick: u64, id: QuantityId, meta: &Meta, kind: FindingKind) {
        if let Some(condition) = kind.condition() {
            if !self.log.borrow_mut().active.insert((id, condition)) {
                return;
            }
        }
        self.record(Finding {
            tick,
            quantity: meta.name.clone(),
            kind,
        });
    }

    fn settle(&self, id: QuantityId, condition: Condition) {
        self.log.borrow_mut().active.remove(&(id, condition));
    }

    fn record(&self, finding: Finding) {
        warn!(
            tick = finding.tick,
            quantity = %finding.quantity,
            finding = ?finding.kind,
            "diagnostics finding"
        );
        self.log.borrow_mut().findings.push(finding);
    }

    /// Post-tick scan of every live value. A condition is reported on the
    /// step it starts and again only after it has cleared.
    pub fn scan(&self, tick: u64, metas: &[Meta], values: &Values) {
        if !self.mode.enabled {
            return;
        }
        for (position, (meta, &value)) in metas.iter().zip(&values.current).enumerate() {
            let id = QuantityId(position);
            let kind = if !value.is_finite() {
                Some(FindingKind::NonFinite { value })
            } else if value < 0.0 && meta.constraints.contains(&Constraint::NonNegative) {
                Some(FindingKind::Negative { value })
            } else if value == 0.0 && meta.constraints.contains(&Constraint::NonZero) {
                Some(FindingKind::Zero)
            } else {
                None
            };

            let holding = kind.as_ref().and_then(FindingKind::condition);
            for condition in [Condition::NonFinite, Condition::Negative, Condition::Zero] {
                if holding != Some(condition) {
                    self.settle(id, condition);
                }
            }
            if let Some(kind) = kind {
                self.raise(tick, id, meta, kind);
            }
        }
    }

    pub fn check_table_input(&self, tick: u64, id: QuantityId, meta: &Meta, value: f64) {
        if !self.mode.enabled {
            return;
        }
        if value.is_finite() {
            self.settle(id, Condition::TableInput);
        } else {
            self.raise(tick, id, meta, FindingKind::NonFiniteTableInput { value });
        }
    }

    /// Reports each (reader, source) ordering problem once.
    fn check_order(&self, tick: u64, metas: &[Meta], reader: QuantityId, source: QuantityId) {
        let reader_meta = &metas[reader.0];
        let source_meta = &metas[source.0];
        let kind = match source_meta.kind {
            QuantityKind::Flow | QuantityKind::AfterFlows => FindingKind::SameStepFlowRead {
                source: source_meta.name.clone(),
            },
            kind if kind.is_ranked() && source_meta.rank > reader_meta.rank => {
                FindingKind::ForwardRead {
                    source: source_meta.name.clone(),
                }
            }
            _ => return,
        };

        if !self.log.borrow_mut().order_pairs.insert((reader, source)) {
            return;
        }
        self.record(Finding {
            tick,
            quantity: reader_meta.name.clone(),
            kind,
        });
    }
}

/// Watches the `current` reads of one ranked derived quantity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OrderGuard<'a> {
    pub metas: &'a [Meta],
    pub diagnostics: &'a Diagnostics,
    pub reader: QuantityId,
    pub tick: u64,
}

impl OrderGuard<'_> {
    pub fn check(&self, source: QuantityId) {
        self.diagnostics
            .check_order(self.tick, self.metas, self.reader, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, kind: QuantityKind, rank: Option<usize>) -> Meta {
        Meta {
            name: name.to_string(),
            units: String::new(),
            number: None,
            sector: String::new(),
            subsector: String::new(),
            kind,
            rank,
            constraints: Vec::new(),
        }
    }

    #[test]
    fn test_scan_disabled_records_nothing() {
        let diagnostics = Diagnostics::new(DiagnosticsMode::OFF);
        let metas = vec![meta("a", QuantityKind::Derived, Some(0))];
        let mut values = Values::with_len(1);
        values.current[0] = f64::NAN;

        diagnostics.scan(1, &metas, &values);
        assert!(diagnostics.findings().is_empty());
    }

    #[test]
    fn test_scan_reports_constraints() {
        let diagnostics = Diagnostics::new(DiagnosticsMode::ALL);
        let mut stock = meta("stock", QuantityKind::Stock, None);
        stock.constraints.push(Constraint::NonNegative);
        let mut divisor = meta("divisor", QuantityKind::Derived, Some(0));
        divisor.constraints.push(Constraint::NonZero);
        let metas = vec![stock, divisor, meta("wild", QuantityKind::Flow, None)];

        let mut values = Values::with_len(3);
        values.current = vec![-2.0, 0.0, f64::INFINITY];
        diagnostics.scan(4, &metas, &values);

        let findings = diagnostics.findings();
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].kind, FindingKind::Negative { value: -2.0 });
        assert_eq!(findings[1].kind, FindingKind::Zero);
        assert_eq!(findings[2].quantity, "wild");
        assert!(findings.iter().all(|f| f.tick == 4));
    }

    #[test]
    fn test_persistent_condition_reported_once_per_episode() {
        let diagnostics = Diagnostics::new(DiagnosticsMode::ALL);
        let mut tank = meta("tank", QuantityKind::Stock, None);
        tank.constraints.push(Constraint::NonNegative);
        let metas = vec![tank, meta("ratio", QuantityKind::Derived, Some(0))];
        let mut values = Values::with_len(2);

        for (tick, level, ratio) in [
            (1u64, -1.0, f64::NAN),
            (2, -2.0, f64::NAN),
            (3, 1.0, f64::NAN),
            (4, -3.0, 0.5),
            (5, -4.0, f64::INFINITY),
        ] {
            values.current = vec![level, ratio];
            diagnostics.scan(tick, &metas, &values);
        }

        let seen: Vec<(u64, String)> = diagnostics
            .findings()
            .into_iter()
            .map(|f| (f.tick, f.quantity))
            .collect();
        let expected: [(u64, &str); 4] =
            [(1, "tank"), (1, "ratio"), (4, "tank"), (5, "ratio")];
        assert_eq!(
            seen,
            expected.map(|(tick, name)| (tick, name.to_string())).to_vec()
        );
    }

    #[test]
    fn test_table_input_reported_once_until_finite() {
        let diagnostics = Diagnostics::new(DiagnosticsMode::ALL);
        let lookup = meta("fill", QuantityKind::Table, Some(0));
        let id = QuantityId(0);

        for (tick, x) in [(1u64, f64::NAN), (2, f64::NAN), (3, 1.0), (4, f64::INFINITY)] {
            diagnostics.check_table_input(tick, id, &lookup, x);
        }

        let ticks: Vec<u64> = diagnostics.findings().iter().map(|f| f.tick).collect();
        assert_eq!(ticks, vec![1, 4]);
    }

    #[test]
    fn test_clear_forgets_findings_and_reported_pairs() {
        let diagnostics = Diagnostics::new(DiagnosticsMode::ALL);
        let metas = vec![
            meta("first", QuantityKind::Derived, Some(0)),
            meta("rate", QuantityKind::Flow, None),
        ];
        let guard = OrderGuard {
            metas: &metas,
            diagnostics: &diagnostics,
            reader: QuantityId(0),
            tick: 1,
        };
        guard.check(QuantityId(1));
        assert_eq!(diagnostics.findings().len(), 1);

        diagnostics.clear();
        assert!(diagnostics.findings().is_empty());

        guard.check(QuantityId(1));
        assert_eq!(diagnostics.findings().len(), 1);
    }

    #[test]
    fn test_order_findings_are_deduplicated() {
        let diagnostics = Diagnostics::new(DiagnosticsMode::ALL);
        let metas = vec![
            meta("first", QuantityKind::Derived, Some(0)),
            meta("second", QuantityKind::Derived, Some(1)),
            meta("rate", QuantityKind::Flow, None),
        ];
        let guard = OrderGuard {
            metas: &metas,
            diagnostics: &diagnostics,
            reader: QuantityId(0),
            tick: 1,
        };

        guard.check(QuantityId(1));
        guard.check(QuantityId(1));
        guard.check(QuantityId(2));

        let findings = diagnostics.findings();
        assert_eq!(findings.len(), 2);
        assert_eq!(
            findings[0].kind,
            FindingKind::ForwardRead {
                source: "second".to_string()
            }
        );
        assert_eq!(
            findings[1].kind,
            FindingKind::SameStepFlowRead {
                source: "rate".to_string()
            }
        );
    }

    #[test]
    fn test_backward_read_is_allowed() {
        let diagnostics = Diagnostics::new(DiagnosticsMode::ALL);
        let metas = vec![
            meta("first", QuantityKind::Derived, Some(0)),
            meta("second", QuantityKind::Derived, Some(1)),
            meta("level", QuantityKind::Stock, None),
        ];
        let guard = OrderGuard {
            metas: &metas,
            diagnostics: &diagnostics,
            reader: QuantityId(1),
            tick: 1,
        };

        guard.check(QuantityId(0));
        guard.check(QuantityId(2));
        assert!(diagnostics.findings().is_empty());
    }

    #[test]
    fn test_finding_serializes_flat() {
        let finding = Finding {
            tick: 3,
            quantity: "x".to_string(),
            kind: FindingKind::Negative { value: -1.0 },
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"], "negative");
        assert_eq!(json["value"], -1.0);
        assert_eq!(json["quantity"], "x");
    }
}
