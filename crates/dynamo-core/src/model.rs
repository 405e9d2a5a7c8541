//! Model declaration and finalization.
//!
//! A [`ModelBuilder`] collects quantity declarations, hands out a stable
//! [`QuantityId`] for every name (forward references included), and turns into
//! a [`Scheduler`] once the derived evaluation order is supplied. Registration
//! problems are collected and reported by [`ModelBuilder::finalize`], so a
//! malformed model always fails at that one point.

use std::collections::HashMap;
use tracing::info;

use crate::diagnostics::DiagnosticsMode;
use crate::error::EngineError;
use crate::frame::Frame;
use crate::lag::{Delay3, Smooth, TransportDelay};
use crate::quantity::{Constraint, Meta, QuantityId, QuantityKind};
use crate::scheduler::{Equation, Scheduler};
use crate::table::Table;

/// A pure function of the model state.
pub type EquationFn = Box<dyn Fn(&Frame<'_>) -> f64 + Send>;

/// Callback run by the scheduler outside the standard phases.
pub type Hook = Box<dyn FnMut(&mut Scheduler) -> Result<(), EngineError> + Send>;

struct Declared {
    meta: Meta,
    equation: Equation,
}

/// Annotations attached through a handle, possibly before the declaration.
#[derive(Default)]
struct Annotations {
    number: Option<u32>,
    constraints: Vec<Constraint>,
}

/// Registers quantities and builds a [`Scheduler`].
pub struct ModelBuilder {
    names: Vec<String>,
    slots: Vec<Option<Declared>>,
    annotations: Vec<Annotations>,
    index: HashMap<String, QuantityId>,
    sector: String,
    subsector: String,
    initial_time: f64,
    diagnostics: DiagnosticsMode,
    extra_phase: Option<Hook>,
    on_start: Option<Hook>,
    errors: Vec<EngineError>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            slots: Vec::new(),
            annotations: Vec::new(),
            index: HashMap::new(),
            sector: String::new(),
            subsector: String::new(),
            initial_time: 0.0,
            diagnostics: DiagnosticsMode::OFF,
            extra_phase: None,
            on_start: None,
            errors: Vec::new(),
        }
    }

    /// Sector and subsector stamped on every quantity declared from now on.
    pub fn set_sector(&mut self, sector: &str, subsector: &str) -> &mut Self {
        self.sector = sector.to_string();
        self.subsector = subsector.to_string();
        self
    }

    pub fn initial_time(&mut self, time: f64) -> &mut Self {
        self.initial_time = time;
        self
    }

    pub fn diagnostics(&mut self, mode: DiagnosticsMode) -> &mut Self {
        self.diagnostics = mode;
        self
    }

    /// Runs after the after-flows quantities in every tick and settling pass.
    pub fn on_extra_phase(
        &mut self,
        hook: impl FnMut(&mut Scheduler) -> Result<(), EngineError> + Send + 'static,
    ) -> &mut Self {
        self.extra_phase = Some(Box::new(hook));
        self
    }

    /// Runs once at the end of [`Scheduler::start`].
    pub fn on_start(
        &mut self,
        hook: impl FnMut(&mut Scheduler) -> Result<(), EngineError> + Send + 'static,
    ) -> &mut Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Handle for `name`, reserved now if the quantity is declared later.
    pub fn handle(&mut self, name: &str) -> QuantityId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = QuantityId(self.slots.len());
        self.names.push(name.to_string());
        self.slots.push(None);
        self.annotations.push(Annotations::default());
        self.index.insert(name.to_string(), id);
        id
    }

    /// Handle for an already named quantity.
    pub fn lookup(&self, name: &str) -> Option<QuantityId> {
        self.index.get(name).copied()
    }

    /// Name to handle map for every name seen so far.
    pub fn names(&self) -> &HashMap<String, QuantityId> {
        &self.index
    }

    /// Integrated state: `current = previous + dt * rate`. The rate should read
    /// flows through [`Frame::previous`].
    pub fn stock(
        &mut self,
        name: &str,
        units: &str,
        initial: f64,
        rate: impl Fn(&Frame<'_>) -> f64 + Send + 'static,
    ) -> QuantityId {
        let equation = Equation::Stock {
            initial,
            rate: Box::new(rate),
        };
        self.declare(name, units, QuantityKind::Stock, equation)
    }

    pub fn flow(
        &mut self,
        name: &str,
        units: &str,
        f: impl Fn(&Frame<'_>) -> f64 + Send + 'static,
    ) -> QuantityId {
        self.declare(name, units, QuantityKind::Flow, Equation::Function(Box::new(f)))
    }

    /// Ranked derived quantity, evaluated before flows.
    pub fn derived(
        &mut self,
        name: &str,
        units: &str,
        f: impl Fn(&Frame<'_>) -> f64 + Send + 'static,
    ) -> QuantityId {
        self.declare(name, units, QuantityKind::Derived, Equation::Function(Box::new(f)))
    }

    /// Derived quantity that reads this step's flow values. It is kept out of
    /// the ranked order and evaluated, in declaration order, after the flows.
    pub fn derived_after_flows(
        &mut self,
        name: &str,
        units: &str,
        f: impl Fn(&Frame<'_>) -> f64 + Send + 'static,
    ) -> QuantityId {
        self.declare(
            name,
            units,
            QuantityKind::AfterFlows,
            Equation::Function(Box::new(f)),
        )
    }

    /// Ranked quantity whose value is `table.lookup(source)`.
    pub fn table(
        &mut self,
        name: &str,
        units: &str,
        table: Table,
        source: impl Fn(&Frame<'_>) -> f64 + Send + 'static,
    ) -> QuantityId {
        let equation = Equation::Table {
            table,
            source: Box::new(source),
        };
        self.declare(name, units, QuantityKind::Table, equation)
    }

    /// Like [`ModelBuilder::table`], building the table from its parts. A
    /// malformed domain or value array fails [`ModelBuilder::finalize`].
    #[allow(clippy::too_many_arguments)]
    pub fn table_from_parts(
        &mut self,
        name: &str,
        units: &str,
        min: f64,
        max: f64,
        step: f64,
        values: Vec<f64>,
        source: impl Fn(&Frame<'_>) -> f64 + Send + 'static,
    ) -> QuantityId {
        match Table::new(min, max, step, values) {
            Ok(table) => self.table(name, units, table, source),
            Err(error) => {
                self.errors.push(EngineError::Table {
                    name: name.to_string(),
                    source: error,
                });
                self.handle(name)
            }
        }
    }

    /// First-order smoothing of `upstream` with the given time constant.
    pub fn smooth(&mut self, name: &str, units: &str, upstream: &str, time_constant: f64) -> QuantityId {
        let equation = Equation::Smooth(Smooth::new(upstream, time_constant));
        self.declare(name, units, QuantityKind::Smooth, equation)
    }

    /// Third-order information delay of `upstream`.
    pub fn delay3(&mut self, name: &str, units: &str, upstream: &str, time_constant: f64) -> QuantityId {
        let equation = Equation::Delay3(Delay3::new(upstream, time_constant));
        self.declare(name, units, QuantityKind::Delay3, equation)
    }

    /// Transport delay of `upstream` by `delay` time units.
    pub fn delay(&mut self, name: &str, units: &str, upstream: &str, delay: f64) -> QuantityId {
        let equation = Equation::Delay(TransportDelay::new(upstream, delay));
        self.declare(name, units, QuantityKind::Delay, equation)
    }

    /// Attaches a display-only equation number. The handle may name a
    /// quantity that is declared later.
    pub fn set_number(&mut self, id: QuantityId, number: u32) -> &mut Self {
        match self.annotations.get_mut(id.0) {
            Some(annotations) => annotations.number = Some(number),
            None => self.foreign_handle(id),
        }
        self
    }

    /// Adds a value restriction checked by the diagnostics scan. The handle
    /// may name a quantity that is declared later.
    pub fn constrain(&mut self, id: QuantityId, constraint: Constraint) -> &mut Self {
        match self.annotations.get_mut(id.0) {
            Some(annotations) => annotations.constraints.push(constraint),
            None => self.foreign_handle(id),
        }
        self
    }

    fn foreign_handle(&mut self, id: QuantityId) {
        self.errors
            .push(EngineError::UnknownQuantity(format!("#{}", id.0)));
    }

    fn declare(&mut self, name: &str, units: &str, kind: QuantityKind, equation: Equation) -> QuantityId {
        let id = self.handle(name);
        if self.slots[id.0].is_some() {
            self.errors
                .push(EngineError::DuplicateQuantity(name.to_string()));
            return id;
        }

        let meta = Meta {
            name: name.to_string(),
            units: units.to_string(),
            number: None,
            sector: self.sector.clone(),
            subsector: self.subsector.clone(),
            kind,
            rank: None,
            constraints: Vec::new(),
        };
        self.slots[id.0] = Some(Declared { meta, equation });
        id
    }

    /// Ranks the derived quantities by their position in `order`, freezes the
    /// name index, and resets every quantity.
    ///
    /// Every ranked quantity (derived, table, and lag kinds) must appear in
    /// `order` exactly once; stocks, flows, and after-flows quantities must not.
    pub fn finalize(self, order: &[&str]) -> Result<Scheduler, EngineError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let mut metas = Vec::with_capacity(self.slots.len());
        let mut equations = Vec::with_capacity(self.slots.len());
        let declarations = self.names.into_iter().zip(self.slots).zip(self.annotations);
        for ((name, slot), annotations) in declarations {
            let mut declared = slot.ok_or(EngineError::UndeclaredQuantity(name))?;
            declared.meta.number = annotations.number;
            declared.meta.constraints = annotations.constraints;
            metas.push(declared.meta);
            equations.push(declared.equation);
        }

        for (rank, name) in order.iter().enumerate() {
            let id = self
                .index
                .get(*name)
                .copied()
                .ok_or_else(|| EngineError::UnknownQuantity(name.to_string()))?;
            let meta: &mut Meta = &mut metas[id.0];
            if !meta.kind.is_ranked() {
                return Err(EngineError::NotRankable(name.to_string()));
            }
            if meta.rank.is_some() {
                return Err(EngineError::DuplicateRank(name.to_string()));
            }
            meta.rank = Some(rank);
        }

        if let Some(meta) = metas.iter().find(|m| m.kind.is_ranked() && m.rank.is_none()) {
            return Err(EngineError::Unranked(meta.name.clone()));
        }

        for (meta, equation) in metas.iter().zip(&equations) {
            if let Some(value) = equation.invalid_lag_time() {
                return Err(EngineError::InvalidLagTime {
                    name: meta.name.clone(),
                    value,
                });
            }
        }

        let mut scheduler = Scheduler::new(
            metas,
            equations,
            self.index,
            self.initial_time,
            self.diagnostics,
            self.extra_phase,
            self.on_start,
        );
        scheduler.reset()?;

        info!(
            quantities = scheduler.len(),
            ranked = order.len(),
            "model finalized"
        );
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_stable_and_forward_referencable() {
        let mut builder = ModelBuilder::new();
        let later = builder.handle("later");
        let first = builder.derived("first", "", move |f| f.current(later) + 1.0);
        let declared = builder.derived("later", "", |_| 2.0);

        assert_eq!(later, declared);
        assert_ne!(first, later);
        assert_eq!(builder.lookup("first"), Some(first));
        assert_eq!(builder.names().len(), 2);
    }

    #[test]
    fn test_undeclared_reference_fails_finalize() {
        let mut builder = ModelBuilder::new();
        let ghost = builder.handle("ghost");
        builder.derived("a", "", move |f| f.current(ghost));

        let err = builder.finalize(&["a"]).unwrap_err();
        assert!(matches!(err, EngineError::UndeclaredQuantity(name) if name == "ghost"));
    }

    #[test]
    fn test_duplicate_declaration_fails_finalize() {
        let mut builder = ModelBuilder::new();
        builder.derived("a", "", |_| 1.0);
        builder.flow("a", "", |_| 2.0);

        let err = builder.finalize(&["a"]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateQuantity(name) if name == "a"));
    }

    #[test]
    fn test_unranked_derived_is_rejected() {
        let mut builder = ModelBuilder::new();
        builder.derived("a", "", |_| 1.0);
        builder.derived("b", "", |_| 2.0);

        let err = builder.finalize(&["a"]).unwrap_err();
        assert!(matches!(err, EngineError::Unranked(name) if name == "b"));
    }

    #[test]
    fn test_order_rejects_unknown_duplicate_and_unrankable() {
        let build = || {
            let mut builder = ModelBuilder::new();
            builder.derived("a", "", |_| 1.0);
            builder.flow("rate", "", |_| 1.0);
            builder
        };

        assert!(matches!(
            build().finalize(&["a", "b"]),
            Err(EngineError::UnknownQuantity(name)) if name == "b"
        ));
        assert!(matches!(
            build().finalize(&["a", "a"]),
            Err(EngineError::DuplicateRank(name)) if name == "a"
        ));
        assert!(matches!(
            build().finalize(&["a", "rate"]),
            Err(EngineError::NotRankable(name)) if name == "rate"
        ));
    }

    #[test]
    fn test_malformed_table_fails_finalize() {
        let mut builder = ModelBuilder::new();
        builder.table_from_parts("t", "", 0.0, 1.0, 0.5, vec![0.0, 1.0], |_| 0.5);

        let err = builder.finalize(&["t"]).unwrap_err();
        assert!(matches!(err, EngineError::Table { name, .. } if name == "t"));
    }

    #[test]
    fn test_lag_bound_to_missing_upstream_fails_finalize() {
        let mut builder = ModelBuilder::new();
        builder.smooth("s", "", "nowhere", 2.0);

        let err = builder.finalize(&["s"]).unwrap_err();
        assert!(matches!(err, EngineError::MissingUpstream { .. }));
    }

    #[test]
    fn test_invalid_lag_time_rejected() {
        let mut builder = ModelBuilder::new();
        builder.derived("u", "", |_| 1.0);
        builder.delay3("d", "", "u", 0.0);

        let err = builder.finalize(&["u", "d"]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidLagTime { name, .. } if name == "d"));
    }

    #[test]
    fn test_sector_is_stamped_on_declarations() {
        let mut builder = ModelBuilder::new();
        builder.set_sector("population", "births");
        let births = builder.flow("births", "people/year", |_| 1.0);
        builder.set_sector("capital", "industry");
        builder.stock("capital", "$", 10.0, |_| 0.0);
        builder.set_number(births, 12);

        let scheduler = builder.finalize(&[]).unwrap();
        let births = scheduler.lookup("births").unwrap();
        assert_eq!(births.sector(), "population");
        assert_eq!(births.subsector(), "births");
        assert_eq!(births.number(), Some(12));
        assert_eq!(scheduler.lookup("capital").unwrap().sector(), "capital");
        assert_eq!(
            scheduler.sectors(),
            vec![("population", "births"), ("capital", "industry")]
        );
    }
}
