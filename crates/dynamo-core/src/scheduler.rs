//! The tick scheduler.
//!
//! Owns every quantity of a finalized model and steps it with a fixed phase
//! order:
//!
//! 1. stocks, integrated from prior-step flow values
//! 2. ranked derived quantities, in evaluation order
//! 3. flows
//! 4. the extra phase: after-flows quantities, then the extra-phase hook
//! 5. advance: `previous <- current` and history append for every quantity
//! 6. diagnostics scan (when enabled)
//! 7. time += dt
//!
//! [`Scheduler::start`] runs three settling passes of phases 2 to 5 before the
//! clock starts, so lag buffers and chained derived values begin the run
//! consistent with the initial conditions.

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostics, DiagnosticsMode, Finding, OrderGuard};
use crate::error::EngineError;
use crate::frame::Frame;
use crate::lag::{Delay3, Smooth, TransportDelay};
use crate::model::{EquationFn, Hook};
use crate::quantity::{Meta, QuantityId, QuantityKind, QuantityRef, Record, Values};
use crate::series::Series;
use crate::table::Table;

/// Number of settling passes run by [`Scheduler::start`].
pub const SETTLING_PASSES: usize = 3;

/// How a quantity computes its next value.
pub(crate) enum Equation {
    Stock { initial: f64, rate: EquationFn },
    Function(EquationFn),
    Table { table: Table, source: EquationFn },
    Smooth(Smooth),
    Delay3(Delay3),
    Delay(TransportDelay),
}

impl Equation {
    /// Offending time constant or delay, if this is a lag with an invalid one.
    pub fn invalid_lag_time(&self) -> Option<f64> {
        let (value, valid) = match self {
            Equation::Smooth(s) => (s.time_constant(), s.time_constant() > 0.0),
            Equation::Delay3(d) => (d.time_constant(), d.time_constant() > 0.0),
            Equation::Delay(d) => (d.delay(), d.delay() >= 0.0),
            _ => return None,
        };
        (!(valid && value.is_finite())).then_some(value)
    }

    fn reset(&mut self, name: &str, index: &HashMap<String, QuantityId>) -> Result<(), EngineError> {
        match self {
            Equation::Smooth(s) => {
                s.binding.resolve(name, index)?;
                s.reset();
            }
            Equation::Delay3(d) => {
                d.binding.resolve(name, index)?;
                d.reset();
            }
            Equation::Delay(d) => {
                d.binding.resolve(name, index)?;
                d.reset();
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Finalized,
    Settling,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stocks = 0,
    Derived = 1,
    Flows = 2,
    AfterFlows = 3,
}

#[derive(Debug, Clone, Copy)]
struct Clock {
    dt: f64,
    initial_time: f64,
    time: f64,
    tick: u64,
}

impl Clock {
    fn new(dt: f64, initial_time: f64) -> Self {
        Self {
            dt,
            initial_time,
            time: initial_time,
            tick: 0,
        }
    }

    fn advance_tick(&mut self) {
        self.tick += 1;
        self.time += self.dt;
    }

    fn rewind(&mut self) {
        self.tick = 0;
        self.time = self.initial_time;
    }
}

/// A finalized model and its clock.
pub struct Scheduler {
    metas: Vec<Meta>,
    equations: Vec<Equation>,
    records: Vec<Record>,
    values: Values,
    index: HashMap<String, QuantityId>,
    /// Stocks, ranked derived, flows, after-flows; in evaluation order
    phases: [Vec<QuantityId>; 4],
    lags: Vec<QuantityId>,
    clock: Clock,
    lifecycle: Lifecycle,
    diagnostics: Diagnostics,
    extra_phase: Option<Hook>,
    on_start: Option<Hook>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("quantities", &self.metas.len())
            .field("clock", &self.clock)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub(crate) fn new(
        metas: Vec<Meta>,
        equations: Vec<Equation>,
        index: HashMap<String, QuantityId>,
        initial_time: f64,
        mode: DiagnosticsMode,
        extra_phase: Option<Hook>,
        on_start: Option<Hook>,
    ) -> Self {
        let mut phases: [Vec<QuantityId>; 4] = Default::default();
        let mut lags = Vec::new();
        for (position, meta) in metas.iter().enumerate() {
            let id = QuantityId(position);
            let phase = match meta.kind {
                QuantityKind::Stock => Phase::Stocks,
                QuantityKind::Flow => Phase::Flows,
                QuantityKind::AfterFlows => Phase::AfterFlows,
                _ => Phase::Derived,
            };
            phases[phase as usize].push(id);
            if meta.kind.is_lag() {
                lags.push(id);
            }
        }
        phases[Phase::Derived as usize].sort_by_key(|id| metas[id.0].rank);

        let len = metas.len();
        Self {
            metas,
            equations,
            records: vec![Record::default(); len],
            values: Values::with_len(len),
            index,
            phases,
            lags,
            clock: Clock::new(0.0, initial_time),
            lifecycle: Lifecycle::Finalized,
            diagnostics: Diagnostics::new(mode),
            extra_phase,
            on_start,
        }
    }

    /// Clears every record and the diagnostics log, and re-resolves lag
    /// bindings, re-arming their first-evaluation seeding.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        for record in &mut self.records {
            record.clear();
        }
        self.diagnostics.clear();
        for (meta, equation) in self.metas.iter().zip(self.equations.iter_mut()) {
            equation.reset(&meta.name, &self.index)?;
        }
        Ok(())
    }

    /// Sets a stock's previous and current values to its initial value.
    pub fn initialize(&mut self, id: QuantityId) -> Result<(), EngineError> {
        match self.equations.get(id.0) {
            Some(Equation::Stock { initial, .. }) => {
                let initial = *initial;
                self.values.seed(id, initial);
                self.records[id.0].observe(initial);
                Ok(())
            }
            Some(_) => Err(EngineError::NotAStock(self.metas[id.0].name.clone())),
            None => Err(EngineError::UnknownQuantity(id.to_string())),
        }
    }

    /// Changes a stock's initial value. Takes effect at the next
    /// [`Scheduler::initialize`] or [`Scheduler::start`].
    pub fn set_initial_value(&mut self, id: QuantityId, value: f64) -> Result<(), EngineError> {
        match self.equations.get_mut(id.0) {
            Some(Equation::Stock { initial, .. }) => {
                *initial = value;
                Ok(())
            }
            Some(_) => Err(EngineError::NotAStock(self.metas[id.0].name.clone())),
            None => Err(EngineError::UnknownQuantity(id.to_string())),
        }
    }

    fn initialize_stocks(&mut self) -> Result<(), EngineError> {
        for index in 0..self.phases[Phase::Stocks as usize].len() {
            let id = self.phases[Phase::Stocks as usize][index];
            self.initialize(id)?;
        }
        Ok(())
    }

    fn initialize_lags(&mut self) -> Result<(), EngineError> {
        let dt = self.clock.dt;
        for &id in &self.lags {
            let name = &self.metas[id.0].name;
            match &mut self.equations[id.0] {
                Equation::Delay3(delay) => delay.initialize(name, id, &mut self.values)?,
                Equation::Delay(delay) => delay.initialize(name, &self.values, dt)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Prepares a run with time step `dt`: reset, initialize stocks and lags,
    /// settle, re-initialize stocks, rewind the clock, run the start hook.
    ///
    /// Calling `start` again restarts the run from the initial conditions.
    pub fn start(&mut self, dt: f64) -> Result<(), EngineError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(EngineError::InvalidStep(dt));
        }

        self.clock = Clock::new(dt, self.clock.initial_time);
        self.lifecycle = Lifecycle::Settling;
        self.values.zero();
        self.reset()?;
        self.initialize_stocks()?;
        self.initialize_lags()?;

        for pass in 1..=SETTLING_PASSES {
            debug!(pass, "settling pass");
            self.update_phase(Phase::Derived)?;
            self.update_phase(Phase::Flows)?;
            self.run_extra_phase()?;
            self.advance(false);
        }

        // Settling observations are not part of the run
        for record in &mut self.records {
            record.clear();
        }
        self.initialize_stocks()?;
        self.clock.rewind();
        self.lifecycle = Lifecycle::Running;

        if let Some(mut hook) = self.on_start.take() {
            let result = hook(self);
            self.on_start = Some(hook);
            result?;
        }

        info!(
            dt,
            time = self.clock.time,
            quantities = self.metas.len(),
            "simulation started"
        );
        Ok(())
    }

    /// Advances the model one step.
    pub fn tick(&mut self) -> Result<(), EngineError> {
        if self.lifecycle != Lifecycle::Running {
            return Err(EngineError::NotStarted);
        }

        self.update_phase(Phase::Stocks)?;
        self.update_phase(Phase::Derived)?;
        self.update_phase(Phase::Flows)?;
        self.run_extra_phase()?;
        self.advance(true);
        self.diagnostics
            .scan(self.step_number(), &self.metas, &self.values);
        self.clock.advance_tick();

        debug!(tick = self.clock.tick, time = self.clock.time, "tick complete");
        Ok(())
    }

    /// Ticks until simulated time reaches `end_time`. Returns the number of
    /// ticks taken.
    pub fn run_until(&mut self, end_time: f64) -> Result<u64, EngineError> {
        if self.lifecycle != Lifecycle::Running {
            return Err(EngineError::NotStarted);
        }
        let slack = self.clock.dt * 1e-6;
        let mut ticks = 0;
        while self.clock.time + slack < end_time {
            self.tick()?;
            ticks += 1;
        }
        Ok(ticks)
    }

    /// Recomputes one quantity now. Meant for hooks; ordinary quantities are
    /// updated by the phases.
    ///
    /// Lag state only moves when the step advances, so repeated calls within
    /// one step are idempotent for every kind.
    pub fn update(&mut self, id: QuantityId) -> Result<f64, EngineError> {
        if self.lifecycle == Lifecycle::Finalized {
            return Err(EngineError::NotStarted);
        }
        if id.0 >= self.metas.len() {
            return Err(EngineError::UnknownQuantity(id.to_string()));
        }
        self.evaluate(id)
    }

    fn update_phase(&mut self, phase: Phase) -> Result<(), EngineError> {
        let ids = std::mem::take(&mut self.phases[phase as usize]);
        let result = ids.iter().try_for_each(|&id| self.evaluate(id).map(drop));
        self.phases[phase as usize] = ids;
        result
    }

    fn run_extra_phase(&mut self) -> Result<(), EngineError> {
        self.update_phase(Phase::AfterFlows)?;
        if let Some(mut hook) = self.extra_phase.take() {
            let result = hook(self);
            self.extra_phase = Some(hook);
            result?;
        }
        Ok(())
    }

    fn evaluate(&mut self, id: QuantityId) -> Result<f64, EngineError> {
        let value = self.compute(id)?;
        self.values.current[id.0] = value;
        self.records[id.0].observe(value);
        Ok(value)
    }

    fn compute(&mut self, id: QuantityId) -> Result<f64, EngineError> {
        let (time, dt) = (self.clock.time, self.clock.dt);
        let tick = self.step_number();
        let meta = &self.metas[id.0];
        let guard = (self.diagnostics.mode().check_order && meta.kind.is_ranked()).then_some(
            OrderGuard {
                metas: &self.metas,
                diagnostics: &self.diagnostics,
                reader: id,
                tick,
            },
        );

        match &mut self.equations[id.0] {
            Equation::Stock { rate, .. } => {
                let net = rate(&Frame::new(&self.values, time, dt, guard));
                Ok(self.values.previous[id.0] + dt * net)
            }
            Equation::Function(f) => Ok(f(&Frame::new(&self.values, time, dt, guard))),
            Equation::Table { table, source } => {
                let x = source(&Frame::new(&self.values, time, dt, guard));
                self.diagnostics.check_table_input(tick, id, meta, x);
                Ok(table.lookup(x))
            }
            Equation::Smooth(smooth) => smooth.update(&meta.name, id, &mut self.values, dt),
            Equation::Delay3(delay) => delay.update(&meta.name, id, &mut self.values, dt),
            Equation::Delay(delay) => delay.update(&meta.name, &self.values),
        }
    }

    fn advance(&mut self, record: bool) {
        for (index, entry) in self.records.iter_mut().enumerate() {
            let value = self.values.current[index];
            self.values.previous[index] = value;
            if record {
                entry.push(value);
            }
        }
        for &id in &self.lags {
            match &mut self.equations[id.0] {
                Equation::Smooth(smooth) => smooth.advance(),
                Equation::Delay3(delay) => delay.advance(),
                Equation::Delay(delay) => delay.advance(),
                _ => {}
            }
        }
    }

    /// Tick number used to stamp findings: zero while settling.
    fn step_number(&self) -> u64 {
        match self.lifecycle {
            Lifecycle::Running => self.clock.tick + 1,
            _ => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    pub fn dt(&self) -> f64 {
        self.clock.dt
    }

    pub fn time(&self) -> f64 {
        self.clock.time
    }

    pub fn initial_time(&self) -> f64 {
        self.clock.initial_time
    }

    /// Ticks completed since the last start.
    pub fn tick_count(&self) -> u64 {
        self.clock.tick
    }

    pub fn id(&self, name: &str) -> Result<QuantityId, EngineError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownQuantity(name.to_string()))
    }

    pub fn lookup(&self, name: &str) -> Result<QuantityRef<'_>, EngineError> {
        let id = self.id(name)?;
        Ok(self.view(id))
    }

    pub fn get(&self, id: QuantityId) -> Option<QuantityRef<'_>> {
        (id.0 < self.metas.len()).then(|| self.view(id))
    }

    fn view(&self, id: QuantityId) -> QuantityRef<'_> {
        QuantityRef {
            id,
            meta: &self.metas[id.0],
            record: &self.records[id.0],
            current: self.values.current[id.0],
            previous: self.values.previous[id.0],
        }
    }

    pub fn current(&self, id: QuantityId) -> f64 {
        self.values.current[id.0]
    }

    pub fn previous(&self, id: QuantityId) -> f64 {
        self.values.previous[id.0]
    }

    /// Every quantity, in registration order.
    pub fn quantities(&self) -> impl Iterator<Item = QuantityRef<'_>> + '_ {
        (0..self.metas.len()).map(move |index| self.view(QuantityId(index)))
    }

    /// Distinct (sector, subsector) pairs, in order of first declaration.
    pub fn sectors(&self) -> Vec<(&str, &str)> {
        let mut seen = Vec::new();
        for meta in &self.metas {
            let pair = (meta.sector.as_str(), meta.subsector.as_str());
            if !seen.contains(&pair) {
                seen.push(pair);
            }
        }
        seen
    }

    /// Names of the ranked derived quantities, in evaluation order.
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.phases[Phase::Derived as usize]
            .iter()
            .map(|id| self.metas[id.0].name.as_str())
            .collect()
    }

    /// Recorded history of `name`; an error if nothing has been recorded.
    pub fn series(&self, name: &str) -> Result<&[f64], EngineError> {
        let id = self.id(name)?;
        let history = self.records[id.0].history();
        if history.is_empty() {
            return Err(EngineError::NoHistory(name.to_string()));
        }
        Ok(history)
    }

    /// Owned series for several names at once.
    pub fn series_many(&self, names: &[&str]) -> Result<Vec<Series>, EngineError> {
        names
            .iter()
            .map(|name| {
                let values = self.series(name)?;
                let quantity = self.lookup(name)?;
                Ok(Series {
                    name: name.to_string(),
                    units: quantity.units().to_string(),
                    values: values.to_vec(),
                })
            })
            .collect()
    }

    /// Simulated time at the end of each recorded tick.
    pub fn time_axis(&self) -> Vec<f64> {
        let mut time = self.clock.initial_time;
        (0..self.clock.tick)
            .map(|_| {
                time += self.clock.dt;
                time
            })
            .collect()
    }

    pub fn diagnostics_mode(&self) -> DiagnosticsMode {
        self.diagnostics.mode()
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.diagnostics.findings()
    }
}
