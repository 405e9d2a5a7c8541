//! Lag primitives: first-order smoothing, third-order information delay, and
//! fixed-length transport delay.
//!
//! Each lag is bound to its upstream by name. The name resolves to a handle
//! when the scheduler resets, and evaluating an unbound lag is an error.

use std::collections::{HashMap, VecDeque};

use crate::error::EngineError;
use crate::quantity::{QuantityId, Values};

/// Named reference to the upstream quantity.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    upstream_name: String,
    upstream: Option<QuantityId>,
}

impl Binding {
    pub fn new(upstream_name: impl Into<String>) -> Self {
        Self {
            upstream_name: upstream_name.into(),
            upstream: None,
        }
    }

    pub fn resolve(
        &mut self,
        lag: &str,
        index: &HashMap<String, QuantityId>,
    ) -> Result<QuantityId, EngineError> {
        let id = index
            .get(&self.upstream_name)
            .copied()
            .ok_or_else(|| EngineError::MissingUpstream {
                lag: lag.to_string(),
                upstream: self.upstream_name.clone(),
            })?;
        self.upstream = Some(id);
        Ok(id)
    }

    fn upstream(&self, lag: &str) -> Result<QuantityId, EngineError> {
        self.upstream
            .ok_or_else(|| EngineError::Unbound(lag.to_string()))
    }
}

/// First-evaluation seeding state of a filtering lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seeding {
    Armed,
    /// Seeded during the current step; filtering starts after it advances
    Seeded,
    Done,
}

/// First-order exponential smoothing.
#[derive(Debug, Clone)]
pub(crate) struct Smooth {
    pub binding: Binding,
    time_constant: f64,
    seeding: Seeding,
}

impl Smooth {
    pub fn new(upstream: impl Into<String>, time_constant: f64) -> Self {
        Self {
            binding: Binding::new(upstream),
            time_constant,
            seeding: Seeding::Armed,
        }
    }

    pub fn time_constant(&self) -> f64 {
        self.time_constant
    }

    pub fn reset(&mut self) {
        self.seeding = Seeding::Armed;
    }

    /// `previous + dt * (upstream.previous - previous) / time_constant`.
    ///
    /// The first step after a reset adopts the upstream's current value in
    /// both slots instead of filtering.
    pub fn update(
        &mut self,
        name: &str,
        own: QuantityId,
        values: &mut Values,
        dt: f64,
    ) -> Result<f64, EngineError> {
        let upstream = self.binding.upstream(name)?;
        if self.seeding != Seeding::Done {
            let seed = values.current[upstream.0];
            values.seed(own, seed);
            self.seeding = Seeding::Seeded;
            return Ok(seed);
        }

        let previous = values.previous[own.0];
        Ok(previous + dt * (values.previous[upstream.0] - previous) / self.time_constant)
    }

    pub fn advance(&mut self) {
        if self.seeding == Seeding::Seeded {
            self.seeding = Seeding::Done;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Stage {
    previous: f64,
    current: f64,
}

/// Third-order information delay: three cascaded smoothing stages, each with
/// a third of the total time constant.
#[derive(Debug, Clone)]
pub(crate) struct Delay3 {
    pub binding: Binding,
    time_constant: f64,
    stages: [Stage; 3],
    seeding: Seeding,
}

impl Delay3 {
    pub fn new(upstream: impl Into<String>, time_constant: f64) -> Self {
        Self {
            binding: Binding::new(upstream),
            time_constant,
            stages: [Stage::default(); 3],
            seeding: Seeding::Armed,
        }
    }

    pub fn time_constant(&self) -> f64 {
        self.time_constant
    }

    /// Re-arms first-step seeding.
    pub fn reset(&mut self) {
        self.seeding = Seeding::Armed;
    }

    /// Seeds every stage and the quantity itself from the upstream's current
    /// value.
    pub fn initialize(
        &mut self,
        name: &str,
        own: QuantityId,
        values: &mut Values,
    ) -> Result<(), EngineError> {
        let upstream = self.binding.upstream(name)?;
        let seed = values.current[upstream.0];
        self.seed(own, values, seed);
        Ok(())
    }

    fn seed(&mut self, own: QuantityId, values: &mut Values, value: f64) {
        self.stages = [Stage {
            previous: value,
            current: value,
        }; 3];
        values.seed(own, value);
    }

    pub fn update(
        &mut self,
        name: &str,
        own: QuantityId,
        values: &mut Values,
        dt: f64,
    ) -> Result<f64, EngineError> {
        let upstream = self.binding.upstream(name)?;
        if self.seeding != Seeding::Done {
            let seed = values.current[upstream.0];
            self.seed(own, values, seed);
            self.seeding = Seeding::Seeded;
            return Ok(seed);
        }

        let stage_time = self.time_constant / 3.0;
        let inputs = [
            values.previous[upstream.0],
            self.stages[0].previous,
            self.stages[1].previous,
        ];
        for (stage, input) in self.stages.iter_mut().zip(inputs) {
            stage.current = stage.previous + dt * (input - stage.previous) / stage_time;
        }
        Ok(self.stages[2].current)
    }

    pub fn advance(&mut self) {
        for stage in &mut self.stages {
            stage.previous = stage.current;
        }
        if self.seeding == Seeding::Seeded {
            self.seeding = Seeding::Done;
        }
    }

    #[cfg(test)]
    fn stage_values(&self) -> [f64; 3] {
        [
            self.stages[0].current,
            self.stages[1].current,
            self.stages[2].current,
        ]
    }
}

/// Pure transport delay: a FIFO of `round(delay / dt)` slots.
#[derive(Debug, Clone)]
pub(crate) struct TransportDelay {
    pub binding: Binding,
    delay: f64,
    queue: VecDeque<f64>,
    length: usize,
    incoming: Option<f64>,
    primed: bool,
}

impl TransportDelay {
    pub fn new(upstream: impl Into<String>, delay: f64) -> Self {
        Self {
            binding: Binding::new(upstream),
            delay,
            queue: VecDeque::new(),
            length: 0,
            incoming: None,
            primed: false,
        }
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn reset(&mut self) {
        self.primed = false;
        self.incoming = None;
    }

    /// Sizes the queue for `dt` and pre-fills it with the upstream's current
    /// value.
    pub fn initialize(
        &mut self,
        name: &str,
        values: &Values,
        dt: f64,
    ) -> Result<(), EngineError> {
        let upstream = self.binding.upstream(name)?;
        self.length = (self.delay / dt).round() as usize;
        self.fill(values.current[upstream.0]);
        Ok(())
    }

    fn fill(&mut self, value: f64) {
        self.queue.clear();
        self.queue.extend(std::iter::repeat(value).take(self.length));
        self.incoming = None;
    }

    /// Emits the oldest queued value and stages the upstream's newest one for
    /// [`TransportDelay::advance`]. Repeated calls within one step return the
    /// same value.
    ///
    /// The first evaluation after a reset refills the queue from the upstream's
    /// current value, so an upstream that is itself computed during settling
    /// starts the run from a steady baseline.
    pub fn update(&mut self, name: &str, values: &Values) -> Result<f64, EngineError> {
        let upstream = self.binding.upstream(name)?;
        let newest = values.current[upstream.0];
        if !self.primed {
            self.fill(newest);
            self.primed = true;
        }

        self.incoming = Some(newest);
        Ok(self.queue.front().copied().unwrap_or(newest))
    }

    /// Shifts the queue one slot, taking in the value staged this step.
    pub fn advance(&mut self) {
        if let Some(value) = self.incoming.take() {
            if self.queue.pop_front().is_some() {
                self.queue.push_back(value);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UP: QuantityId = QuantityId(0);
    const OWN: QuantityId = QuantityId(1);

    fn bound_index() -> HashMap<String, QuantityId> {
        HashMap::from([("up".to_string(), UP)])
    }

    #[test]
    fn test_unbound_lag_fails() {
        let mut smooth = Smooth::new("up", 2.0);
        let mut values = Values::with_len(2);
        let err = smooth.update("s", OWN, &mut values, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::Unbound(name) if name == "s"));
    }

    #[test]
    fn test_binding_to_missing_upstream_fails() {
        let mut binding = Binding::new("nowhere");
        let err = binding.resolve("lag", &bound_index()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingUpstream { ref lag, ref upstream } if lag == "lag" && upstream == "nowhere"
        ));
    }

    #[test]
    fn test_smooth_seeds_then_filters() {
        let mut smooth = Smooth::new("up", 4.0);
        smooth.binding.resolve("s", &bound_index()).unwrap();
        let mut values = Values::with_len(2);
        values.seed(UP, 8.0);

        let first = smooth.update("s", OWN, &mut values, 1.0).unwrap();
        assert_eq!(first, 8.0);
        assert_eq!(values.previous[OWN.0], 8.0);
        // seeding holds until the step advances
        values.current[UP.0] = 12.0;
        assert_eq!(smooth.update("s", OWN, &mut values, 1.0).unwrap(), 12.0);
        values.current[UP.0] = 8.0;
        smooth.update("s", OWN, &mut values, 1.0).unwrap();
        smooth.advance();

        // upstream jumps; the smooth reads the upstream's previous slot
        values.previous[UP.0] = 16.0;
        let second = smooth.update("s", OWN, &mut values, 1.0).unwrap();
        assert_eq!(second, 10.0);

        smooth.reset();
        values.current[UP.0] = 3.0;
        assert_eq!(smooth.update("s", OWN, &mut values, 1.0).unwrap(), 3.0);
    }

    #[test]
    fn test_delay3_cascades_through_previous_stage_values() {
        let mut delay = Delay3::new("up", 3.0);
        delay.binding.resolve("d", &bound_index()).unwrap();
        let mut values = Values::with_len(2);

        assert_eq!(delay.update("d", OWN, &mut values, 1.0).unwrap(), 0.0);
        delay.advance();

        // stage time is 1.0 with dt 1.0, so each stage copies its input
        values.previous[UP.0] = 6.0;
        assert_eq!(delay.update("d", OWN, &mut values, 1.0).unwrap(), 0.0);
        assert_eq!(delay.stage_values(), [6.0, 0.0, 0.0]);
        delay.advance();

        delay.update("d", OWN, &mut values, 1.0).unwrap();
        assert_eq!(delay.stage_values(), [6.0, 6.0, 0.0]);
        delay.advance();

        assert_eq!(delay.update("d", OWN, &mut values, 1.0).unwrap(), 6.0);
    }

    #[test]
    fn test_delay3_reset_rearms_seeding() {
        let mut delay = Delay3::new("up", 6.0);
        delay.binding.resolve("d", &bound_index()).unwrap();
        let mut values = Values::with_len(2);
        values.seed(UP, 1.0);
        delay.update("d", OWN, &mut values, 1.0).unwrap();
        delay.advance();

        values.seed(UP, 9.0);
        delay.reset();
        assert_eq!(delay.update("d", OWN, &mut values, 1.0).unwrap(), 9.0);
        assert_eq!(delay.stage_values(), [9.0; 3]);
        assert_eq!(values.previous[OWN.0], 9.0);
    }

    #[test]
    fn test_transport_delay_shifts_by_queue_length() {
        let mut delay = TransportDelay::new("up", 2.0);
        delay.binding.resolve("t", &bound_index()).unwrap();
        let mut values = Values::with_len(2);
        values.current[UP.0] = 1.0;
        delay.initialize("t", &values, 1.0).unwrap();
        assert_eq!(delay.len(), 2);

        let mut outputs = Vec::new();
        for input in [1.0, 2.0, 3.0, 4.0, 5.0] {
            values.current[UP.0] = input;
            outputs.push(delay.update("t", &values).unwrap());
            delay.advance();
        }
        assert_eq!(outputs, vec![1.0, 1.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_transport_delay_repeated_update_within_a_step() {
        let mut delay = TransportDelay::new("up", 2.0);
        delay.binding.resolve("t", &bound_index()).unwrap();
        let mut values = Values::with_len(2);
        delay.initialize("t", &values, 1.0).unwrap();

        let mut outputs = Vec::new();
        for input in [4.0, 5.0, 6.0, 7.0] {
            values.current[UP.0] = input;
            delay.update("t", &values).unwrap();
            values.current[UP.0] = input * 10.0;
            delay.update("t", &values).unwrap();
            outputs.push(delay.update("t", &values).unwrap());
            delay.advance();
        }
        // only the last staged input of each step enters the queue
        assert_eq!(outputs, vec![4.0, 4.0, 40.0, 50.0]);
    }

    #[test]
    fn test_transport_delay_shorter_than_half_step_passes_through() {
        let mut delay = TransportDelay::new("up", 0.2);
        delay.binding.resolve("t", &bound_index()).unwrap();
        let mut values = Values::with_len(2);
        delay.initialize("t", &values, 1.0).unwrap();
        assert_eq!(delay.len(), 0);

        values.current[UP.0] = 5.0;
        assert_eq!(delay.update("t", &values).unwrap(), 5.0);
        delay.advance();
        values.current[UP.0] = 7.0;
        assert_eq!(delay.update("t", &values).unwrap(), 7.0);
    }
}
