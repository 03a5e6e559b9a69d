//! Propagator (C6): assembles a dynamics list into an ODE right-hand side
//! and hands it to the numerical integrator, fronting its three
//! time/condition operations with `State`-level signatures (§4.6).
//!
//! Grounded on the teacher's `Propagator` (`propagators/mod.rs`) in shape —
//! owns dynamics plus a stepper, exposes `calculate_state_at` the way the
//! teacher exposes `until_time_elapsed` — but restructured from a
//! fixed-size `VectorN<f64, M::StateSize>` wrapping a single monomorphic
//! `Dynamics` into a runtime union broker over a `Vec<Arc<dyn Dynamics>>`,
//! since the broker's layout is only known once the caller's state and the
//! dynamics list are both in hand.

use hifitime::{Epoch, Unit};
use nalgebra::DVector;
use std::sync::Arc;

use crate::coord::{CoordinateBroker, State, StateBuilder};
use crate::dynamics::Dynamics;
use crate::errors::AstrodyneError;
use crate::event::EventCondition;
use crate::frames::Frame;
use crate::integrator::{ConditionSolution, NumericalIntegrator, Stepper};

/// Precomputed absolute broker indices a single dynamics term reads from
/// and writes to, so each RHS evaluation is pure indexing (§4.6 step 2).
struct DynamicsLayout {
    read_indices: Vec<usize>,
    write_indices: Vec<usize>,
}

/// Assembles the union dynamics of a segment into an ODE and integrates a
/// `State` to instants or to an event condition.
#[derive(Clone)]
pub struct Propagator {
    pub frame: Frame,
    pub dynamics: Vec<Arc<dyn Dynamics>>,
    pub stepper: Stepper,
}

impl Propagator {
    pub fn new(frame: Frame, dynamics: Vec<Arc<dyn Dynamics>>, stepper: Stepper) -> Self {
        Self { frame, dynamics, stepper }
    }

    /// Builds the union broker (caller's broker widened with every
    /// read/write subset the dynamics list needs) and the per-dynamics
    /// index layout against it (§4.6 steps 1-2).
    fn prepare(&self, initial_broker: &CoordinateBroker) -> Result<(Arc<CoordinateBroker>, Vec<DynamicsLayout>), AstrodyneError> {
        let mut broker = initial_broker.clone();
        for d in &self.dynamics {
            for s in d.read_subsets() {
                broker.add(s)?;
            }
            for s in d.write_subsets() {
                broker.add(s)?;
            }
        }
        let broker = Arc::new(broker);

        let mut layouts = Vec::with_capacity(self.dynamics.len());
        for d in &self.dynamics {
            let mut read_indices = Vec::new();
            for s in d.read_subsets() {
                let offset = broker
                    .offset_of(s.name())
                    .ok_or_else(|| AstrodyneError::MissingSubset(s.name().to_string()))?;
                read_indices.extend(offset..offset + s.size());
            }
            let mut write_indices = Vec::new();
            for s in d.write_subsets() {
                let offset = broker
                    .offset_of(s.name())
                    .ok_or_else(|| AstrodyneError::MissingSubset(s.name().to_string()))?;
                write_indices.extend(offset..offset + s.size());
            }
            layouts.push(DynamicsLayout { read_indices, write_indices });
        }
        Ok((broker, layouts))
    }

    /// Builds the right-hand side `f(t, x) -> dx/dt` for one call, closed
    /// over the union broker, the dynamics/layout pairs, the starting
    /// epoch, and the integration frame (§4.6 step 3).
    fn build_rhs(
        &self,
        epoch0: Epoch,
        broker_size: usize,
        layouts: Vec<DynamicsLayout>,
    ) -> impl Fn(f64, &DVector<f64>) -> Result<DVector<f64>, AstrodyneError> + '_ {
        move |t_rel, y| {
            let epoch = epoch0 + t_rel * Unit::Second;
            let mut deriv = DVector::zeros(broker_size);
            for (dynamics, layout) in self.dynamics.iter().zip(layouts.iter()) {
                let read = DVector::from_iterator(layout.read_indices.len(), layout.read_indices.iter().map(|&i| y[i]));
                let contribution = dynamics.contribute(epoch, &read, &self.frame).map_err(|source| {
                    AstrodyneError::DynamicsFailure {
                        epoch: epoch.to_string(),
                        source: Box::new(source),
                    }
                })?;
                for (k, &idx) in layout.write_indices.iter().enumerate() {
                    deriv[idx] += contribution[k];
                }
            }
            Ok(deriv)
        }
    }

    fn prepared_initial_state(&self, x0: &State) -> Result<(State, Arc<CoordinateBroker>, Vec<DynamicsLayout>), AstrodyneError> {
        let reframed = x0.in_frame(&self.frame)?;
        let (broker, layouts) = self.prepare(&reframed.broker)?;
        let builder = StateBuilder::from_broker(self.frame.clone(), broker.clone());
        let expanded = builder.expand(&reframed, None)?;
        Ok((expanded, broker, layouts))
    }

    /// `calculateStateAt` (§4.6, §6.2).
    pub fn calculate_state_at(&self, x0: &State, t: Epoch) -> Result<State, AstrodyneError> {
        let (expanded, broker, layouts) = self.prepared_initial_state(x0)?;
        let rhs = self.build_rhs(expanded.epoch, broker.total_size(), layouts);
        let mut integrator = NumericalIntegrator::new(self.stepper);
        let t_rel = (t - expanded.epoch).to_seconds();
        let y1 = integrator.integrate_to_instant(&expanded.coordinates, 0.0, t_rel, &rhs)?;
        State::new(t, self.frame.clone(), y1, broker)
    }

    /// `calculateStatesAt` (§4.6, §6.2).
    pub fn calculate_states_at(&self, x0: &State, instants: &[Epoch]) -> Result<Vec<State>, AstrodyneError> {
        let (expanded, broker, layouts) = self.prepared_initial_state(x0)?;
        let rhs = self.build_rhs(expanded.epoch, broker.total_size(), layouts);
        let mut integrator = NumericalIntegrator::new(self.stepper);
        let t_rels: Vec<f64> = instants.iter().map(|e| (*e - expanded.epoch).to_seconds()).collect();
        let ys = integrator.integrate_to_instants(&expanded.coordinates, 0.0, &t_rels, &rhs)?;
        instants
            .iter()
            .zip(ys.into_iter())
            .map(|(e, y)| State::new(*e, self.frame.clone(), y, broker.clone()))
            .collect()
    }

    /// `calculateStateToCondition` (§4.6, §6.2).
    pub fn calculate_state_to_condition(
        &self,
        x0: &State,
        t_max: Epoch,
        condition: &dyn EventCondition,
    ) -> Result<ConditionSolution, AstrodyneError> {
        self.calculate_state_to_condition_observed(x0, t_max, condition, None)
    }

    /// As `calculate_state_to_condition`, but also appends every
    /// integrator-observed state to `observed_out` (used by
    /// `Segment::solve`, §4.7, to recover the dense trajectory of a leg).
    pub fn calculate_state_to_condition_observed(
        &self,
        x0: &State,
        t_max: Epoch,
        condition: &dyn EventCondition,
        observed_out: Option<&mut Vec<State>>,
    ) -> Result<ConditionSolution, AstrodyneError> {
        let (expanded, broker, layouts) = self.prepared_initial_state(x0)?;
        let epoch0 = expanded.epoch;
        let rhs = self.build_rhs(epoch0, broker.total_size(), layouts);

        let frame = self.frame.clone();
        let broker_for_state = broker.clone();
        let to_state = move |t_rel: f64, y: &DVector<f64>| -> Result<State, AstrodyneError> {
            State::new(epoch0 + t_rel * Unit::Second, frame.clone(), y.clone(), broker_for_state.clone())
        };

        let mut integrator = NumericalIntegrator::new(self.stepper).with_log_mode(true);
        let t_max_rel = (t_max - epoch0).to_seconds();
        let solution = integrator.integrate_to_condition(&expanded.coordinates, 0.0, t_max_rel, &rhs, &to_state, condition)?;

        if let Some(out) = observed_out {
            for (t_rel, y) in integrator.observed_states() {
                out.push(State::new(epoch0 + *t_rel * Unit::Second, self.frame.clone(), y.clone(), broker.clone())?);
            }
        }
        Ok(solution)
    }
}
