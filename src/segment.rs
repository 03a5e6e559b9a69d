//! Segment (C7): a single coast or maneuver arc terminated by an event
//! condition. Grounded on the teacher's pattern of a propagator fronted by
//! a narrow, purpose-built caller surface (`propagators/mod.rs`), wrapped
//! here with the satellite-system defaulting and solution bookkeeping
//! §4.7 describes.

use std::collections::HashMap;
use std::sync::Arc;

use hifitime::{Epoch, Unit};
use nalgebra::{DVector, Vector3};

use crate::coord::{
    CoordinateBroker, State, StateBuilder, CARTESIAN_POSITION, CARTESIAN_VELOCITY, DRAG_COEFFICIENT, MASS,
    SURFACE_AREA,
};
use crate::dynamics::thruster::Thruster;
use crate::dynamics::Dynamics;
use crate::errors::AstrodyneError;
use crate::event::EventCondition;
use crate::frames::Frame;
use crate::integrator::Stepper;
use crate::propagators::Propagator;

/// Dry mass, drag coefficient and cross-sectional area used to fill in
/// whichever of those subsets a segment's initial state lacks (§4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteSystem {
    pub dry_mass_kg: f64,
    pub drag_coefficient: f64,
    pub surface_area_m2: f64,
}

impl Default for SatelliteSystem {
    fn default() -> Self {
        Self {
            dry_mass_kg: 0.0,
            drag_coefficient: 2.2,
            surface_area_m2: 0.0,
        }
    }
}

impl SatelliteSystem {
    fn defaults(&self) -> HashMap<&'static str, Vec<f64>> {
        let mut map = HashMap::new();
        map.insert(MASS.name(), vec![self.dry_mass_kg]);
        map.insert(DRAG_COEFFICIENT.name(), vec![self.drag_coefficient]);
        map.insert(SURFACE_AREA.name(), vec![self.surface_area_m2]);
        map
    }
}

/// A coast or maneuver arc: a propagator configuration plus the event
/// condition that terminates it (§4.7).
#[derive(Clone)]
pub enum Segment {
    Coast {
        name: String,
        frame: Frame,
        condition: Arc<dyn EventCondition>,
        dynamics: Vec<Arc<dyn Dynamics>>,
        stepper: Stepper,
    },
    Maneuver {
        name: String,
        frame: Frame,
        condition: Arc<dyn EventCondition>,
        thruster: Arc<Thruster>,
        dynamics: Vec<Arc<dyn Dynamics>>,
        stepper: Stepper,
    },
}

impl Segment {
    pub fn coast(
        name: impl Into<String>,
        frame: Frame,
        condition: Arc<dyn EventCondition>,
        dynamics: Vec<Arc<dyn Dynamics>>,
        stepper: Stepper,
    ) -> Self {
        Segment::Coast { name: name.into(), frame, condition, dynamics, stepper }
    }

    pub fn maneuver(
        name: impl Into<String>,
        frame: Frame,
        condition: Arc<dyn EventCondition>,
        thruster: Arc<Thruster>,
        dynamics: Vec<Arc<dyn Dynamics>>,
        stepper: Stepper,
    ) -> Self {
        Segment::Maneuver { name: name.into(), frame, condition, thruster, dynamics, stepper }
    }

    pub fn name(&self) -> &str {
        match self {
            Segment::Coast { name, .. } => name,
            Segment::Maneuver { name, .. } => name,
        }
    }

    fn frame(&self) -> &Frame {
        match self {
            Segment::Coast { frame, .. } => frame,
            Segment::Maneuver { frame, .. } => frame,
        }
    }

    fn condition(&self) -> &Arc<dyn EventCondition> {
        match self {
            Segment::Coast { condition, .. } => condition,
            Segment::Maneuver { condition, .. } => condition,
        }
    }

    fn stepper(&self) -> Stepper {
        match self {
            Segment::Coast { stepper, .. } => *stepper,
            Segment::Maneuver { stepper, .. } => *stepper,
        }
    }

    /// The union dynamics list this segment propagates under: its own
    /// baseline dynamics plus, for a maneuver, the thruster term (§4.7).
    fn effective_dynamics(&self) -> Vec<Arc<dyn Dynamics>> {
        match self {
            Segment::Coast { dynamics, .. } => dynamics.clone(),
            Segment::Maneuver { thruster, dynamics, .. } => {
                let mut all = dynamics.clone();
                all.push(thruster.clone() as Arc<dyn Dynamics>);
                all
            }
        }
    }

    fn thruster(&self) -> Option<Arc<Thruster>> {
        match self {
            Segment::Coast { .. } => None,
            Segment::Maneuver { thruster, .. } => Some(thruster.clone()),
        }
    }

    /// Propagates `state` under this segment's dynamics until `condition`
    /// fires or `state.instant + max_duration_s` is reached (§4.7).
    pub fn solve(
        &self,
        state: &State,
        max_duration_s: f64,
        satellite: &SatelliteSystem,
    ) -> Result<SegmentSolution, AstrodyneError> {
        let reframed = state.in_frame(self.frame())?;
        let mut broker = (*reframed.broker).clone();
        broker.add(MASS.clone())?;
        broker.add(DRAG_COEFFICIENT.clone())?;
        broker.add(SURFACE_AREA.clone())?;
        let builder = StateBuilder::from_broker(self.frame().clone(), Arc::new(broker));
        let initial = builder.expand(&reframed, Some(&satellite.defaults()))?;

        let dynamics = self.effective_dynamics();
        let propagator = Propagator::new(self.frame().clone(), dynamics.clone(), self.stepper());

        let t_max = initial.epoch + max_duration_s * Unit::Second;
        let mut observed = Vec::new();
        let solution =
            propagator.calculate_state_to_condition_observed(&initial, t_max, self.condition().as_ref(), Some(&mut observed))?;

        if observed.last().map(|s| s.epoch) != Some(solution.state.epoch) {
            observed.push(solution.state.clone());
        }

        Ok(SegmentSolution {
            name: self.name().to_string(),
            is_maneuver: matches!(self, Segment::Maneuver { .. }),
            thruster: self.thruster(),
            dynamics,
            initial_state: initial,
            final_state: solution.state,
            observed_states: observed,
            condition_satisfied: solution.condition_satisfied,
        })
    }
}

/// The result of solving a single segment (§4.7).
#[derive(Clone)]
pub struct SegmentSolution {
    pub name: String,
    pub is_maneuver: bool,
    pub thruster: Option<Arc<Thruster>>,
    pub dynamics: Vec<Arc<dyn Dynamics>>,
    pub initial_state: State,
    pub final_state: State,
    pub observed_states: Vec<State>,
    pub condition_satisfied: bool,
}

const STANDARD_GRAVITY_M_S2: f64 = 9.806_65;

impl SegmentSolution {
    pub fn initial_mass_kg(&self) -> Result<f64, AstrodyneError> {
        Ok(self.initial_state.extract_by_name(MASS.name())?[0])
    }

    pub fn final_mass_kg(&self) -> Result<f64, AstrodyneError> {
        Ok(self.final_state.extract_by_name(MASS.name())?[0])
    }

    pub fn duration_s(&self) -> f64 {
        (self.final_state.epoch - self.initial_state.epoch).to_seconds()
    }

    /// `Isp * g0 * ln(m0/mf)` for a maneuver; the integrated acceleration
    /// norm over time for an arbitrary (including coast) segment (§4.7).
    pub fn delta_v_m_s(&self) -> Result<f64, AstrodyneError> {
        if let Some(thruster) = &self.thruster {
            let m0 = self.initial_mass_kg()?;
            let mf = self.final_mass_kg()?;
            if mf <= 0.0 || m0 <= 0.0 {
                return Err(AstrodyneError::UndefinedInput("non-positive mass in delta-v computation".to_string()));
            }
            return Ok(thruster.isp_s() * STANDARD_GRAVITY_M_S2 * (m0 / mf).ln());
        }

        let mut total = 0.0;
        for pair in self.observed_states.windows(2) {
            let a0 = self.total_acceleration(&pair[0])?.norm();
            let a1 = self.total_acceleration(&pair[1])?.norm();
            let dt = (pair[1].epoch - pair[0].epoch).to_seconds();
            total += 0.5 * (a0 + a1) * dt;
        }
        Ok(total)
    }

    /// Sum, across this segment's dynamics, of whatever each contributes to
    /// the velocity derivative at `state` — the "acceleration" a coast
    /// segment's Δv integrates (§4.7).
    fn total_acceleration(&self, state: &State) -> Result<Vector3<f64>, AstrodyneError> {
        let mut total = Vector3::zeros();
        for contribution in self.contributions_at_state(state)? {
            let (_, write_subsets, values) = contribution;
            if let Some(offset) = write_subsets.iter().position(|s| s.name() == CARTESIAN_VELOCITY.name()) {
                total += Vector3::new(values[offset], values[offset + 1], values[offset + 2]);
            }
        }
        Ok(total)
    }

    /// Per-dynamics contribution attribution (§11 "Per-dynamics contribution
    /// attribution"): every term's contribution, evaluated independently, at
    /// the observed state with the given index.
    pub fn contributions(&self, state_index: usize) -> Result<Vec<(String, DVector<f64>)>, AstrodyneError> {
        let state = self
            .observed_states
            .get(state_index)
            .ok_or_else(|| AstrodyneError::UndefinedInput(format!("no observed state at index {state_index}")))?;
        Ok(self
            .contributions_at_state(state)?
            .into_iter()
            .map(|(name, _, values)| (name, DVector::from_vec(values)))
            .collect())
    }

    #[allow(clippy::type_complexity)]
    fn contributions_at_state(
        &self,
        state: &State,
    ) -> Result<Vec<(String, Vec<Arc<dyn crate::coord::CoordinateSubset>>, Vec<f64>)>, AstrodyneError> {
        let mut out = Vec::with_capacity(self.dynamics.len());
        for d in &self.dynamics {
            let mut read = Vec::new();
            for s in d.read_subsets() {
                read.extend(state.extract_by_name(s.name())?);
            }
            let contribution = d.contribute(state.epoch, &DVector::from_vec(read), &state.frame)?;
            out.push((d.to_string(), d.write_subsets(), contribution.iter().copied().collect()));
        }
        Ok(out)
    }

    /// Maneuver extraction (§11): the Δv vector (in the segment's frame),
    /// time interval and mass flow profile of a maneuver segment's
    /// solution, or `None` for a coast. A reporting view over data the
    /// segment already collected, not new simulation.
    pub fn maneuver(&self) -> Result<Option<Maneuver>, AstrodyneError> {
        let thruster = match &self.thruster {
            Some(t) => t.clone(),
            None => return Ok(None),
        };
        if self.observed_states.is_empty() {
            return Ok(None);
        }

        let mut delta_v = Vector3::zeros();
        let mut mass_flow_profile = Vec::with_capacity(self.observed_states.len());
        for pair in self.observed_states.windows(2) {
            let read = thruster_read(&pair[0])?;
            let contribution = thruster.contribute(pair[0].epoch, &read, &pair[0].frame)?;
            let dt = (pair[1].epoch - pair[0].epoch).to_seconds();
            delta_v += Vector3::new(contribution[0], contribution[1], contribution[2]) * dt;
            mass_flow_profile.push((pair[0].epoch, contribution[3]));
        }
        if let Some(last) = self.observed_states.last() {
            let read = thruster_read(last)?;
            let contribution = thruster.contribute(last.epoch, &read, &last.frame)?;
            mass_flow_profile.push((last.epoch, contribution[3]));
        }

        Ok(Some(Maneuver {
            start: self.observed_states.first().unwrap().epoch,
            end: self.observed_states.last().unwrap().epoch,
            frame: self.final_state.frame.clone(),
            delta_v,
            mass_flow_profile,
        }))
    }
}

fn thruster_read(state: &State) -> Result<DVector<f64>, AstrodyneError> {
    let mut v = state.extract_by_name(CARTESIAN_POSITION.name())?;
    v.extend(state.extract_by_name(CARTESIAN_VELOCITY.name())?);
    v.extend(state.extract_by_name(MASS.name())?);
    Ok(DVector::from_vec(v))
}

/// A maneuver extracted from a `Segment::Maneuver` solution (§11).
#[derive(Debug, Clone)]
pub struct Maneuver {
    pub start: Epoch,
    pub end: Epoch,
    pub frame: Frame,
    pub delta_v: Vector3<f64>,
    pub mass_flow_profile: Vec<(Epoch, f64)>,
}

impl Maneuver {
    pub fn duration_s(&self) -> f64 {
        (self.end - self.start).to_seconds()
    }
}
