//! `State` (C2): an instant-tagged coordinate vector in a frame,
//! interpreted through a shared `CoordinateBroker`. `StateBuilder` binds a
//! frame and broker together to rapidly stamp out states and to
//! expand/reduce a state's subset layout.

use hifitime::Epoch;
use nalgebra::DVector;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::AstrodyneError;
use crate::frames::Frame;

use super::broker::CoordinateBroker;
use super::subset::CoordinateSubset;

/// `(instant, frame, coordinates)`, interpreted via a shared broker.
///
/// A value type: cheap to copy except for the `Arc`-shared broker.
/// Never mutated in place — every transformation produces a new `State`.
#[derive(Clone, Debug)]
pub struct State {
    pub epoch: Epoch,
    pub frame: Frame,
    pub coordinates: DVector<f64>,
    pub broker: Arc<CoordinateBroker>,
}

/// A labeled per-subset difference between two states, as produced by
/// `State::subtract`. Kept labeled (rather than flattened into one
/// same-length vector) because some subsets' `subtract` does not preserve
/// their own size (quaternions subtract to a 3-vector).
#[derive(Clone, Debug, Default)]
pub struct StateDelta(pub Vec<(&'static str, Vec<f64>)>);

impl StateDelta {
    pub fn concat(&self) -> DVector<f64> {
        let flat: Vec<f64> = self.0.iter().flat_map(|(_, v)| v.iter().copied()).collect();
        DVector::from_vec(flat)
    }

    pub fn norm(&self) -> f64 {
        self.concat().norm()
    }
}

impl State {
    pub fn new(
        epoch: Epoch,
        frame: Frame,
        coordinates: DVector<f64>,
        broker: Arc<CoordinateBroker>,
    ) -> Result<Self, AstrodyneError> {
        if coordinates.len() != broker.total_size() {
            return Err(AstrodyneError::SizeMismatch {
                expected: broker.total_size(),
                got: coordinates.len(),
            });
        }
        Ok(Self {
            epoch,
            frame,
            coordinates,
            broker,
        })
    }

    pub fn extract(&self, subset: &dyn CoordinateSubset) -> Result<Vec<f64>, AstrodyneError> {
        self.broker.extract(&self.coordinates, subset)
    }

    pub fn extract_by_name(&self, name: &'static str) -> Result<Vec<f64>, AstrodyneError> {
        self.broker.extract_by_name(&self.coordinates, name)
    }

    fn require_compatible(&self, other: &State) -> Result<(), AstrodyneError> {
        if self.broker != other.broker || self.frame != other.frame {
            return Err(AstrodyneError::FrameStructureMismatch);
        }
        Ok(())
    }

    /// Per-subset sum, keeping the same broker/frame/instant as `self`.
    pub fn add(&self, other: &State) -> Result<State, AstrodyneError> {
        self.require_compatible(other)?;
        let mut out = DVector::zeros(self.broker.total_size());
        for subset in self.broker.subsets() {
            let offset = self.broker.offset_of(subset.name()).unwrap();
            let lhs = self.extract(subset.as_ref())?;
            let rhs = other.extract(subset.as_ref())?;
            let summed = subset.add(&lhs, &rhs)?;
            for (i, v) in summed.into_iter().enumerate() {
                out[offset + i] = v;
            }
        }
        State::new(self.epoch, self.frame.clone(), out, self.broker.clone())
    }

    /// Per-subset difference, labeled by subset name (see `StateDelta`).
    pub fn subtract(&self, other: &State) -> Result<StateDelta, AstrodyneError> {
        self.require_compatible(other)?;
        let mut deltas = Vec::with_capacity(self.broker.subsets().len());
        for subset in self.broker.subsets() {
            let lhs = self.extract(subset.as_ref())?;
            let rhs = other.extract(subset.as_ref())?;
            deltas.push((subset.name(), subset.subtract(&lhs, &rhs)?));
        }
        Ok(StateDelta(deltas))
    }

    /// Re-expresses every subset of this state in `target` frame.
    pub fn in_frame(&self, target: &Frame) -> Result<State, AstrodyneError> {
        if &self.frame == target {
            return Ok(self.clone());
        }
        let mut out = DVector::zeros(self.broker.total_size());
        for subset in self.broker.subsets() {
            let offset = self.broker.offset_of(subset.name()).unwrap();
            let value = self.extract(subset.as_ref())?;
            let reframed = subset.in_frame(
                self.epoch,
                &value,
                &self.frame,
                target,
                &self.coordinates,
                &self.broker,
            )?;
            for (i, v) in reframed.into_iter().enumerate() {
                out[offset + i] = v;
            }
        }
        State::new(self.epoch, target.clone(), out, self.broker.clone())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.epoch == other.epoch
            && self.frame == other.frame
            && self.broker == other.broker
            && self.coordinates == other.coordinates
    }
}

/// A frame + broker bound together to stamp out `State`s without
/// reconstructing the broker every time, and to `expand`/`reduce` states
/// across subset layouts.
#[derive(Clone)]
pub struct StateBuilder {
    pub frame: Frame,
    pub broker: Arc<CoordinateBroker>,
}

impl StateBuilder {
    pub fn new(
        frame: Frame,
        subsets: impl IntoIterator<Item = Arc<dyn CoordinateSubset>>,
    ) -> Result<Self, AstrodyneError> {
        Ok(Self {
            frame,
            broker: Arc::new(CoordinateBroker::with_subsets(subsets)?),
        })
    }

    pub fn from_broker(frame: Frame, broker: Arc<CoordinateBroker>) -> Self {
        Self { frame, broker }
    }

    pub fn build(&self, epoch: Epoch, coordinates: DVector<f64>) -> Result<State, AstrodyneError> {
        State::new(epoch, self.frame.clone(), coordinates, self.broker.clone())
    }

    /// Widens `state` to this builder's (superset) broker, filling
    /// subsets absent from `state` with `defaults` overrides or, failing
    /// that, each subset's own default value.
    pub fn expand(
        &self,
        state: &State,
        defaults: Option<&HashMap<&'static str, Vec<f64>>>,
    ) -> Result<State, AstrodyneError> {
        let mut out = DVector::zeros(self.broker.total_size());
        for subset in self.broker.subsets() {
            let offset = self.broker.offset_of(subset.name()).unwrap();
            let value = if state.broker.contains(subset.name()) {
                state.extract_by_name(subset.name())?
            } else if let Some(v) = defaults.and_then(|d| d.get(subset.name())) {
                v.clone()
            } else {
                subset.default_value()
            };
            for (i, v) in value.into_iter().enumerate() {
                out[offset + i] = v;
            }
        }
        State::new(state.epoch, self.frame.clone(), out, self.broker.clone())
    }

    /// Narrows `state` down to this builder's subsets. Errors if `state`
    /// is missing a subset this builder requires.
    pub fn reduce(&self, state: &State) -> Result<State, AstrodyneError> {
        let mut out = DVector::zeros(self.broker.total_size());
        for subset in self.broker.subsets() {
            let offset = self.broker.offset_of(subset.name()).unwrap();
            let value = state.extract_by_name(subset.name())?;
            for (i, v) in value.into_iter().enumerate() {
                out[offset + i] = v;
            }
        }
        State::new(state.epoch, self.frame.clone(), out, self.broker.clone())
    }
}
