use hifitime::Epoch;
use nalgebra::DVector;
use std::fmt;
use std::sync::Arc;

use crate::coord::{CoordinateSubset, CARTESIAN_POSITION, CARTESIAN_VELOCITY};
use crate::errors::AstrodyneError;
use crate::frames::Frame;

use super::Dynamics;

/// Writes the position derivative as the identity of velocity. Exactly one
/// of these must be present in any simulation that integrates position
/// (§4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionDerivative;

impl fmt::Display for PositionDerivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "position derivative")
    }
}

impl Dynamics for PositionDerivative {
    fn read_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![CARTESIAN_VELOCITY.clone()]
    }

    fn write_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![CARTESIAN_POSITION.clone()]
    }

    fn contribute(
        &self,
        _epoch: Epoch,
        read: &DVector<f64>,
        _frame: &Frame,
    ) -> Result<DVector<f64>, AstrodyneError> {
        Ok(read.clone())
    }
}
