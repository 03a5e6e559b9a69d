//! Dynamics terms (C3): contributions producing write-subsets from
//! read-subsets at an instant. Treated as data — `(read_subsets,
//! write_subsets, contribute)` — rather than a deep class hierarchy, per
//! the spec's "dynamics as data, not inheritance" design note. Grounded on
//! the teacher's `Dynamics`/`AccelModel` traits in `dynamics/mod.rs` and
//! `dynamics/orbital.rs`, generalized from fixed-dimension generics to the
//! runtime coordinate broker.

use hifitime::Epoch;
use nalgebra::DVector;
use std::fmt;
use std::sync::Arc;

use crate::coord::CoordinateSubset;
use crate::errors::AstrodyneError;
use crate::frames::{Environment, Frame};

pub mod drag;
pub mod gravity;
pub mod position_derivative;
pub mod thruster;

pub use drag::AtmosphericDrag;
pub use gravity::{CentralBodyGravity, ThirdBodyGravity};
pub use position_derivative::PositionDerivative;
pub use thruster::{guidance::GuidanceLaw, Thruster};

/// A contribution to the state derivative from a single physical effect.
///
/// `contribute` must be pure with respect to `read` beyond `epoch`: no
/// hidden time-dependent state inside the term itself (§4.3).
pub trait Dynamics: fmt::Debug + fmt::Display + Send + Sync {
    /// Subsets this term reads from the state, in the order its `contribute`
    /// expects them concatenated.
    fn read_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>>;

    /// Subsets this term writes to the derivative, in the order its
    /// `contribute` returns them concatenated.
    fn write_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>>;

    /// Computes this term's contribution. `read` is the concatenation of
    /// `read_subsets()` in order; the result is the concatenation of
    /// `write_subsets()` in order.
    fn contribute(
        &self,
        epoch: Epoch,
        read: &DVector<f64>,
        frame: &Frame,
    ) -> Result<DVector<f64>, AstrodyneError>;
}

/// Builds the default dynamics set for an environment: one position
/// derivative, one central-body gravity, one third-body gravity per other
/// body with a gravitational model, and drag if the central body has an
/// atmospheric model (§4.3 "Factory").
pub fn default_dynamics(environment: &Environment) -> Result<Vec<Arc<dyn Dynamics>>, AstrodyneError> {
    let mut terms: Vec<Arc<dyn Dynamics>> = vec![Arc::new(PositionDerivative)];

    terms.push(Arc::new(CentralBodyGravity::new(environment.central_body.clone())?));

    for body in &environment.other_bodies {
        if body.gravity.is_some() {
            terms.push(Arc::new(ThirdBodyGravity::new(
                body.clone(),
                environment.central_body.clone(),
            )?));
        }
    }

    if environment.central_body.atmosphere.is_some() {
        terms.push(Arc::new(AtmosphericDrag::new(environment.central_body.clone())));
    }

    Ok(terms)
}
