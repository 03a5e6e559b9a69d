//! Thruster dynamics (§4.3): consults a guidance law for a thrust
//! direction, contributes it (scaled by thrust magnitude over mass) to the
//! velocity derivative, and contributes `-|thrust|/(Isp * g0)` to the mass
//! derivative. Grounded on `dynamics/gravity.rs` and `dynamics/drag.rs`'s
//! shape — a `CelestialBody`-holding term with `read_subsets`/
//! `write_subsets`/`contribute` — generalized to hold a guidance law
//! instead of a force model.

pub mod guidance;

use hifitime::Epoch;
use nalgebra::{DVector, Vector3};
use std::fmt;
use std::sync::Arc;

use crate::coord::{CoordinateSubset, CARTESIAN_POSITION, CARTESIAN_VELOCITY, MASS};
use crate::errors::AstrodyneError;
use crate::frames::{CelestialBody, Frame};

use self::guidance::GuidanceLaw;
use super::Dynamics;

/// Standard gravity, m/s^2, used to convert specific impulse (s) into an
/// effective exhaust velocity for the Tsiolkovsky mass-flow relation.
pub const STANDARD_GRAVITY_M_S2: f64 = 9.806_65;

/// Finite-thrust maneuver dynamics: reads position, velocity and mass;
/// writes velocity derivative and mass derivative (§4.3).
#[derive(Debug, Clone)]
pub struct Thruster {
    thrust_n: f64,
    isp_s: f64,
    guidance: Arc<dyn GuidanceLaw>,
    central_body: Arc<CelestialBody>,
}

impl Thruster {
    pub fn new(thrust_n: f64, isp_s: f64, guidance: Arc<dyn GuidanceLaw>, central_body: Arc<CelestialBody>) -> Self {
        Self { thrust_n, isp_s, guidance, central_body }
    }

    pub fn thrust_n(&self) -> f64 {
        self.thrust_n
    }

    pub fn isp_s(&self) -> f64 {
        self.isp_s
    }

    /// Mass flow rate, kg/s (always non-positive: `-|thrust|/(Isp * g0)`).
    pub fn mass_flow_rate(&self) -> f64 {
        -self.thrust_n / (self.isp_s * STANDARD_GRAVITY_M_S2)
    }
}

impl fmt::Display for Thruster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thruster ({} N, Isp {} s)", self.thrust_n, self.isp_s)
    }
}

impl Dynamics for Thruster {
    fn read_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![CARTESIAN_POSITION.clone(), CARTESIAN_VELOCITY.clone(), MASS.clone()]
    }

    fn write_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![CARTESIAN_VELOCITY.clone(), MASS.clone()]
    }

    fn contribute(&self, epoch: Epoch, read: &DVector<f64>, _frame: &Frame) -> Result<DVector<f64>, AstrodyneError> {
        let r = Vector3::new(read[0], read[1], read[2]);
        let v = Vector3::new(read[3], read[4], read[5]);
        let mass = read[6];
        if mass <= 0.0 {
            return Err(AstrodyneError::UndefinedInput("thruster contribution requires positive mass".to_string()));
        }

        let gm = self.central_body.gm()?;
        let commanded = self.guidance.thrust_direction(epoch, r, v, gm)?;
        if commanded.norm() < 1e-12 {
            return Ok(DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0]));
        }

        let unit = commanded.normalize();
        let accel = (self.thrust_n / mass) * unit;
        Ok(DVector::from_vec(vec![accel.x, accel.y, accel.z, self.mass_flow_rate()]))
    }
}
