use hifitime::Epoch;
use nalgebra::{DVector, Vector3};
use std::fmt;
use std::sync::Arc;

use crate::coord::{CoordinateSubset, CARTESIAN_POSITION, CARTESIAN_VELOCITY};
use crate::errors::AstrodyneError;
use crate::frames::{CelestialBody, Frame};

use super::Dynamics;

/// Point-mass gravity from the environment's central body. Reads position,
/// writes velocity derivative. Requires the body to expose a gravitational
/// model and be the environment's central body (§4.3).
#[derive(Debug, Clone)]
pub struct CentralBodyGravity {
    body: Arc<CelestialBody>,
}

impl CentralBodyGravity {
    pub fn new(body: Arc<CelestialBody>) -> Result<Self, AstrodyneError> {
        if !body.is_central_body {
            return Err(AstrodyneError::NotCentralBody);
        }
        if body.gravity.is_none() {
            return Err(AstrodyneError::UndefinedModel("gravitational"));
        }
        Ok(Self { body })
    }
}

impl fmt::Display for CentralBodyGravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "central body gravity ({})", self.body.name)
    }
}

impl Dynamics for CentralBodyGravity {
    fn read_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![CARTESIAN_POSITION.clone()]
    }

    fn write_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![CARTESIAN_VELOCITY.clone()]
    }

    fn contribute(
        &self,
        _epoch: Epoch,
        read: &DVector<f64>,
        _frame: &Frame,
    ) -> Result<DVector<f64>, AstrodyneError> {
        let r = Vector3::new(read[0], read[1], read[2]);
        let rmag = r.norm();
        let gm = self.body.gm()?;
        let a = (-gm / rmag.powi(3)) * r;
        Ok(DVector::from_vec(vec![a.x, a.y, a.z]))
    }
}

/// Third-body tidal gravity: the point-mass difference between the
/// acceleration the third body imparts on the spacecraft and on the
/// central body, evaluated from the third body's ephemeris at `instant`.
/// Forbidden on the central body of the same environment (§4.3).
#[derive(Debug, Clone)]
pub struct ThirdBodyGravity {
    body: Arc<CelestialBody>,
    #[allow(dead_code)]
    central_body: Arc<CelestialBody>,
}

impl ThirdBodyGravity {
    pub fn new(body: Arc<CelestialBody>, central_body: Arc<CelestialBody>) -> Result<Self, AstrodyneError> {
        if body.is_central_body || body.name == central_body.name {
            return Err(AstrodyneError::ThirdBodyIsCentralBody);
        }
        if body.gravity.is_none() {
            return Err(AstrodyneError::UndefinedModel("gravitational"));
        }
        Ok(Self { body, central_body })
    }
}

impl fmt::Display for ThirdBodyGravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "third body gravity ({})", self.body.name)
    }
}

impl Dynamics for ThirdBodyGravity {
    fn read_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![CARTESIAN_POSITION.clone()]
    }

    fn write_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![CARTESIAN_VELOCITY.clone()]
    }

    fn contribute(
        &self,
        epoch: Epoch,
        read: &DVector<f64>,
        _frame: &Frame,
    ) -> Result<DVector<f64>, AstrodyneError> {
        let r_sc = Vector3::new(read[0], read[1], read[2]);
        // Position of the third body as seen from the central body.
        let r_third = self.body.position_at(epoch)?;
        let gm = self.body.gm()?;

        // Spacecraft as seen from the third body.
        let r_sc_from_third = r_sc - r_third;
        let r_sc_from_third3 = r_sc_from_third.norm().powi(3);
        let r_third3 = r_third.norm().powi(3);

        let a = -gm * (r_sc_from_third / r_sc_from_third3 + r_third / r_third3);
        Ok(DVector::from_vec(vec![a.x, a.y, a.z]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{Frame, PointMassGravity};
    use approx::assert_relative_eq;

    fn earth() -> Arc<CelestialBody> {
        Arc::new(CelestialBody {
            name: "Earth".to_string(),
            inertial_frame: Frame::Inertial { name: "GCRF" },
            body_fixed_frame: None,
            equatorial_radius_m: 6_378_137.0,
            is_central_body: true,
            gravity: Some(Arc::new(PointMassGravity { gm: 3.986_004_415e14 })),
            atmosphere: None,
            ephemeris: None,
        })
    }

    #[test]
    fn central_body_gravity_matches_newtons_law() {
        let gravity = CentralBodyGravity::new(earth()).unwrap();
        let read = DVector::from_vec(vec![7_000_000.0, 0.0, 0.0]);
        let frame = Frame::Inertial { name: "GCRF" };
        let a = gravity
            .contribute(Epoch::from_gregorian_tai_at_midnight(2020, 1, 1), &read, &frame)
            .unwrap();
        let expected = -3.986_004_415e14 / 7_000_000_f64.powi(2);
        assert_relative_eq!(a[0], expected, epsilon = 1e-6);
        assert_relative_eq!(a[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn central_body_gravity_rejects_non_central_body() {
        let mut body = (*earth()).clone();
        body.is_central_body = false;
        assert!(CentralBodyGravity::new(Arc::new(body)).is_err());
    }
}
