use hifitime::Epoch;
use nalgebra::{DVector, Vector3};
use std::fmt;
use std::sync::Arc;

use crate::coord::{
    CoordinateSubset, CARTESIAN_POSITION, CARTESIAN_VELOCITY, DRAG_COEFFICIENT, MASS, SURFACE_AREA,
};
use crate::errors::AstrodyneError;
use crate::frames::{CelestialBody, Frame, MIN_PROPAGATION_ALTITUDE_M};

use super::Dynamics;

/// Atmospheric drag. Reads position, velocity, mass, area and drag
/// coefficient; writes velocity derivative. Below
/// `MIN_PROPAGATION_ALTITUDE_M` the contribution is not computed — the
/// error surfaces as re-entry (§4.3, §7).
#[derive(Debug, Clone)]
pub struct AtmosphericDrag {
    body: Arc<CelestialBody>,
}

impl AtmosphericDrag {
    pub fn new(body: Arc<CelestialBody>) -> Self {
        Self { body }
    }
}

impl fmt::Display for AtmosphericDrag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atmospheric drag ({})", self.body.name)
    }
}

impl Dynamics for AtmosphericDrag {
    fn read_subsets(&self) -> Vec<Arc<dyn CoordinateSubset>> {
        vec![
            CARTESIAN_POSITION.clone(),
            CARTESIAN_VELOCITY.clone(),
            MASS.clone(),
            SURFACE_AREA.clone(),
            DRAG_COEFFICIENT.clone(),
        ]
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
        let r = Vector3::new(read[0], read[1], read[2]);
        let v = Vector3::new(read[3], read[4], read[5]);
        let mass = read[6];
        let area = read[7];
        let cd = read[8];

        let atmosphere = self
            .body
            .atmosphere
            .as_ref()
            .ok_or(AstrodyneError::UndefinedModel("atmospheric"))?;

        let altitude = r.norm() - self.body.equatorial_radius_m;
        if altitude < MIN_PROPAGATION_ALTITUDE_M {
            return Err(AstrodyneError::Reentry {
                altitude_m: altitude,
                min_altitude_m: MIN_PROPAGATION_ALTITUDE_M,
            });
        }

        let rho = atmosphere.density_at_altitude(altitude);

        // Co-rotation velocity: body angular velocity x position, derived
        // from the body-fixed-to-inertial transform at this instant rather
        // than a hard-coded sidereal rate (§9 open question).
        let co_rotation = match &self.body.body_fixed_frame {
            Some(body_fixed) => body_fixed.angular_velocity_in_parent(epoch).cross(&r),
            None => Vector3::zeros(),
        };
        let v_rel = v - co_rotation;
        let v_rel_mag = v_rel.norm();

        let a = -0.5 * rho * cd * (area / mass) * v_rel_mag * v_rel;
        Ok(DVector::from_vec(vec![a.x, a.y, a.z]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::ExponentialAtmosphere;
    use approx::assert_relative_eq;

    fn earth_no_rotation() -> Arc<CelestialBody> {
        Arc::new(CelestialBody {
            name: "Earth".to_string(),
            inertial_frame: Frame::Inertial { name: "GCRF" },
            body_fixed_frame: None,
            equatorial_radius_m: 6_378_137.0,
            is_central_body: true,
            gravity: None,
            atmosphere: Some(Arc::new(ExponentialAtmosphere {
                reference_altitude_m: 600_000.0,
                reference_density_kg_m3: 1e-13,
                scale_height_m: 60_000.0,
            })),
            ephemeris: None,
        })
    }

    #[test]
    fn drag_opposes_relative_velocity() {
        let drag = AtmosphericDrag::new(earth_no_rotation());
        let read = DVector::from_vec(vec![7_000_000.0, 0.0, 0.0, 0.0, 7_546.053_29, 0.0, 100.0, 1.0, 2.2]);
        let frame = Frame::Inertial { name: "GCRF" };
        let a = drag
            .contribute(Epoch::from_gregorian_tai_at_midnight(2021, 3, 20), &read, &frame)
            .unwrap();
        assert!(a[1] < 0.0, "drag should decelerate along velocity direction");
        assert_relative_eq!(a[0], 0.0, epsilon = 1e-20);
        assert_relative_eq!(a[2], 0.0, epsilon = 1e-20);
    }

    #[test]
    fn drag_reports_reentry_below_minimum_altitude() {
        let drag = AtmosphericDrag::new(earth_no_rotation());
        let read = DVector::from_vec(vec![6_400_000.0, 0.0, 0.0, 0.0, 7_000.0, 0.0, 100.0, 1.0, 2.2]);
        let frame = Frame::Inertial { name: "GCRF" };
        let err = drag
            .contribute(Epoch::from_gregorian_tai_at_midnight(2021, 3, 20), &read, &frame)
            .unwrap_err();
        assert!(matches!(err, AstrodyneError::Reentry { .. }));
    }
}
