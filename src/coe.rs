//! Classical orbital elements (COE) and the anomaly conversions that sit
//! underneath Q-law guidance (§4.3), the COE-flavoured event condition
//! sugar (§11 "COE-flavoured event conditions") and the BLM mean-element
//! machinery used by the TLE-specialized orbit determination (§4.10).
//!
//! Not a named component of its own in §2 — grounded on the spec's COE
//! glossary entry and on the teacher's `Orbit`/two-body usage throughout
//! `dynamics/orbital.rs` (`osc.radius()`, `osc.rmag()`), generalized here
//! into the standalone conversions those call sites presuppose but never
//! spell out.

use nalgebra::{Matrix3, Vector3};
use std::f64::consts::{PI, TAU};

use crate::errors::AstrodyneError;

/// Classical (Keplerian) orbital elements: semi-major axis (m),
/// eccentricity, inclination, RAAN, argument of periapsis, true anomaly
/// (all angles in radians).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassicalElements {
    pub a: f64,
    pub e: f64,
    pub i: f64,
    pub raan: f64,
    pub aop: f64,
    pub ta: f64,
}

fn wrap_2pi(angle: f64) -> f64 {
    let wrapped = angle % TAU;
    if wrapped < 0.0 {
        wrapped + TAU
    } else {
        wrapped
    }
}

impl ClassicalElements {
    /// Derives classical elements from a Cartesian state in a frame whose
    /// origin is the attracting body, given that body's `gm`.
    pub fn from_cartesian(r: Vector3<f64>, v: Vector3<f64>, gm: f64) -> Result<Self, AstrodyneError> {
        let rmag = r.norm();
        if rmag < f64::EPSILON {
            return Err(AstrodyneError::UndefinedInput("radius is zero".to_string()));
        }
        let h = r.cross(&v);
        let hmag = h.norm();
        if hmag < f64::EPSILON {
            return Err(AstrodyneError::UndefinedInput("angular momentum is zero (rectilinear orbit)".to_string()));
        }
        let node = Vector3::z().cross(&h);
        let e_vec = v.cross(&h) / gm - r / rmag;
        let e = e_vec.norm();

        let energy = v.norm_squared() / 2.0 - gm / rmag;
        let a = if (e - 1.0).abs() > 1e-10 {
            -gm / (2.0 * energy)
        } else {
            f64::INFINITY
        };

        let i = (h.z / hmag).clamp(-1.0, 1.0).acos();

        let raan = if node.norm() < f64::EPSILON {
            0.0
        } else {
            let raw = (node.x / node.norm()).clamp(-1.0, 1.0).acos();
            if node.y < 0.0 {
                TAU - raw
            } else {
                raw
            }
        };

        let aop = if node.norm() < f64::EPSILON || e < f64::EPSILON {
            0.0
        } else {
            let raw = (node.dot(&e_vec) / (node.norm() * e)).clamp(-1.0, 1.0).acos();
            if e_vec.z < 0.0 {
                TAU - raw
            } else {
                raw
            }
        };

        let ta = if e < f64::EPSILON {
            // Circular: measure from the node (or from x if equatorial too).
            let reference = if node.norm() < f64::EPSILON { Vector3::x() } else { node };
            let raw = (reference.dot(&r) / (reference.norm() * rmag)).clamp(-1.0, 1.0).acos();
            if r.dot(&v) < 0.0 {
                TAU - raw
            } else {
                raw
            }
        } else {
            let raw = (e_vec.dot(&r) / (e * rmag)).clamp(-1.0, 1.0).acos();
            if r.dot(&v) < 0.0 {
                TAU - raw
            } else {
                raw
            }
        };

        Ok(Self {
            a,
            e,
            i,
            raan: wrap_2pi(raan),
            aop: wrap_2pi(aop),
            ta: wrap_2pi(ta),
        })
    }

    /// Builds the (r, v) Cartesian pair these elements describe, under `gm`.
    pub fn to_cartesian(&self, gm: f64) -> (Vector3<f64>, Vector3<f64>) {
        let p = self.a * (1.0 - self.e * self.e);
        let r_mag = p / (1.0 + self.e * self.ta.cos());
        let r_pf = Vector3::new(r_mag * self.ta.cos(), r_mag * self.ta.sin(), 0.0);
        let v_pf = (gm / p).sqrt() * Vector3::new(-self.ta.sin(), self.e + self.ta.cos(), 0.0);

        let r_rot = rotation_z(self.raan) * rotation_x(self.i) * rotation_z(self.aop);
        (r_rot * r_pf, r_rot * v_pf)
    }

    pub fn periapsis_radius(&self) -> f64 {
        self.a * (1.0 - self.e)
    }

    pub fn apoapsis_radius(&self) -> f64 {
        self.a * (1.0 + self.e)
    }

    pub fn with_true_anomaly(&self, ta: f64) -> Self {
        Self {
            ta: wrap_2pi(ta),
            ..*self
        }
    }
}

fn rotation_z(angle: f64) -> Matrix3<f64> {
    Matrix3::new(
        angle.cos(), -angle.sin(), 0.0,
        angle.sin(), angle.cos(), 0.0,
        0.0, 0.0, 1.0,
    )
}

fn rotation_x(angle: f64) -> Matrix3<f64> {
    Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, angle.cos(), -angle.sin(),
        0.0, angle.sin(), angle.cos(),
    )
}

/// True anomaly -> eccentric anomaly, radians.
pub fn ta_to_ea(ta: f64, e: f64) -> f64 {
    2.0 * ((1.0 - e).sqrt() * (ta / 2.0).sin()).atan2((1.0 + e).sqrt() * (ta / 2.0).cos())
}

/// Eccentric anomaly -> true anomaly, radians.
pub fn ea_to_ta(ea: f64, e: f64) -> f64 {
    2.0 * ((1.0 + e).sqrt() * (ea / 2.0).sin()).atan2((1.0 - e).sqrt() * (ea / 2.0).cos())
}

/// Eccentric anomaly -> mean anomaly, radians (Kepler's equation, direct).
pub fn ea_to_ma(ea: f64, e: f64) -> f64 {
    ea - e * ea.sin()
}

/// Mean anomaly -> eccentric anomaly via Newton-Raphson on Kepler's equation.
pub fn ma_to_ea(ma: f64, e: f64) -> Result<f64, AstrodyneError> {
    if !(0.0..1.0).contains(&e) {
        return Err(AstrodyneError::InvalidEccentricity(e));
    }
    let ma = wrap_2pi(ma);
    let mut ea = if e < 0.8 { ma } else { PI };
    for _ in 0..50 {
        let f = ea - e * ea.sin() - ma;
        let fp = 1.0 - e * ea.cos();
        let delta = f / fp;
        ea -= delta;
        if delta.abs() < 1e-13 {
            return Ok(ea);
        }
    }
    Err(AstrodyneError::IterationBudgetExhausted(50))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EARTH_GM: f64 = 3.986_004_415e14;

    #[test]
    fn circular_equatorial_round_trips() {
        let r = Vector3::new(7_000_000.0, 0.0, 0.0);
        let v = Vector3::new(0.0, 7_546.053_29, 0.0);
        let coe = ClassicalElements::from_cartesian(r, v, EARTH_GM).unwrap();
        assert_relative_eq!(coe.e, 0.0, epsilon = 1e-6);
        let (r2, v2) = coe.to_cartesian(EARTH_GM);
        assert_relative_eq!(r2, r, epsilon = 1e-3);
        assert_relative_eq!(v2, v, epsilon = 1e-6);
    }

    #[test]
    fn eccentric_inclined_round_trips() {
        let coe = ClassicalElements {
            a: 8_000_000.0,
            e: 0.1,
            i: 0.9,
            raan: 1.2,
            aop: 0.4,
            ta: 2.1,
        };
        let (r, v) = coe.to_cartesian(EARTH_GM);
        let back = ClassicalElements::from_cartesian(r, v, EARTH_GM).unwrap();
        assert_relative_eq!(back.a, coe.a, epsilon = 1e-6);
        assert_relative_eq!(back.e, coe.e, epsilon = 1e-9);
        assert_relative_eq!(back.i, coe.i, epsilon = 1e-9);
        assert_relative_eq!(back.raan, coe.raan, epsilon = 1e-9);
        assert_relative_eq!(back.aop, coe.aop, epsilon = 1e-9);
        assert_relative_eq!(back.ta, coe.ta, epsilon = 1e-9);
    }

    #[test]
    fn anomaly_round_trip() {
        let e = 0.3;
        let ma = 1.4;
        let ea = ma_to_ea(ma, e).unwrap();
        assert_relative_eq!(ea_to_ma(ea, e), ma, epsilon = 1e-10);
        let ta = ea_to_ta(ea, e);
        assert_relative_eq!(ta_to_ea(ta, e), ea, epsilon = 1e-10);
    }
}
