//! Brouwer-Lyddane mean (BLM) elements (§GLOSSARY, §4.10 "TLE
//! specialization", §9 design notes) — the mean-element set the
//! TLE-specialized least-squares OD estimates, and a J2-secular mean-element
//! propagator that stands in for the external SGP4 collaborator (§1 scopes
//! SGP4's exact internal algorithm out; `original_source/SGP4.cpp`'s
//! internals are explicitly excluded by §11's supplement list).
//!
//! Scoping decision (recorded in DESIGN.md): full Brouwer-Lyddane short
//! period theory corrects all six elements; this crate carries the
//! dominant, well-conditioned first-order J2 short-period term on
//! semi-major axis only (the term every derivation of mean motion from an
//! osculating state starts with) and treats eccentricity, inclination,
//! RAAN, argument of periapsis and mean anomaly as secular-only between
//! mean and osculating space. The fixed-point iteration and best-seen-error
//! guard §9 calls out are preserved around that one corrected element.

use hifitime::{Epoch, Unit};
use nalgebra::Vector3;
use std::f64::consts::PI;

use crate::coe::{ea_to_ma, ea_to_ta, ma_to_ea, ta_to_ea, ClassicalElements};
use crate::errors::AstrodyneError;

/// Brouwer-Lyddane mean elements plus the SGP4-style drag term `bstar`.
/// Angles in radians, `a` in meters, `bstar` in inverse Earth radii (as
/// the TLE format defines it) but otherwise treated as an opaque estimated
/// parameter here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrouwerLyddaneMean {
    pub a: f64,
    pub e: f64,
    pub i: f64,
    pub raan: f64,
    pub aop: f64,
    pub ma: f64,
    pub bstar: f64,
}

/// Maximum inverse iterations for `from_osculating` (§9).
const MAX_INVERSE_ITER: usize = 30;
const CONVERGENCE_TOL_M: f64 = 1e-6;

/// Inclinations within this of pi use the reflected pseudo-state
/// `(pi - i, -raan)` for the short-period correction (§9 open question:
/// "preserve as-is").
const NEAR_EQUATORIAL_RETROGRADE_TOL_RAD: f64 = 1e-8;

fn wrap_2pi(angle: f64) -> f64 {
    let wrapped = angle % (2.0 * PI);
    if wrapped < 0.0 {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// First-order J2 short-period correction to semi-major axis, Brouwer's
/// classical formula (e.g. Vallado, "Fundamentals of Astrodynamics", the
/// J2 secular+short-period term on `a`): given mean `a_mean` and the
/// instantaneous radius/argument-of-latitude pair, returns the
/// corresponding osculating `a`.
fn osculating_a(a_mean: f64, e: f64, i: f64, r: f64, u: f64, j2: f64, req: f64) -> f64 {
    let p = a_mean * (1.0 - e * e);
    let cos_i2 = i.cos() * i.cos();
    let gamma2 = j2 * (req / p).powi(2) / 2.0;
    let correction = gamma2
        * ((3.0 * cos_i2 - 1.0) * ((a_mean / r).powi(3) - (1.0 - e * e).powf(-1.5))
            + 3.0 * (1.0 - cos_i2) * (a_mean / r).powi(3) * (2.0 * u).cos());
    a_mean * (1.0 + correction)
}

/// Pure secular J2 rates (rad/s) at mean elements `(a, e, i)`: RAAN,
/// argument of periapsis, and mean-motion (mean-anomaly) drift.
pub fn secular_rates(a: f64, e: f64, i: f64, gm: f64, j2: f64, req: f64) -> (f64, f64, f64) {
    let n0 = (gm / a.powi(3)).sqrt();
    let p = a * (1.0 - e * e);
    let factor = j2 * (req / p).powi(2);
    let cos_i = i.cos();
    let raan_dot = -1.5 * n0 * factor * cos_i;
    let aop_dot = 0.75 * n0 * factor * (5.0 * cos_i * cos_i - 1.0);
    let ma_dot = n0 * (1.0 + 0.75 * factor * (1.0 - e * e).sqrt() * (3.0 * cos_i * cos_i - 1.0));
    (raan_dot, aop_dot, ma_dot)
}

impl BrouwerLyddaneMean {
    /// Converts mean elements to the osculating classical elements at the
    /// same epoch (the semi-major-axis short-period correction applied,
    /// everything else treated as already osculating — see module scoping
    /// note).
    pub fn to_osculating(&self, gm: f64, j2: f64, req: f64) -> Result<ClassicalElements, AstrodyneError> {
        let (i_eff, raan_eff, reflected) = reflected_pseudo_state(self.i, self.raan);
        let ea = ma_to_ea(self.ma, self.e)?;
        let ta = ea_to_ta(ea, self.e);
        let r = self.a * (1.0 - self.e * ea.cos());
        let u = self.aop + ta;
        let a_osc = osculating_a(self.a, self.e, i_eff, r, u, j2, req);

        let (i_out, raan_out) = if reflected {
            (PI - i_eff, wrap_2pi(-raan_eff))
        } else {
            (i_eff, raan_eff)
        };

        Ok(ClassicalElements {
            a: a_osc,
            e: self.e,
            i: i_out,
            raan: wrap_2pi(raan_out),
            aop: wrap_2pi(self.aop),
            ta: wrap_2pi(ta),
        })
    }

    /// Inverts `to_osculating` by fixed-point iteration on `a` (§9): start
    /// from `osc` as the initial mean guess, repeatedly re-derive the
    /// osculating `a` the current mean guess would produce, and correct the
    /// guess by the residual. Breaks out and returns the best-seen iterate,
    /// with `converged = false`, the moment the residual stops improving —
    /// preserving the source's best-seen-error guard (§9).
    pub fn from_osculating(osc: &ClassicalElements, _gm: f64, j2: f64, req: f64) -> Result<(Self, bool), AstrodyneError> {
        if !(0.0..0.99).contains(&osc.e) {
            return Err(AstrodyneError::InvalidEccentricity(osc.e));
        }
        if !(0.0..PI).contains(&osc.i) {
            return Err(AstrodyneError::InvalidInclination(osc.i));
        }

        let ea = ta_to_ea(osc.ta, osc.e);
        let ma = ea_to_ma(ea, osc.e);
        let r = osc.a * (1.0 - osc.e * ea.cos());
        let (i_eff, raan_eff, reflected) = reflected_pseudo_state(osc.i, osc.raan);
        let u = osc.aop + osc.ta;

        let mut a_mean = osc.a;
        let mut best_a_mean = osc.a;
        let mut best_error = f64::INFINITY;
        let mut converged = false;

        for _ in 0..MAX_INVERSE_ITER {
            let predicted_osc_a = osculating_a(a_mean, osc.e, i_eff, r, u, j2, req);
            let error = (predicted_osc_a - osc.a).abs();

            if error >= best_error {
                break;
            }
            best_error = error;
            best_a_mean = a_mean;

            if error < CONVERGENCE_TOL_M {
                converged = true;
                break;
            }
            a_mean -= predicted_osc_a - osc.a;
        }

        let (i_out, raan_out) = if reflected {
            (PI - i_eff, wrap_2pi(-raan_eff))
        } else {
            (i_eff, raan_eff)
        };

        Ok((
            Self {
                a: best_a_mean,
                e: osc.e,
                i: i_out,
                raan: wrap_2pi(raan_out),
                aop: wrap_2pi(osc.aop),
                ma: wrap_2pi(ma),
                bstar: 0.0,
            },
            converged,
        ))
    }

    /// Secular-J2 propagation of mean elements from this epoch to `at`
    /// (no drag decay modeled on `a`/`e` — `bstar` is carried through
    /// untouched as an estimated parameter, matching the TLE specialization
    /// treating it as one of the six-plus-one estimation variables rather
    /// than feeding back into the dynamics here). Stands in for the
    /// external SGP4 propagator (§4.10, §1 non-goals).
    pub fn propagate_secular(&self, epoch0: Epoch, at: Epoch, gm: f64, j2: f64, req: f64) -> Self {
        let dt = (at - epoch0).to_seconds();
        let (raan_dot, aop_dot, ma_dot) = secular_rates(self.a, self.e, self.i, gm, j2, req);
        Self {
            a: self.a,
            e: self.e,
            i: self.i,
            raan: wrap_2pi(self.raan + raan_dot * dt),
            aop: wrap_2pi(self.aop + aop_dot * dt),
            ma: wrap_2pi(self.ma + ma_dot * dt),
            bstar: self.bstar,
        }
    }

    /// Cartesian position/velocity at `at`, given this is the mean-element
    /// state at `epoch0`: secular-propagate, then apply the short-period
    /// correction back to osculating space (§4.10 forward model for the
    /// TLE-specialized LSQ-OD).
    pub fn cartesian_at(
        &self,
        epoch0: Epoch,
        at: Epoch,
        gm: f64,
        j2: f64,
        req: f64,
    ) -> Result<(Vector3<f64>, Vector3<f64>), AstrodyneError> {
        let propagated = self.propagate_secular(epoch0, at, gm, j2, req);
        let osc = propagated.to_osculating(gm, j2, req)?;
        Ok(osc.to_cartesian(gm))
    }
}

/// Reflects `(i, raan)` to the pseudo-state `(pi - i, -raan)` when `i` is
/// within tolerance of `pi` (§9 open question: correct per Brouwer,
/// preserved as-is). Returns `(i_used, raan_used, was_reflected)`.
fn reflected_pseudo_state(i: f64, raan: f64) -> (f64, f64, bool) {
    if (PI - i).abs() < NEAR_EQUATORIAL_RETROGRADE_TOL_RAD {
        (PI - i, wrap_2pi(-raan), true)
    } else {
        (i, raan, false)
    }
}

pub fn seconds_between(epoch0: Epoch, at: Epoch) -> f64 {
    (at - epoch0).to_seconds()
}

pub fn duration_from_seconds(s: f64) -> hifitime::Duration {
    s * Unit::Second
}
