//! Guidance laws (§4.3): the polymorphic steering behind `Thruster`.
//! Constant-direction thrust in the local orbital (RTN) frame, Q-law
//! (Petropoulos Lyapunov feedback over classical elements), and two
//! dispatch combinators — heterogeneous (gaps allowed) and sequential
//! (partitions an overall interval, no gaps).
//!
//! Grounded on the spec's §4.3 guidance-law paragraph; the Gauss
//! variational (planetary) equations used for the Q-law gradient are
//! standard orbital mechanics (Vallado), not teacher- or pack-specific.

use hifitime::Epoch;
use nalgebra::Vector3;
use std::fmt;
use std::sync::Arc;

use crate::coe::ClassicalElements;
use crate::errors::AstrodyneError;

/// Produces a thrust-acceleration direction given the spacecraft's
/// instantaneous Cartesian state. The zero vector signals "no thrust
/// commanded at this instant" (the gap §4.3 allows for heterogeneous
/// dispatch); any other return value is a direction the caller normalizes.
pub trait GuidanceLaw: fmt::Debug + Send + Sync {
    fn thrust_direction(
        &self,
        epoch: Epoch,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        gm: f64,
    ) -> Result<Vector3<f64>, AstrodyneError>;
}

/// A fixed direction in the local orbital (radial/transverse/normal) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalDirection {
    Velocity,
    AntiVelocity,
    Radial,
    AntiRadial,
    OrbitNormal,
}

/// Constant thrust along a fixed local-orbital-frame direction.
#[derive(Debug, Clone, Copy)]
pub struct ConstantThrustLaw {
    pub direction: LocalDirection,
}

impl ConstantThrustLaw {
    pub fn new(direction: LocalDirection) -> Self {
        Self { direction }
    }
}

impl GuidanceLaw for ConstantThrustLaw {
    fn thrust_direction(
        &self,
        _epoch: Epoch,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        _gm: f64,
    ) -> Result<Vector3<f64>, AstrodyneError> {
        Ok(match self.direction {
            LocalDirection::Velocity => velocity.normalize(),
            LocalDirection::AntiVelocity => -velocity.normalize(),
            LocalDirection::Radial => position.normalize(),
            LocalDirection::AntiRadial => -position.normalize(),
            LocalDirection::OrbitNormal => position.cross(&velocity).normalize(),
        })
    }
}

/// Per-element weights in the Q-law Lyapunov function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QLawWeights {
    pub a: f64,
    pub e: f64,
    pub i: f64,
    pub raan: f64,
    pub aop: f64,
}

impl Default for QLawWeights {
    fn default() -> Self {
        Self { a: 1.0, e: 1.0, i: 1.0, raan: 1.0, aop: 1.0 }
    }
}

/// Petropoulos Q-law: steers classical elements towards `target` by
/// thrusting along the negative gradient (w.r.t. the RTN thrust
/// components) of a weighted quadratic error in (a, e, i, raan, aop).
#[derive(Debug, Clone, Copy)]
pub struct QLaw {
    pub target: ClassicalElements,
    pub weights: QLawWeights,
}

impl QLaw {
    pub fn new(target: ClassicalElements, weights: QLawWeights) -> Self {
        Self { target, weights }
    }
}

/// Coefficients of `(f_r, f_t, f_n)` in the Gauss planetary equations for
/// each classical element's time derivative (Vallado §9.2), evaluated at
/// one instantaneous state. `e` and `i` near zero are singular in `aop`
/// and `raan`; both are floored rather than propagated as `NaN`.
struct GaussPartials {
    d_a: Vector3<f64>,
    d_e: Vector3<f64>,
    d_i: Vector3<f64>,
    d_raan: Vector3<f64>,
    d_aop: Vector3<f64>,
}

fn gauss_partials(coe: &ClassicalElements, gm: f64) -> GaussPartials {
    let p = coe.a * (1.0 - coe.e * coe.e);
    let r = p / (1.0 + coe.e * coe.ta.cos());
    let h = (gm * p).sqrt();
    let theta = coe.aop + coe.ta;
    let e_safe = coe.e.max(1e-9);
    let sin_i = coe.i.sin();
    let sin_i_safe = if sin_i.abs() < 1e-9 { 1e-9 } else { sin_i };

    let d_a = Vector3::new(
        2.0 * coe.a * coe.a / h * coe.e * coe.ta.sin(),
        2.0 * coe.a * coe.a / h * (p / r),
        0.0,
    );
    let d_e = Vector3::new(
        (1.0 / h) * p * coe.ta.sin(),
        (1.0 / h) * ((p + r) * coe.ta.cos() + r * coe.e),
        0.0,
    );
    let d_i = Vector3::new(0.0, 0.0, r * theta.cos() / h);
    let d_raan = Vector3::new(0.0, 0.0, r * theta.sin() / (h * sin_i_safe));
    let d_aop = Vector3::new(
        -p * coe.ta.cos() / (h * e_safe),
        (p + r) * coe.ta.sin() / (h * e_safe),
        -r * theta.sin() * coe.i.cos() / (h * sin_i_safe),
    );

    GaussPartials { d_a, d_e, d_i, d_raan, d_aop }
}

impl GuidanceLaw for QLaw {
    fn thrust_direction(
        &self,
        _epoch: Epoch,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        gm: f64,
    ) -> Result<Vector3<f64>, AstrodyneError> {
        let coe = ClassicalElements::from_cartesian(position, velocity, gm)?;
        let partials = gauss_partials(&coe, gm);

        let mut grad = Vector3::zeros();
        grad += 2.0 * self.weights.a * (coe.a - self.target.a) * partials.d_a;
        grad += 2.0 * self.weights.e * (coe.e - self.target.e) * partials.d_e;
        grad += 2.0 * self.weights.i * (coe.i - self.target.i) * partials.d_i;
        grad += 2.0 * self.weights.raan * (coe.raan - self.target.raan) * partials.d_raan;
        grad += 2.0 * self.weights.aop * (coe.aop - self.target.aop) * partials.d_aop;

        if grad.norm() < 1e-15 {
            return Ok(Vector3::zeros());
        }
        let direction_rtn = -grad.normalize();

        let r_hat = position.normalize();
        let w_hat = position.cross(&velocity).normalize();
        let t_hat = w_hat.cross(&r_hat);
        Ok(direction_rtn.x * r_hat + direction_rtn.y * t_hat + direction_rtn.z * w_hat)
    }
}

/// Dispatches to whichever leg's interval contains `epoch`; outside every
/// leg (or in a gap between legs) the command is zero thrust.
#[derive(Debug, Clone)]
pub struct HeterogeneousLaw {
    pub legs: Vec<(Epoch, Epoch, Arc<dyn GuidanceLaw>)>,
}

impl HeterogeneousLaw {
    pub fn new(legs: Vec<(Epoch, Epoch, Arc<dyn GuidanceLaw>)>) -> Self {
        Self { legs }
    }
}

impl GuidanceLaw for HeterogeneousLaw {
    fn thrust_direction(
        &self,
        epoch: Epoch,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        gm: f64,
    ) -> Result<Vector3<f64>, AstrodyneError> {
        for (start, end, law) in &self.legs {
            if epoch >= *start && epoch < *end {
                return law.thrust_direction(epoch, position, velocity, gm);
            }
        }
        Ok(Vector3::zeros())
    }
}

/// Partitions `[boundaries[0], boundaries[n]]` into `n` contiguous legs,
/// one law per leg, with no gaps inside the overall interval.
#[derive(Debug, Clone)]
pub struct SequentialLaw {
    pub boundaries: Vec<Epoch>,
    pub laws: Vec<Arc<dyn GuidanceLaw>>,
}

impl SequentialLaw {
    pub fn new(boundaries: Vec<Epoch>, laws: Vec<Arc<dyn GuidanceLaw>>) -> Result<Self, AstrodyneError> {
        if boundaries.len() != laws.len() + 1 {
            return Err(AstrodyneError::UndefinedInput(
                "a sequential guidance law needs exactly one more boundary than laws".to_string(),
            ));
        }
        Ok(Self { boundaries, laws })
    }
}

impl GuidanceLaw for SequentialLaw {
    fn thrust_direction(
        &self,
        epoch: Epoch,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        gm: f64,
    ) -> Result<Vector3<f64>, AstrodyneError> {
        for (i, law) in self.laws.iter().enumerate() {
            if epoch >= self.boundaries[i] && epoch < self.boundaries[i + 1] {
                return law.thrust_direction(epoch, position, velocity, gm);
            }
        }
        Ok(Vector3::zeros())
    }
}
