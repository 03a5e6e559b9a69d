//! Event conditions (C4): scalar/angular/instant predicates and bracketed
//! crossings over `State`s, plus the AND/OR combinators. Polymorphic over
//! the `evaluate` capability rather than a deep class hierarchy, per the
//! "dynamics as data" design note generalized to conditions. Grounded on
//! the teacher's dynamics-as-trait-object pattern (`dynamics/mod.rs`'s
//! `AccelModel`), with the variants and semantics taken from §4.4.

use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;

use hifitime::{Epoch, Unit};

use crate::coe::ClassicalElements;
use crate::coord::state::State;
use crate::coord::{CARTESIAN_POSITION, CARTESIAN_VELOCITY};
use crate::errors::AstrodyneError;

/// A predicate / crossing detector over states.
pub trait EventCondition: fmt::Debug + Send + Sync {
    /// Signed distance to the target (real/instant) or wrapped angular
    /// distance (angular). Used both for `StrictlyPositive`-style tests and
    /// as the function root-bracketing locates a zero of.
    fn evaluate(&self, state: &State) -> Result<f64, AstrodyneError>;

    /// Whether the transition `previous -> current` satisfies this
    /// condition (§4.4).
    fn is_satisfied(&self, previous: &State, current: &State) -> Result<bool, AstrodyneError>;
}

/// Sign/crossing criterion shared by real and angular conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    StrictlyPositive,
    StrictlyNegative,
    AnyCrossing,
    PositiveCrossing,
    NegativeCrossing,
}

impl Criterion {
    pub(crate) fn satisfied_by(&self, previous: f64, current: f64) -> bool {
        match self {
            Criterion::StrictlyPositive => current > 0.0,
            Criterion::StrictlyNegative => current < 0.0,
            Criterion::AnyCrossing => previous.signum() != current.signum(),
            Criterion::PositiveCrossing => previous <= 0.0 && current > 0.0,
            Criterion::NegativeCrossing => previous >= 0.0 && current < 0.0,
        }
    }
}

type ScalarFn = Arc<dyn Fn(&State) -> Result<f64, AstrodyneError> + Send + Sync>;

/// A real-valued condition: `value_fn(state) - target`, tested per `criterion`.
pub struct RealCondition {
    pub label: &'static str,
    pub value_fn: ScalarFn,
    pub target: f64,
    pub criterion: Criterion,
}

impl fmt::Debug for RealCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealCondition")
            .field("label", &self.label)
            .field("target", &self.target)
            .field("criterion", &self.criterion)
            .finish()
    }
}

impl RealCondition {
    pub fn new(label: &'static str, value_fn: ScalarFn, target: f64, criterion: Criterion) -> Self {
        Self { label, value_fn, target, criterion }
    }
}

impl EventCondition for RealCondition {
    fn evaluate(&self, state: &State) -> Result<f64, AstrodyneError> {
        Ok((self.value_fn)(state)? - self.target)
    }

    fn is_satisfied(&self, previous: &State, current: &State) -> Result<bool, AstrodyneError> {
        let p = self.evaluate(previous)?;
        let c = self.evaluate(current)?;
        Ok(self.criterion.satisfied_by(p, c))
    }
}

/// Wraps a signed angular difference into `(-pi, pi]`, the shortest-arc
/// convention used for angular crossing detection.
fn wrap_pi(angle: f64) -> f64 {
    let mut a = angle % TAU;
    if a > std::f64::consts::PI {
        a -= TAU;
    } else if a <= -std::f64::consts::PI {
        a += TAU;
    }
    a
}

/// An angular condition: identical in spirit to `RealCondition`, but values
/// and the target difference are reduced modulo 2*pi so crossings are
/// detected along the shortest arc (§4.4).
pub struct AngularCondition {
    pub label: &'static str,
    pub value_fn: ScalarFn,
    pub target: f64,
    pub criterion: Criterion,
}

impl fmt::Debug for AngularCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AngularCondition")
            .field("label", &self.label)
            .field("target", &self.target)
            .field("criterion", &self.criterion)
            .finish()
    }
}

impl AngularCondition {
    pub fn new(label: &'static str, value_fn: ScalarFn, target: f64, criterion: Criterion) -> Self {
        Self { label, value_fn, target, criterion }
    }
}

impl EventCondition for AngularCondition {
    fn evaluate(&self, state: &State) -> Result<f64, AstrodyneError> {
        let raw = (self.value_fn)(state)?;
        Ok(wrap_pi(raw - self.target))
    }

    fn is_satisfied(&self, previous: &State, current: &State) -> Result<bool, AstrodyneError> {
        let p = self.evaluate(previous)?;
        let c = self.evaluate(current)?;
        Ok(self.criterion.satisfied_by(p, c))
    }
}

/// Whether `value` lies in the closed arc `[lower, upper]`, accounting for
/// wrap-around (`lower > upper` means the arc crosses 0/2*pi).
fn in_arc(value: f64, lower: f64, upper: f64) -> bool {
    let v = ((value % TAU) + TAU) % TAU;
    let lo = ((lower % TAU) + TAU) % TAU;
    let hi = ((upper % TAU) + TAU) % TAU;
    if lo <= hi {
        v >= lo && v <= hi
    } else {
        v >= lo || v <= hi
    }
}

/// Succeeds on the entering transition into the arc `[lower, upper]` (§4.4).
pub struct WithinRange {
    pub label: &'static str,
    pub value_fn: ScalarFn,
    pub lower: f64,
    pub upper: f64,
}

impl fmt::Debug for WithinRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithinRange")
            .field("label", &self.label)
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .finish()
    }
}

impl WithinRange {
    pub fn new(label: &'static str, value_fn: ScalarFn, lower: f64, upper: f64) -> Self {
        Self { label, value_fn, lower, upper }
    }

    /// Signed distance into the arc's midpoint, used for root bracketing;
    /// zero crossing of this quantity lands inside the arc.
    fn distance(&self, state: &State) -> Result<f64, AstrodyneError> {
        let v = (self.value_fn)(state)?;
        if in_arc(v, self.lower, self.upper) {
            Ok(0.0)
        } else {
            // Shortest signed distance to the nearer boundary.
            let to_lower = wrap_pi(self.lower - v);
            let to_upper = wrap_pi(self.upper - v);
            if to_lower.abs() < to_upper.abs() {
                Ok(-to_lower.abs())
            } else {
                Ok(-to_upper.abs())
            }
        }
    }
}

impl EventCondition for WithinRange {
    fn evaluate(&self, state: &State) -> Result<f64, AstrodyneError> {
        self.distance(state)
    }

    fn is_satisfied(&self, previous: &State, current: &State) -> Result<bool, AstrodyneError> {
        let v_prev = (self.value_fn)(previous)?;
        let v_cur = (self.value_fn)(current)?;
        Ok(!in_arc(v_prev, self.lower, self.upper) && in_arc(v_cur, self.lower, self.upper))
    }
}

/// `(state.instant - target)` in seconds.
#[derive(Debug, Clone)]
pub struct InstantCondition {
    pub target: Epoch,
}

impl InstantCondition {
    pub fn new(target: Epoch) -> Self {
        Self { target }
    }
}

impl EventCondition for InstantCondition {
    fn evaluate(&self, state: &State) -> Result<f64, AstrodyneError> {
        Ok((state.epoch - self.target).to_seconds())
    }

    fn is_satisfied(&self, previous: &State, current: &State) -> Result<bool, AstrodyneError> {
        let p = self.evaluate(previous)?;
        let c = self.evaluate(current)?;
        Ok(p <= 0.0 && c > 0.0)
    }
}

/// Logical AND of child conditions, with short-circuit satisfaction and
/// joint root-bracketing on the combined sign function (§4.4): the
/// bracketing value is the most-restrictive (largest magnitude) child, so
/// the root search converges on the last child to become satisfied.
#[derive(Debug)]
pub struct And(pub Vec<Arc<dyn EventCondition>>);

impl EventCondition for And {
    fn evaluate(&self, state: &State) -> Result<f64, AstrodyneError> {
        let values: Vec<f64> = self.0.iter().map(|c| c.evaluate(state)).collect::<Result<_, _>>()?;
        Ok(values.into_iter().fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc }))
    }

    fn is_satisfied(&self, previous: &State, current: &State) -> Result<bool, AstrodyneError> {
        for c in &self.0 {
            if !c.is_satisfied(previous, current)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Logical OR of child conditions: the dual of `And` (§4.4).
#[derive(Debug)]
pub struct Or(pub Vec<Arc<dyn EventCondition>>);

impl EventCondition for Or {
    fn evaluate(&self, state: &State) -> Result<f64, AstrodyneError> {
        let values: Vec<f64> = self.0.iter().map(|c| c.evaluate(state)).collect::<Result<_, _>>()?;
        Ok(values
            .into_iter()
            .fold(f64::INFINITY, |acc, v| if v.abs() < acc.abs() { v } else { acc }))
    }

    fn is_satisfied(&self, previous: &State, current: &State) -> Result<bool, AstrodyneError> {
        for c in &self.0 {
            if c.is_satisfied(previous, current)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn coe_of(state: &State, gm: f64) -> Result<ClassicalElements, AstrodyneError> {
    let r = state.extract_by_name(CARTESIAN_POSITION.name())?;
    let v = state.extract_by_name(CARTESIAN_VELOCITY.name())?;
    ClassicalElements::from_cartesian(
        nalgebra::Vector3::new(r[0], r[1], r[2]),
        nalgebra::Vector3::new(v[0], v[1], v[2]),
        gm,
    )
}

/// Apoapsis detector: an `AngularCondition` targeting pi, guarded against
/// the angular wrap's own branch cut. `AngularCondition::evaluate` wraps
/// `ta - pi` into `(-pi, pi]`, and that wrap's seam sits exactly at
/// `ta = 0`/`2*pi` — periapsis — so a periapsis passage produces the same
/// sign flip (`+pi - eps -> -(pi - eps)`) as the genuine apoapsis crossing
/// (`+eps -> -eps`). The two are told apart by magnitude: a real crossing
/// flips sign near zero, the seam artifact flips sign near +/- pi.
struct ApoapsisCondition(AngularCondition);

/// Samples with `|value| > SEAM_GUARD_RAD` on both sides of a sign flip are
/// the periapsis branch-cut artifact, not a genuine pi-crossing.
const SEAM_GUARD_RAD: f64 = std::f64::consts::FRAC_PI_2;

impl fmt::Debug for ApoapsisCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl EventCondition for ApoapsisCondition {
    fn evaluate(&self, state: &State) -> Result<f64, AstrodyneError> {
        self.0.evaluate(state)
    }

    fn is_satisfied(&self, previous: &State, current: &State) -> Result<bool, AstrodyneError> {
        let p = self.0.evaluate(previous)?;
        let c = self.0.evaluate(current)?;
        if p.abs() > SEAM_GUARD_RAD && c.abs() > SEAM_GUARD_RAD {
            return Ok(false);
        }
        Ok(Criterion::AnyCrossing.satisfied_by(p, c))
    }
}

/// COE-flavoured convenience constructors (§11): sugar over the generic
/// real/angular condition, not a new condition kind.
pub mod conditions {
    use super::*;

    pub fn apoapsis(gm: f64) -> impl EventCondition {
        ApoapsisCondition(AngularCondition::new(
            "apoapsis",
            Arc::new(move |s: &State| Ok(coe_of(s, gm)?.ta)),
            std::f64::consts::PI,
            Criterion::AnyCrossing,
        ))
    }

    pub fn periapsis(gm: f64) -> AngularCondition {
        AngularCondition::new(
            "periapsis",
            Arc::new(move |s: &State| Ok(coe_of(s, gm)?.ta)),
            0.0,
            Criterion::AnyCrossing,
        )
    }

    pub fn true_anomaly(gm: f64, target_rad: f64, criterion: Criterion) -> AngularCondition {
        AngularCondition::new(
            "true_anomaly",
            Arc::new(move |s: &State| Ok(coe_of(s, gm)?.ta)),
            target_rad,
            criterion,
        )
    }

    pub fn eccentricity(gm: f64, target: f64, criterion: Criterion) -> RealCondition {
        RealCondition::new(
            "eccentricity",
            Arc::new(move |s: &State| Ok(coe_of(s, gm)?.e)),
            target,
            criterion,
        )
    }

    pub fn radius(target_m: f64, criterion: Criterion) -> RealCondition {
        RealCondition::new(
            "radius",
            Arc::new(|s: &State| {
                let r = s.extract_by_name(CARTESIAN_POSITION.name())?;
                Ok((r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt())
            }),
            target_m,
            criterion,
        )
    }

    pub fn duration_from(start: Epoch, duration_s: f64) -> InstantCondition {
        InstantCondition::new(start + duration_s * Unit::Second)
    }
}
