//! Numerical integrator (C5) — the hardest part of the engine per the
//! spec. Single-threaded, sequential adaptive stepping (RKF78) plus a
//! fixed-step RK4 for deterministic tests, dense Hermite output for
//! request-instant interpolation, and condition-driven root bracketing.
//!
//! Grounded on the teacher's `propagators/mod.rs` `Propagator::derive`
//! (the accept/reject/shrink/grow adaptive-step loop, `IntegrationDetails`)
//! generalized from a fixed-size `VectorN<f64, M::StateSize>` to the
//! broker's runtime-sized `DVector<f64>`, and restructured per §9's design
//! note: "coroutine-like integration with root finding maps cleanly to an
//! iterative loop with a nested bracketed root solve".

use log::{trace, warn};
use nalgebra::DVector;
use std::fmt;

use crate::coord::state::State;
use crate::errors::AstrodyneError;
use crate::event::EventCondition;
use crate::interp::hermite_interpolate;
use crate::rootfind::brent;

/// Tolerance/step-size bundle for the adaptive stepper. Mirrors the
/// teacher's `PropOpts`, renamed to match this component's new name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorOpts {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub init_step_s: f64,
    pub min_step_s: f64,
    pub max_step_s: f64,
}

impl Default for IntegratorOpts {
    fn default() -> Self {
        Self {
            rel_tol: 1e-12,
            abs_tol: 1e-12,
            init_step_s: 5.0,
            min_step_s: 1e-9,
            max_step_s: 2700.0,
        }
    }
}

/// The stepping scheme. `Rkf78` is the adaptive default; `Rk4Fixed` is
/// exposed for deterministic test use (§4.5).
#[derive(Debug, Clone, Copy)]
pub enum Stepper {
    Rkf78(IntegratorOpts),
    Rk4Fixed { step_s: f64 },
}

impl Default for Stepper {
    fn default() -> Self {
        Stepper::Rkf78(IntegratorOpts::default())
    }
}

type Rhs<'a> = dyn Fn(f64, &DVector<f64>) -> Result<DVector<f64>, AstrodyneError> + 'a;
type ToState<'a> = dyn Fn(f64, &DVector<f64>) -> Result<State, AstrodyneError> + 'a;

/// Per-step bookkeeping, analogous to the teacher's `IntegrationDetails`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepDetails {
    pub step_s: f64,
    pub error_norm: f64,
    pub attempts: u32,
}

/// Outcome of a condition-bounded integration (§4.5, operation 3).
#[derive(Debug, Clone)]
pub struct ConditionSolution {
    pub state: State,
    pub condition_satisfied: bool,
    pub iteration_count: usize,
    pub root_solver_converged: bool,
}

/// Adaptive ODE stepper with state observation and condition-driven root
/// location (C5). Owns the only two mutable resources the spec assigns it:
/// the observed-states log and the adapted step-size hint.
pub struct NumericalIntegrator {
    stepper: Stepper,
    log_mode: bool,
    observed: Vec<(f64, DVector<f64>)>,
    current_step: f64,
    details: StepDetails,
    observer: Option<Box<dyn FnMut(f64, &DVector<f64>) + Send>>,
}

impl fmt::Debug for NumericalIntegrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumericalIntegrator")
            .field("stepper", &self.stepper)
            .field("log_mode", &self.log_mode)
            .field("observed_len", &self.observed.len())
            .finish()
    }
}

const ROOT_TOL_S: f64 = 1e-9;
const ROOT_MAX_ITER: usize = 100;

impl NumericalIntegrator {
    pub fn new(stepper: Stepper) -> Self {
        Self {
            stepper,
            log_mode: false,
            observed: Vec::new(),
            current_step: 0.0,
            details: StepDetails::default(),
            observer: None,
        }
    }

    pub fn with_log_mode(mut self, on: bool) -> Self {
        self.log_mode = on;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn FnMut(f64, &DVector<f64>) + Send>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn observed_states(&self) -> &[(f64, DVector<f64>)] {
        &self.observed
    }

    pub fn clear_log(&mut self) {
        self.observed.clear();
    }

    pub fn latest_details(&self) -> StepDetails {
        self.details
    }

    fn opts(&self) -> IntegratorOpts {
        match self.stepper {
            Stepper::Rkf78(opts) => opts,
            Stepper::Rk4Fixed { .. } => IntegratorOpts::default(),
        }
    }

    fn record(&mut self, t: f64, y: &DVector<f64>) {
        if let Some(observer) = self.observer.as_mut() {
            observer(t, y);
        }
        if self.log_mode {
            self.observed.push((t, y.clone()));
        }
    }

    /// Takes one accepted step from `(t, y)`, never stepping past `t +
    /// cap` in the step's direction. Returns `(t1, y1, dy_at_t, dy_at_t1)`.
    fn step(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        rhs: &Rhs,
        direction: f64,
        cap_magnitude: f64,
    ) -> Result<(f64, DVector<f64>, DVector<f64>, DVector<f64>), AstrodyneError> {
        match self.stepper {
            Stepper::Rk4Fixed { step_s } => {
                let h = direction * step_s.abs().min(cap_magnitude.max(f64::EPSILON));
                let dy0 = rhs(t, y)?;
                let k1 = dy0.clone();
                let k2 = rhs(t + h / 2.0, &(y + (h / 2.0) * &k1))?;
                let k3 = rhs(t + h / 2.0, &(y + (h / 2.0) * &k2))?;
                let k4 = rhs(t + h, &(y + h * &k3))?;
                let y1 = y + (h / 6.0) * (&k1 + 2.0 * &k2 + 2.0 * &k3 + &k4);
                let t1 = t + h;
                let dy1 = rhs(t1, &y1)?;
                self.details = StepDetails { step_s: h, error_norm: 0.0, attempts: 1 };
                Ok((t1, y1, dy0, dy1))
            }
            Stepper::Rkf78(opts) => self.step_rkf78(t, y, rhs, direction, cap_magnitude, &opts),
        }
    }

    fn step_rkf78(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        rhs: &Rhs,
        direction: f64,
        cap_magnitude: f64,
        opts: &IntegratorOpts,
    ) -> Result<(f64, DVector<f64>, DVector<f64>, DVector<f64>), AstrodyneError> {
        if self.current_step == 0.0 {
            self.current_step = opts.init_step_s;
        }
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let h_mag = self.current_step.abs().min(opts.max_step_s).min(cap_magnitude.max(opts.min_step_s));
            let h = direction * h_mag;

            let (dy0, y1, error_vec) = rkf78_stage(t, y, h, rhs)?;

            let mut sum_sq = 0.0;
            for i in 0..y1.len() {
                let scale = opts.abs_tol + opts.rel_tol * y1[i].abs().max(y[i].abs());
                let ratio = error_vec[i] / scale;
                sum_sq += ratio * ratio;
            }
            let error_norm = (sum_sq / (y1.len().max(1) as f64)).sqrt();
            self.details = StepDetails { step_s: h, error_norm, attempts };

            if error_norm <= 1.0 || h_mag <= opts.min_step_s {
                if error_norm > 1.0 {
                    warn!("accepting step below minimum step size despite error_norm={error_norm}");
                }
                let t1 = t + h;
                let dy1 = rhs(t1, &y1)?;
                let growth = if error_norm > 1e-12 {
                    (0.9 * error_norm.powf(-1.0 / 8.0)).clamp(0.2, 5.0)
                } else {
                    5.0
                };
                self.current_step = (h_mag * growth).min(opts.max_step_s);
                trace!("accepted rkf78 step of {h} s, error_norm={error_norm}");
                return Ok((t1, y1, dy0, dy1));
            }

            let shrunk = h_mag / 2.0;
            if shrunk < opts.min_step_s {
                return Err(AstrodyneError::StepSizeUnderflow);
            }
            self.current_step = shrunk;
        }
    }

    /// Integrates from `x0` (at `t0`) through the sorted request instants
    /// (monotone in either direction), returning one state per request,
    /// preserving input order (§4.5, operation 1).
    pub fn integrate_to_instants(
        &mut self,
        y0: &DVector<f64>,
        t0: f64,
        instants: &[f64],
        rhs: &Rhs,
    ) -> Result<Vec<DVector<f64>>, AstrodyneError> {
        if instants.is_empty() {
            return Ok(Vec::new());
        }
        let ascending = instants.windows(2).all(|w| w[1] >= w[0]);
        let descending = instants.windows(2).all(|w| w[1] <= w[0]);
        if !ascending && !descending {
            return Err(AstrodyneError::UndefinedInput(
                "request instants must be monotone in one direction".to_string(),
            ));
        }
        let direction = if instants[0] >= t0 { 1.0 } else { -1.0 };
        self.current_step = self.opts().init_step_s;

        let mut t = t0;
        let mut y = y0.clone();
        let mut bracket: Option<(f64, DVector<f64>, DVector<f64>, f64, DVector<f64>, DVector<f64>)> = None;
        let mut out = Vec::with_capacity(instants.len());

        for &target in instants {
            while (direction > 0.0 && t < target) || (direction < 0.0 && t > target) {
                let cap = (target - t).abs();
                let (t1, y1, dy0, dy1) = self.step(t, &y, rhs, direction, cap)?;
                bracket = Some((t, y.clone(), dy0, t1, y1.clone(), dy1));
                t = t1;
                y = y1;
                self.record(t, &y);
            }
            if (t - target).abs() < 1e-9 {
                out.push(y.clone());
            } else if let Some((ta, ya, dya, tb, yb, dyb)) = &bracket {
                out.push(hermite_interpolate(*ta, ya, dya, *tb, yb, dyb, target));
            } else {
                out.push(y.clone());
            }
        }
        Ok(out)
    }

    /// Degenerate single-instant case (§4.5, operation 2).
    pub fn integrate_to_instant(
        &mut self,
        y0: &DVector<f64>,
        t0: f64,
        t_end: f64,
        rhs: &Rhs,
    ) -> Result<DVector<f64>, AstrodyneError> {
        Ok(self.integrate_to_instants(y0, t0, &[t_end], rhs)?.remove(0))
    }

    /// Integrates forward/backward until `t_end_max` is reached or
    /// `condition` becomes satisfied, in which case the crossing is
    /// bracketed and located by the scalar root solver (§4.5, operation 3).
    #[allow(clippy::too_many_arguments)]
    pub fn integrate_to_condition(
        &mut self,
        y0: &DVector<f64>,
        t0: f64,
        t_end_max: f64,
        rhs: &Rhs,
        to_state: &ToState,
        condition: &dyn EventCondition,
    ) -> Result<ConditionSolution, AstrodyneError> {
        let direction = if t_end_max >= t0 { 1.0 } else { -1.0 };
        self.current_step = self.opts().init_step_s;

        let mut t = t0;
        let mut y = y0.clone();
        let mut previous_state = to_state(t, &y)?;
        let mut iteration_count = 0usize;

        loop {
            if (direction > 0.0 && t >= t_end_max) || (direction < 0.0 && t <= t_end_max) {
                return Ok(ConditionSolution {
                    state: to_state(t, &y)?,
                    condition_satisfied: false,
                    iteration_count,
                    root_solver_converged: false,
                });
            }
            let cap = (t_end_max - t).abs();
            let (t1, y1, dy0, dy1) = self.step(t, &y, rhs, direction, cap)?;
            iteration_count += 1;
            self.record(t1, &y1);

            let current_state = to_state(t1, &y1)?;
            if condition.is_satisfied(&previous_state, &current_state)? {
                let (lo, hi) = if t <= t1 { (t, t1) } else { (t1, t) };
                let (y_lo, dy_lo, y_hi, dy_hi) = if t <= t1 {
                    (y.clone(), dy0.clone(), y1.clone(), dy1.clone())
                } else {
                    (y1.clone(), dy1.clone(), y.clone(), dy0.clone())
                };
                let interp_at = |tau: f64| hermite_interpolate(lo, &y_lo, &dy_lo, hi, &y_hi, &dy_hi, tau);
                let mut last_err: Option<AstrodyneError> = None;
                let root = brent(
                    |tau| match to_state(tau, &interp_at(tau)).and_then(|s| condition.evaluate(&s)) {
                        Ok(v) => v,
                        Err(e) => {
                            last_err = Some(e);
                            f64::NAN
                        }
                    },
                    lo,
                    hi,
                    ROOT_TOL_S,
                    ROOT_MAX_ITER,
                );
                if let Some(e) = last_err {
                    return Err(e);
                }
                return match root {
                    Ok(sol) if sol.converged => {
                        let y_root = interp_at(sol.root);
                        Ok(ConditionSolution {
                            state: to_state(sol.root, &y_root)?,
                            condition_satisfied: true,
                            iteration_count,
                            root_solver_converged: true,
                        })
                    }
                    _ => {
                        warn!("root solver failed to converge while bracketing an event condition");
                        Ok(ConditionSolution {
                            state: current_state,
                            condition_satisfied: true,
                            iteration_count,
                            root_solver_converged: false,
                        })
                    }
                };
            }

            previous_state = current_state;
            t = t1;
            y = y1;
        }
    }
}

/// One RKF78 stage evaluation: returns `(dy_at_t, y1_8th_order, error_vector)`.
fn rkf78_stage(
    t: f64,
    y: &DVector<f64>,
    h: f64,
    rhs: &Rhs,
) -> Result<(DVector<f64>, DVector<f64>, DVector<f64>), AstrodyneError> {
    const C: [f64; 13] = [
        0.0,
        2.0 / 27.0,
        1.0 / 9.0,
        1.0 / 6.0,
        5.0 / 12.0,
        0.5,
        5.0 / 6.0,
        1.0 / 6.0,
        2.0 / 3.0,
        1.0 / 3.0,
        1.0,
        0.0,
        1.0,
    ];

    let a_rows: [&[f64]; 13] = [
        &[],
        &[2.0 / 27.0],
        &[1.0 / 36.0, 1.0 / 12.0],
        &[1.0 / 24.0, 0.0, 1.0 / 8.0],
        &[5.0 / 12.0, 0.0, -25.0 / 16.0, 25.0 / 16.0],
        &[1.0 / 20.0, 0.0, 0.0, 1.0 / 4.0, 1.0 / 5.0],
        &[-25.0 / 108.0, 0.0, 0.0, 125.0 / 108.0, -65.0 / 27.0, 125.0 / 54.0],
        &[31.0 / 300.0, 0.0, 0.0, 0.0, 61.0 / 225.0, -2.0 / 9.0, 13.0 / 900.0],
        &[2.0, 0.0, 0.0, -53.0 / 6.0, 704.0 / 45.0, -107.0 / 9.0, 67.0 / 90.0, 3.0],
        &[
            -91.0 / 108.0,
            0.0,
            0.0,
            23.0 / 108.0,
            -976.0 / 135.0,
            311.0 / 54.0,
            -19.0 / 60.0,
            17.0 / 6.0,
            -1.0 / 12.0,
        ],
        &[
            2383.0 / 4100.0,
            0.0,
            0.0,
            -341.0 / 164.0,
            4496.0 / 1025.0,
            -301.0 / 82.0,
            2133.0 / 4100.0,
            45.0 / 82.0,
            45.0 / 164.0,
            18.0 / 41.0,
        ],
        &[
            3.0 / 205.0,
            0.0,
            0.0,
            0.0,
            0.0,
            -6.0 / 41.0,
            -3.0 / 205.0,
            -3.0 / 41.0,
            3.0 / 41.0,
            6.0 / 41.0,
            0.0,
        ],
        &[
            -1777.0 / 4100.0,
            0.0,
            0.0,
            -341.0 / 164.0,
            4496.0 / 1025.0,
            -289.0 / 82.0,
            2193.0 / 4100.0,
            51.0 / 82.0,
            33.0 / 164.0,
            12.0 / 41.0,
            0.0,
            1.0,
        ],
    ];

    // 8th-order stepping weights; zero entries (stages 2-5, 12, 13) omitted
    // implicitly. Error vector is the classical Fehlberg simplification
    // `41/840 * (k1 + k11 - k12 - k13)`.
    const B8: [f64; 13] = [
        41.0 / 840.0,
        0.0,
        0.0,
        0.0,
        0.0,
        34.0 / 105.0,
        9.0 / 35.0,
        9.0 / 35.0,
        9.0 / 280.0,
        9.0 / 280.0,
        41.0 / 840.0,
        0.0,
        0.0,
    ];

    let mut k: Vec<DVector<f64>> = Vec::with_capacity(13);
    k.push(rhs(t, y)?);
    for stage in 1..13 {
        let mut y_stage = y.clone();
        for (j, a_ij) in a_rows[stage].iter().enumerate() {
            if *a_ij != 0.0 {
                y_stage += h * *a_ij * &k[j];
            }
        }
        k.push(rhs(t + C[stage] * h, &y_stage)?);
    }

    let mut y1 = y.clone();
    for (i, b_i) in B8.iter().enumerate() {
        if *b_i != 0.0 {
            y1 += h * *b_i * &k[i];
        }
    }

    let error = (41.0 / 840.0) * h * (&k[0] + &k[10] - &k[11] - &k[12]);
    Ok((k[0].clone(), y1, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_body_rhs(gm: f64) -> impl Fn(f64, &DVector<f64>) -> Result<DVector<f64>, AstrodyneError> {
        move |_t, y| {
            let r = nalgebra::Vector3::new(y[0], y[1], y[2]);
            let v = nalgebra::Vector3::new(y[3], y[4], y[5]);
            let rmag = r.norm();
            let a = (-gm / rmag.powi(3)) * r;
            Ok(DVector::from_vec(vec![v.x, v.y, v.z, a.x, a.y, a.z]))
        }
    }

    #[test]
    fn zero_derivative_is_identity_propagation() {
        let mut integrator = NumericalIntegrator::new(Stepper::default());
        let y0 = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let rhs = |_t: f64, _y: &DVector<f64>| Ok(DVector::from_vec(vec![0.0, 0.0, 0.0]));
        let y1 = integrator.integrate_to_instant(&y0, 0.0, 100.0, &rhs).unwrap();
        assert_relative_eq!(y1, y0, epsilon = 1e-12);
    }

    #[test]
    fn two_body_conserves_specific_energy() {
        let gm = 3.986_004_415e14;
        let y0 = DVector::from_vec(vec![7_000_000.0, 0.0, 0.0, 0.0, 7_546.053_290, 0.0]);
        let energy0 = {
            let v2 = y0[3] * y0[3] + y0[4] * y0[4] + y0[5] * y0[5];
            let r = (y0[0] * y0[0] + y0[1] * y0[1] + y0[2] * y0[2]).sqrt();
            0.5 * v2 - gm / r
        };
        let mut integrator = NumericalIntegrator::new(Stepper::default());
        let rhs = two_body_rhs(gm);
        let y1 = integrator.integrate_to_instant(&y0, 0.0, 600.0, &rhs).unwrap();
        let energy1 = {
            let v2 = y1[3] * y1[3] + y1[4] * y1[4] + y1[5] * y1[5];
            let r = (y1[0] * y1[0] + y1[1] * y1[1] + y1[2] * y1[2]).sqrt();
            0.5 * v2 - gm / r
        };
        assert_relative_eq!(energy1, energy0, epsilon = 1e-6);
    }

    #[test]
    fn rk4_fixed_step_matches_s1_velocity_direction() {
        let gm = 3.986_004_415e14;
        let y0 = DVector::from_vec(vec![7_000_000.0, 0.0, 0.0, 0.0, 7_546.053_290, 0.0]);
        let mut integrator = NumericalIntegrator::new(Stepper::Rk4Fixed { step_s: 1.0 });
        let rhs = two_body_rhs(gm);
        let y1 = integrator.integrate_to_instant(&y0, 0.0, 1.0, &rhs).unwrap();
        assert!(y1[0] < y0[0], "radial component should decrease under gravity");
        assert_relative_eq!(y1[4], y0[4], epsilon = 1.0);
    }

    #[test]
    fn step_size_underflows_when_dynamics_demand_impossible_precision() {
        let mut integrator = NumericalIntegrator::new(Stepper::Rkf78(IntegratorOpts {
            rel_tol: 1e-300,
            abs_tol: 1e-300,
            init_step_s: 5.0,
            min_step_s: 1e-9,
            max_step_s: 5.0,
        }));
        let y0 = DVector::from_vec(vec![1.0]);
        let rhs = |t: f64, _y: &DVector<f64>| Ok(DVector::from_vec(vec![(t * 1e6).sin() * 1e6]));
        let err = integrator.integrate_to_instant(&y0, 0.0, 10.0, &rhs).unwrap_err();
        assert!(matches!(err, AstrodyneError::StepSizeUnderflow));
    }
}
