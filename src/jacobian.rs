//! Finite-difference Jacobian (C9): numerical partials of state
//! trajectories with respect to the initial state or evaluation instant.
//! Not a teacher component directly — grounded on the spec's §4.9 contract
//! and on the teacher's `DVector`/`DMatrix` usage throughout
//! `propagators/mod.rs`, generalized to operate over whatever caller
//! function `g` wraps a propagation.

use hifitime::{Duration, Epoch, Unit};
use nalgebra::{DMatrix, DVector};

use crate::errors::AstrodyneError;

/// Step-size fraction applied per coordinate: `step_fraction * |x_i|`, or
/// `step_fraction` itself when `x_i` is zero (§4.9).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiniteDifferenceOpts {
    pub step_fraction: f64,
}

impl Default for FiniteDifferenceOpts {
    fn default() -> Self {
        Self { step_fraction: 1e-6 }
    }
}

impl FiniteDifferenceOpts {
    pub(crate) fn step_for(&self, x_i: f64) -> f64 {
        if x_i.abs() < f64::EPSILON {
            self.step_fraction
        } else {
            self.step_fraction * x_i.abs()
        }
    }
}

/// `g(state) -> matrix`: columns are the requested instants, rows are
/// coordinates of whatever vector `g` chooses to return per instant
/// (usually a propagated state's coordinates). The caller's `g` must be
/// pure and deterministic in `state` (§4.9 contract).
pub type TrajectoryFn<'a> = dyn Fn(&DVector<f64>) -> Result<DMatrix<f64>, AstrodyneError> + 'a;

/// Central-difference Jacobian `d g / d state` for a state-dimensioned
/// input, evaluated at `x0`. Result shape is `(stateDim) x (stateDim *
/// numInstants)`, laid out column-major by instant then coordinate (each
/// column block of `g`'s own column count corresponds to one input
/// coordinate's perturbation) — i.e. row `i` of the output holds
/// `d g_flat / d x_i`.
pub fn state_jacobian(
    x0: &DVector<f64>,
    g: &TrajectoryFn,
    opts: FiniteDifferenceOpts,
) -> Result<DMatrix<f64>, AstrodyneError> {
    let n = x0.len();
    let g0 = g(x0)?;
    let num_cols = g0.nrows() * g0.ncols();
    let mut jac = DMatrix::zeros(n, num_cols);

    for i in 0..n {
        let h = opts.step_for(x0[i]);

        let mut x_plus = x0.clone();
        x_plus[i] += h;
        let g_plus = g(&x_plus)?;

        let mut x_minus = x0.clone();
        x_minus[i] -= h;
        let g_minus = g(&x_minus)?;

        let diff = (g_plus - g_minus) / (2.0 * h);
        for (col, v) in diff.iter().enumerate() {
            jac[(i, col)] = *v;
        }
    }
    Ok(jac)
}

/// As `state_jacobian`, but perturbs the evaluation instant instead of the
/// state (§4.9 "time-derivative variant"). `g` here closes over a fixed
/// state and takes the perturbed instant offset (seconds) as its input.
pub type TimeTrajectoryFn<'a> = dyn Fn(f64) -> Result<DVector<f64>, AstrodyneError> + 'a;

pub fn time_jacobian(
    t0_offset_s: f64,
    perturbation: Duration,
    g: &TimeTrajectoryFn,
) -> Result<DVector<f64>, AstrodyneError> {
    let h = perturbation.to_seconds();
    if h.abs() < f64::EPSILON {
        return Err(AstrodyneError::UndefinedInput("time perturbation must be nonzero".to_string()));
    }
    let g_plus = g(t0_offset_s + h)?;
    let g_minus = g(t0_offset_s - h)?;
    Ok((g_plus - g_minus) / (2.0 * h))
}

/// Convenience: builds a `TrajectoryFn` from a propagation closure that
/// maps a state vector to a set of instants' coordinate vectors, stacking
/// each instant's coordinates into one matrix column.
pub fn stack_columns(vectors: &[DVector<f64>]) -> DMatrix<f64> {
    if vectors.is_empty() {
        return DMatrix::zeros(0, 0);
    }
    let rows = vectors[0].len();
    let mut m = DMatrix::zeros(rows, vectors.len());
    for (col, v) in vectors.iter().enumerate() {
        m.set_column(col, v);
    }
    m
}

/// Default reference epoch offset helper: seconds from `base` to `at`.
pub fn seconds_from(base: Epoch, at: Epoch) -> f64 {
    (at - base).to_seconds()
}

pub fn duration_seconds(seconds: f64) -> Duration {
    seconds * Unit::Second
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linear_map_jacobian_matches_matrix() {
        // g(x) = A x, laid out as a single-column matrix per evaluation.
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 3.0]);
        let g = |x: &DVector<f64>| -> Result<DMatrix<f64>, AstrodyneError> {
            let y = &a * x;
            Ok(DMatrix::from_column_slice(2, 1, y.as_slice()))
        };
        let x0 = DVector::from_vec(vec![1.0, 1.0]);
        let jac = state_jacobian(&x0, &g, FiniteDifferenceOpts::default()).unwrap();
        // jac is stateDim x (outputDim*numInstants) = 2x2; jac[i, j] = dG_j/dx_i
        assert_relative_eq!(jac[(0, 0)], 2.0, epsilon = 1e-5);
        assert_relative_eq!(jac[(1, 1)], 3.0, epsilon = 1e-5);
        assert_relative_eq!(jac[(0, 1)], 0.0, epsilon = 1e-5);
        assert_relative_eq!(jac[(1, 0)], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn zero_step_falls_back_to_plain_fraction() {
        let opts = FiniteDifferenceOpts::default();
        assert_relative_eq!(opts.step_for(0.0), opts.step_fraction, epsilon = 1e-15);
    }

    #[test]
    fn time_jacobian_matches_derivative_of_quadratic() {
        // g(t) = [t^2], d/dt = 2t, at t=3 -> 6
        let g = |t: f64| -> Result<DVector<f64>, AstrodyneError> { Ok(DVector::from_vec(vec![t * t])) };
        let d = time_jacobian(3.0, duration_seconds(1e-3), &g).unwrap();
        assert_relative_eq!(d[0], 6.0, epsilon = 1e-3);
    }
}
