//! Interpolation primitives named but not specified in detail by §6.1. Only
//! what the integrator's dense output needs is implemented here: a cubic
//! Hermite "free interpolant" built from the state and derivative at the
//! two ends of the last accepted step, and a plain linear fallback.
//!
//! A full barycentric-rational/cubic-spline interpolator factory is
//! explicitly named as an external collaborator in §6.1 and is not
//! reimplemented here beyond this local need.

use nalgebra::DVector;

/// Cubic Hermite interpolation of a vector-valued function between two
/// samples `(t0, y0, dy0)` and `(t1, y1, dy1)`, evaluated at `t`.
pub fn hermite_interpolate(
    t0: f64,
    y0: &DVector<f64>,
    dy0: &DVector<f64>,
    t1: f64,
    y1: &DVector<f64>,
    dy1: &DVector<f64>,
    t: f64,
) -> DVector<f64> {
    let h = t1 - t0;
    if h.abs() < f64::EPSILON {
        return y0.clone();
    }
    let s = (t - t0) / h;
    let s2 = s * s;
    let s3 = s2 * s;

    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;

    h00 * y0 + h10 * (h * dy0) + h01 * y1 + h11 * (h * dy1)
}

/// Piecewise-linear interpolation between two samples.
pub fn linear_interpolate(t0: f64, y0: &DVector<f64>, t1: f64, y1: &DVector<f64>, t: f64) -> DVector<f64> {
    let h = t1 - t0;
    if h.abs() < f64::EPSILON {
        return y0.clone();
    }
    let s = (t - t0) / h;
    (1.0 - s) * y0 + s * y1
}
