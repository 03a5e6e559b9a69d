//! Least-squares orbit determination (C10): iterative batch Gauss-Newton
//! fit of a state (or, in the TLE specialization, a Brouwer-Lyddane mean
//! element set) to a series of reference states. Reuses the propagator
//! (C6) as the forward model and the finite-difference component (C9) for
//! the fit Jacobian, per §4.10's data-flow description ("LSQ-OD... wraps
//! the propagator in a residual function").
//!
//! Grounded on the teacher's `od/` Kalman-filter machinery in spirit only
//! (that module wasn't present in the retrieved teacher slice — only
//! `tests/orbit_determination/two_body.rs` references it) and on §4.10's
//! algorithm description directly; the normal-equation solve uses
//! `nalgebra::DMatrix` the way the teacher uses `nalgebra` throughout.

use std::collections::HashMap;
use std::sync::Arc;

use hifitime::Epoch;
use nalgebra::{DMatrix, DVector, Vector3};

use crate::blm::BrouwerLyddaneMean;
use crate::coord::{CoordinateBroker, State};
use crate::errors::AstrodyneError;
use crate::jacobian::{stack_columns, state_jacobian, FiniteDifferenceOpts};
use crate::propagators::Propagator;

/// Per-subset 1-sigma values, keyed by `CoordinateSubset::name()`. Missing
/// entries mean "uninformative" (zero prior precision for the guess, unit
/// weight for references) — §4.10 "optional per-subset sigmas".
pub type SigmaMap = HashMap<&'static str, Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimationOpts {
    pub rms_update_threshold: f64,
    pub max_iterations: usize,
    pub finite_difference: FiniteDifferenceOpts,
}

impl Default for EstimationOpts {
    fn default() -> Self {
        Self {
            rms_update_threshold: 1e-3,
            max_iterations: 20,
            finite_difference: FiniteDifferenceOpts::default(),
        }
    }
}

/// One Gauss-Newton iteration's RMS, for the per-step log (§4.10 Outputs).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationLog {
    pub iteration: usize,
    pub rms: f64,
}

/// The converged (or best-effort) result of a least-squares fit (§4.10
/// Outputs). Generic over the estimated quantity: a `State` for the
/// Cartesian fit, a `BrouwerLyddaneMean` for the TLE specialization.
#[derive(Debug, Clone)]
pub struct Analysis<T> {
    pub estimate: T,
    pub rms: f64,
    pub iterations: usize,
    pub termination_reason: String,
    pub covariance: DMatrix<f64>,
    /// Sandwich/robust covariance variant computed from the same
    /// Jacobian and weight matrix but without assuming the weight matrix
    /// is the true inverse-noise covariance (the "Frisbee" variant named
    /// in §4.10's outputs; the teacher's retrieved slice and
    /// `original_source`'s available files name it without specifying the
    /// formula, so this is a documented scoping decision — see
    /// DESIGN.md).
    pub frisbee_covariance: DMatrix<f64>,
    pub log: Vec<IterationLog>,
}

/// A forward model mapping a free-parameter vector to a predicted
/// observable at an instant, in the same basis the residual is weighted
/// in (§4.10 step 1-2).
trait ForwardModel {
    fn output_dim(&self) -> usize;
    fn predict(&self, x: &DVector<f64>, at: Epoch) -> Result<DVector<f64>, AstrodyneError>;
}

/// Runs the shared Gauss-Newton loop (§4.10 steps 1-5) against any
/// `ForwardModel`. `reference_at(instant_index)` returns the observation
/// vector to match `model.predict` against, in the same basis.
#[allow(clippy::too_many_arguments)]
fn gauss_newton<M: ForwardModel>(
    model: &M,
    x_guess: &DVector<f64>,
    instants: &[Epoch],
    references: &[DVector<f64>],
    ref_weight_diag: &DVector<f64>,
    guess_precision_diag: &DVector<f64>,
    opts: &EstimationOpts,
) -> Result<(DVector<f64>, f64, usize, String, DMatrix<f64>, DMatrix<f64>, Vec<IterationLog>), AstrodyneError> {
    let n = x_guess.len();
    let m = model.output_dim();
    let num_instants = instants.len();

    let p0_inv = DMatrix::from_diagonal(guess_precision_diag);
    let w_diag_full: Vec<f64> = (0..num_instants).flat_map(|_| ref_weight_diag.iter().copied()).collect();

    let w_full = DMatrix::from_diagonal(&DVector::from_vec(w_diag_full.clone()));

    // Central-difference Jacobian of delta'(x) = predict(x) - reference
    // w.r.t. x, stacked over instants (§4.10 step 3), via the shared C9
    // finite-difference component: `predict_matrix` packs one column per
    // instant (rows = coordinates) the way `state_jacobian`'s `g` expects,
    // and `state_jacobian` returns `state_dim x (m*num_instants)` with
    // column `i*m + row` holding `d predict_row(instant_i) / d x`; od's own
    // normal equations want the transpose (`(m*num_instants) x state_dim`).
    // The reference subtraction in delta' is constant in `x`, so its
    // derivative equals `predict`'s directly. Shared by the update step
    // (evaluated at each iterate) and by the final covariance (evaluated
    // once more at the converged/best iterate).
    let predict_matrix = |x: &DVector<f64>| -> Result<DMatrix<f64>, AstrodyneError> {
        let mut cols = Vec::with_capacity(num_instants);
        for t in instants {
            cols.push(model.predict(x, *t)?);
        }
        Ok(stack_columns(&cols))
    };
    let jacobian_at = |x: &DVector<f64>| -> Result<DMatrix<f64>, AstrodyneError> {
        Ok(state_jacobian(x, &predict_matrix, opts.finite_difference)?.transpose())
    };

    let mut x_current = x_guess.clone();
    let mut best_x = x_guess.clone();
    let mut best_rms = f64::INFINITY;
    let mut prev_rms: Option<f64> = None;
    let mut log = Vec::with_capacity(opts.max_iterations);
    let mut termination = "Max Iterations".to_string();

    for iteration in 0..opts.max_iterations {
        // delta'(x) = predicted(x) in the residual basis, minus the
        // reference (§4.10 step 2, flipped so its derivative equals the
        // Jacobian the spec's normal equations expect — see module docs).
        let mut delta_prime = Vec::with_capacity(num_instants);
        for (t, reference) in instants.iter().zip(references.iter()) {
            let predicted = model.predict(&x_current, *t)?;
            delta_prime.push(predicted - reference);
        }

        let wr2: f64 = delta_prime
            .iter()
            .flat_map(|d| d.iter().copied())
            .zip(w_diag_full.iter())
            .map(|(d, w)| w * d * d)
            .sum();
        let rms = (wr2 / (m * num_instants).max(1) as f64).sqrt();
        log.push(IterationLog { iteration, rms });

        if rms < best_rms {
            best_rms = rms;
            best_x = x_current.clone();
        }

        if let Some(prev) = prev_rms {
            if rms > prev {
                termination = "Divergence".to_string();
                break;
            }
            if (rms - prev).abs() < opts.rms_update_threshold {
                termination = "RMS Update Threshold".to_string();
                best_x = x_current.clone();
                best_rms = rms;
                break;
            }
        }
        prev_rms = Some(rms);

        let jac = jacobian_at(&x_current)?;
        let residual_flat = DVector::from_iterator(m * num_instants, delta_prime.iter().flat_map(|d| d.iter().copied()).map(|v| -v));

        let jt_w = jac.transpose() * &w_full;
        let normal_matrix = &jt_w * &jac + &p0_inv;
        let rhs = &jt_w * &residual_flat + &p0_inv * (x_guess - &x_current);

        let delta_x = normal_matrix
            .clone()
            .try_inverse()
            .ok_or(AstrodyneError::SingularNormalEquations)?
            * rhs;
        x_current += delta_x;
    }

    // Posterior covariance at the best iterate, re-evaluating the Jacobian
    // there rather than reusing a stale one from mid-iteration (§4.10 Outputs).
    let final_jacobian = jacobian_at(&best_x)?;
    let jt_w = final_jacobian.transpose() * &w_full;
    let normal_matrix = &jt_w * &final_jacobian + &p0_inv;
    let covariance = normal_matrix.clone().try_inverse().unwrap_or_else(|| DMatrix::zeros(n, n));
    let sandwich = &jt_w * final_jacobian.clone();
    let frisbee_covariance = &covariance * sandwich * &covariance;

    Ok((best_x, best_rms, log.len(), termination, covariance, frisbee_covariance, log))
}

fn sigma_precision(sigma: Option<&[f64]>, len: usize) -> Vec<f64> {
    match sigma {
        Some(s) => s.iter().map(|v| if *v > 0.0 { 1.0 / (v * v) } else { 0.0 }).collect(),
        None => vec![0.0; len],
    }
}

fn sigma_weight(sigma: Option<&[f64]>, len: usize) -> Vec<f64> {
    match sigma {
        Some(s) => s.iter().map(|v| if *v > 0.0 { 1.0 / (v * v) } else { 1.0 }).collect(),
        None => vec![1.0; len],
    }
}

/// A subset's raw coordinate width. The fit operates on raw coordinate
/// differencing rather than each subset's own (possibly
/// dimension-reducing) `subtract` — a scoping simplification recorded in
/// DESIGN.md: it keeps every estimated subset's free-offset range and
/// finite-difference Jacobian column count in lockstep with the broker's
/// own layout, at the cost of not special-casing the attitude quaternion's
/// 3-DOF small-angle subtraction.
fn subtract_dim(broker: &CoordinateBroker, name: &str) -> usize {
    broker.subset_by_name(name).map(|s| s.size()).unwrap_or(0)
}

struct CartesianModel<'a> {
    propagator: &'a Propagator,
    broker: Arc<CoordinateBroker>,
    frame: crate::frames::Frame,
    epoch0: Epoch,
    template: DVector<f64>,
    free_offsets: Vec<usize>,
}

impl<'a> ForwardModel for CartesianModel<'a> {
    fn output_dim(&self) -> usize {
        self.free_offsets.len()
    }

    fn predict(&self, x: &DVector<f64>, at: Epoch) -> Result<DVector<f64>, AstrodyneError> {
        let mut full = self.template.clone();
        for (k, &off) in self.free_offsets.iter().enumerate() {
            full[off] = x[k];
        }
        let state0 = State::new(self.epoch0, self.frame.clone(), full, self.broker.clone())?;
        let predicted = self.propagator.calculate_state_at(&state0, at)?;
        Ok(DVector::from_iterator(
            self.free_offsets.len(),
            self.free_offsets.iter().map(|&off| predicted.coordinates[off]),
        ))
    }
}

/// Builds the flattened list of absolute coordinate offsets (and their
/// subtract-basis sigma vectors) for the subset names an estimation run is
/// restricted to (`None` = every subset in the broker).
fn free_offsets_and_sigmas(
    broker: &CoordinateBroker,
    estimation_subsets: Option<&[&'static str]>,
    sigmas: Option<&SigmaMap>,
    default_fn: fn(Option<&[f64]>, usize) -> Vec<f64>,
) -> Result<(Vec<usize>, Vec<f64>), AstrodyneError> {
    let names: Vec<&'static str> = match estimation_subsets {
        Some(names) => names.to_vec(),
        None => broker.subsets().iter().map(|s| s.name()).collect(),
    };
    let mut offsets = Vec::new();
    let mut weights = Vec::new();
    for name in names {
        let offset = broker.offset_of(name).ok_or_else(|| AstrodyneError::MissingSubset(name.to_string()))?;
        let size = subtract_dim(broker, name);
        offsets.extend(offset..offset + size);
        let sigma = sigmas.and_then(|m| m.get(name)).map(|v| v.as_slice());
        weights.extend(default_fn(sigma, size));
    }
    Ok((offsets, weights))
}

/// `estimate(guess, references, estimationSubsets?, guessSigmas?,
/// refSigmas?) -> Analysis` (§6.2, §4.10): Gauss-Newton fit of a Cartesian
/// (or any broker-typed) state to a series of reference states at their
/// own instants, propagated with `propagator`.
pub fn estimate(
    guess: &State,
    references: &[State],
    propagator: &Propagator,
    estimation_subsets: Option<&[&'static str]>,
    guess_sigmas: Option<&SigmaMap>,
    ref_sigmas: Option<&SigmaMap>,
    opts: &EstimationOpts,
) -> Result<Analysis<State>, AstrodyneError> {
    if references.is_empty() {
        return Err(AstrodyneError::UndefinedInput("least-squares OD requires at least one reference state".to_string()));
    }
    for r in references {
        if r.broker != guess.broker {
            return Err(AstrodyneError::FrameStructureMismatch);
        }
    }

    let (free_offsets, guess_sigma_flat) =
        free_offsets_and_sigmas(&guess.broker, estimation_subsets, guess_sigmas, sigma_precision)?;
    let (_, ref_weight_flat) = free_offsets_and_sigmas(&guess.broker, estimation_subsets, ref_sigmas, sigma_weight)?;

    let model = CartesianModel {
        propagator,
        broker: guess.broker.clone(),
        frame: guess.frame.clone(),
        epoch0: guess.epoch,
        template: guess.coordinates.clone(),
        free_offsets: free_offsets.clone(),
    };

    let instants: Vec<Epoch> = references.iter().map(|r| r.epoch).collect();
    let reference_vectors: Vec<DVector<f64>> = references
        .iter()
        .map(|r| DVector::from_iterator(free_offsets.len(), free_offsets.iter().map(|&off| r.coordinates[off])))
        .collect();

    let x_guess = DVector::from_iterator(free_offsets.len(), free_offsets.iter().map(|&off| guess.coordinates[off]));
    let guess_precision = DVector::from_vec(guess_sigma_flat);
    let ref_weight = DVector::from_vec(ref_weight_flat);

    let (x_final, rms, iterations, termination_reason, covariance, frisbee_covariance, log) =
        gauss_newton(&model, &x_guess, &instants, &reference_vectors, &ref_weight, &guess_precision, opts)?;

    let mut final_coords = guess.coordinates.clone();
    for (k, &off) in free_offsets.iter().enumerate() {
        final_coords[off] = x_final[k];
    }
    let estimate = State::new(guess.epoch, guess.frame.clone(), final_coords, guess.broker.clone())?;

    Ok(Analysis { estimate, rms, iterations, termination_reason, covariance, frisbee_covariance, log })
}

/// Cartesian position+velocity forward model for the TLE specialization's
/// BLM mean-element estimation vector `[a, e, i, raan, aop, ma, bstar]`
/// (§4.10 "TLE specialization"). `bstar` does not currently feed the
/// secular forward model (see `blm.rs` module docs) — it is carried as an
/// estimated parameter so its column of the Jacobian is well-defined (all
/// zero), matching how an unobservable-but-estimated parameter behaves in
/// a batch solve.
struct TleModel {
    gm: f64,
    j2: f64,
    req: f64,
    epoch0: Epoch,
}

fn blm_of(x: &DVector<f64>) -> BrouwerLyddaneMean {
    BrouwerLyddaneMean {
        a: x[0],
        e: x[1],
        i: x[2],
        raan: x[3],
        aop: x[4],
        ma: x[5],
        bstar: x[6],
    }
}

impl ForwardModel for TleModel {
    fn output_dim(&self) -> usize {
        6
    }

    fn predict(&self, x: &DVector<f64>, at: Epoch) -> Result<DVector<f64>, AstrodyneError> {
        let mean = blm_of(x);
        let (r, v) = mean.cartesian_at(self.epoch0, at, self.gm, self.j2, self.req)?;
        Ok(DVector::from_vec(vec![r.x, r.y, r.z, v.x, v.y, v.z]))
    }
}

/// TLE-specialized `estimate` (§4.10): fits the six BLM mean elements plus
/// `bstar` to Cartesian reference states, using the secular-J2
/// mean-element propagator (`blm.rs`) as the forward model in place of
/// SGP4 (§1 scopes SGP4's exact internal algorithm out).
pub fn estimate_tle(
    guess: &BrouwerLyddaneMean,
    epoch0: Epoch,
    references: &[(Epoch, Vector3<f64>, Vector3<f64>)],
    gm: f64,
    j2: f64,
    req: f64,
    ref_sigma_m: Option<[f64; 6]>,
    opts: &EstimationOpts,
) -> Result<Analysis<BrouwerLyddaneMean>, AstrodyneError> {
    if references.is_empty() {
        return Err(AstrodyneError::UndefinedInput("TLE least-squares OD requires at least one reference state".to_string()));
    }

    let model = TleModel { gm, j2, req, epoch0 };
    let instants: Vec<Epoch> = references.iter().map(|(t, _, _)| *t).collect();
    let reference_vectors: Vec<DVector<f64>> = references
        .iter()
        .map(|(_, r, v)| DVector::from_vec(vec![r.x, r.y, r.z, v.x, v.y, v.z]))
        .collect();

    let x_guess = DVector::from_vec(vec![guess.a, guess.e, guess.i, guess.raan, guess.aop, guess.ma, guess.bstar]);
    let ref_weight = DVector::from_vec(sigma_weight(ref_sigma_m.as_ref().map(|s| s.as_slice()), 6));
    let guess_precision = DVector::from_vec(vec![0.0; 7]);

    let (x_final, rms, iterations, termination_reason, covariance, frisbee_covariance, log) =
        gauss_newton(&model, &x_guess, &instants, &reference_vectors, &ref_weight, &guess_precision, opts)?;

    let estimate = blm_of(&x_final);
    // Validate the converged element set lands in the physically valid
    // range (§7 "physical out-of-range"); surfaces as an error rather than
    // silently returning a nonsensical orbit.
    if !(0.0..0.99).contains(&estimate.e) {
        return Err(AstrodyneError::InvalidEccentricity(estimate.e));
    }
    if !(0.0..std::f64::consts::PI).contains(&estimate.i) {
        return Err(AstrodyneError::InvalidInclination(estimate.i));
    }

    Ok(Analysis { estimate, rms, iterations, termination_reason, covariance, frisbee_covariance, log })
}
