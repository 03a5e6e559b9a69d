//! Access/visibility scanning (C11): partitions a search interval on a
//! uniform time grid, evaluates a visibility predicate at each sample, and
//! collapses contiguous `true` runs into access intervals whose
//! closest-approach instant is refined with a parabolic fit through the
//! three samples around the sampled minimum (§4.11, §11 "Target scan
//! refinement" — shares `rootfind::refine_extremum` with the periapsis/
//! apoapsis event conditions in `event.rs`).
//!
//! Two visibility predicates are modeled, matching §4.11's "AER range/
//! elevation window, masked elevation profile, or line-of-sight check
//! against environment geometry": a ground-station AER (azimuth/
//! elevation/range) window against an elevation mask, and a straight-line
//! visibility test against a single occluding body (the central body of
//! the environment, in the common Earth-limb case).

use std::f64::consts::TAU;
use std::sync::Arc;

use hifitime::{Epoch, Unit};
use nalgebra::Vector3;

use crate::errors::AstrodyneError;
use crate::frames::{transform_position_velocity, CelestialBody};
use crate::rootfind::refine_extremum;

/// One contact: the interval a visibility predicate held `true`, its
/// closest-approach instant/range, and whether either endpoint coincides
/// with the scan boundary rather than a genuine predicate crossing (§11
/// "Partial-access boundary flagging").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccessInterval {
    pub start: Epoch,
    pub end: Epoch,
    pub closest_approach: Epoch,
    pub closest_range_m: f64,
    pub partial: bool,
}

/// A ground-relative elevation floor a target must clear to be visible:
/// either a single constant, or a profile of `(azimuth_rad, min_elevation_rad)`
/// control points (sorted ascending in azimuth, piecewise-linearly
/// interpolated and wrapped across the 0/2*pi seam) for horizon-masked
/// sites (§4.11 "masked elevation profile").
#[derive(Debug, Clone)]
pub enum ElevationMask {
    Constant(f64),
    Profile(Vec<(f64, f64)>),
}

impl ElevationMask {
    fn min_elevation_at(&self, azimuth_rad: f64) -> f64 {
        match self {
            ElevationMask::Constant(e) => *e,
            ElevationMask::Profile(points) => {
                if points.is_empty() {
                    return 0.0;
                }
                let az = ((azimuth_rad % TAU) + TAU) % TAU;
                let n = points.len();
                for w in 0..n {
                    let (az0, el0) = points[w];
                    let (az1, el1) = points[(w + 1) % n];
                    let span = if az1 > az0 { az1 - az0 } else { az1 + TAU - az0 };
                    let offset = if az >= az0 { az - az0 } else { az + TAU - az0 };
                    if offset <= span || w == n - 1 {
                        if span.abs() < f64::EPSILON {
                            return el0;
                        }
                        let frac = (offset / span).clamp(0.0, 1.0);
                        return el0 + frac * (el1 - el0);
                    }
                }
                points[0].1
            }
        }
    }
}

/// Geodetic-to-ECEF position on a spherical body (§1 scopes ellipsoid
/// geodesy out — the crate's bodies carry only an equatorial radius).
fn geodetic_to_ecef(latitude_rad: f64, longitude_rad: f64, altitude_m: f64, radius_m: f64) -> Vector3<f64> {
    let r = radius_m + altitude_m;
    Vector3::new(
        r * latitude_rad.cos() * longitude_rad.cos(),
        r * latitude_rad.cos() * longitude_rad.sin(),
        r * latitude_rad.sin(),
    )
}

/// East/North/Up unit vectors at a geodetic location, expressed in the
/// body-fixed frame.
fn enu_basis(latitude_rad: f64, longitude_rad: f64) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
    let (sin_lat, cos_lat) = (latitude_rad.sin(), latitude_rad.cos());
    let (sin_lon, cos_lon) = (longitude_rad.sin(), longitude_rad.cos());
    let east = Vector3::new(-sin_lon, cos_lon, 0.0);
    let north = Vector3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
    let up = Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
    (east, north, up)
}

/// A fixed ground site on a rotating body (§4.11's AER-visibility
/// scenario, S6). Carries no state of its own — every query reframes
/// through the body's frame pair at the requested instant.
#[derive(Debug, Clone)]
pub struct GroundStation {
    pub name: String,
    pub latitude_rad: f64,
    pub longitude_rad: f64,
    pub altitude_m: f64,
    pub body: Arc<CelestialBody>,
}

impl GroundStation {
    pub fn new(name: impl Into<String>, latitude_rad: f64, longitude_rad: f64, altitude_m: f64, body: Arc<CelestialBody>) -> Self {
        Self { name: name.into(), latitude_rad, longitude_rad, altitude_m, body }
    }

    /// `(position, east, north, up)`, all in the body's inertial frame at
    /// `epoch`. The basis vectors are rotated through the same position
    /// transform used for absolute coordinates — a direction carries
    /// through a pure-rotation transform identically to a position, since
    /// both frames share an origin at the body's center.
    fn position_and_enu(&self, epoch: Epoch) -> Result<(Vector3<f64>, Vector3<f64>, Vector3<f64>, Vector3<f64>), AstrodyneError> {
        let body_fixed = self
            .body
            .body_fixed_frame
            .clone()
            .ok_or(AstrodyneError::UndefinedModel("body-fixed frame"))?;
        let inertial = self.body.inertial_frame.clone();

        let ecef = geodetic_to_ecef(self.latitude_rad, self.longitude_rad, self.altitude_m, self.body.equatorial_radius_m);
        let (east, north, up) = enu_basis(self.latitude_rad, self.longitude_rad);

        let (position, _) = transform_position_velocity(&body_fixed, &inertial, epoch, ecef, Vector3::zeros())?;
        let (east_i, _) = transform_position_velocity(&body_fixed, &inertial, epoch, east, Vector3::zeros())?;
        let (north_i, _) = transform_position_velocity(&body_fixed, &inertial, epoch, north, Vector3::zeros())?;
        let (up_i, _) = transform_position_velocity(&body_fixed, &inertial, epoch, up, Vector3::zeros())?;
        Ok((position, east_i, north_i, up_i))
    }
}

/// Azimuth/elevation/range of a target as seen from a ground station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aer {
    pub azimuth_rad: f64,
    pub elevation_rad: f64,
    pub range_m: f64,
}

/// Computes the AER of `target_position_inertial` (in the station's body's
/// inertial frame) as seen from `observer` at `epoch`.
pub fn aer(observer: &GroundStation, target_position_inertial: Vector3<f64>, epoch: Epoch) -> Result<Aer, AstrodyneError> {
    let (observer_position, east, north, up) = observer.position_and_enu(epoch)?;
    let line_of_sight = target_position_inertial - observer_position;
    let range_m = line_of_sight.norm();
    let elevation_rad = (line_of_sight.dot(&up) / range_m).asin();
    let mut azimuth_rad = line_of_sight.dot(&east).atan2(line_of_sight.dot(&north));
    if azimuth_rad < 0.0 {
        azimuth_rad += TAU;
    }
    Ok(Aer { azimuth_rad, elevation_rad, range_m })
}

/// Straight-line visibility between two positions in a shared frame,
/// occluded by a sphere of `body_radius_m` centered on the frame origin
/// (§4.11 "line-of-sight check against environment geometry"). `true`
/// when the segment's closest approach to the origin clears the body.
pub fn line_of_sight_clear(a: Vector3<f64>, b: Vector3<f64>, body_radius_m: f64) -> bool {
    let d = b - a;
    let len2 = d.norm_squared();
    if len2 < f64::EPSILON {
        return a.norm() >= body_radius_m;
    }
    let tau = (-a.dot(&d) / len2).clamp(0.0, 1.0);
    let closest = a + tau * d;
    closest.norm() >= body_radius_m
}

/// One uniform-grid sample: the instant, whether the predicate held, and
/// the range-like quantity used to rank closest approach within a run.
struct Sample {
    epoch: Epoch,
    visible: bool,
    range_m: f64,
}

fn uniform_grid(start: Epoch, end: Epoch, step_s: f64) -> Vec<Epoch> {
    if step_s <= 0.0 || end <= start {
        return vec![start, end];
    }
    let mut instants = Vec::new();
    let mut t = start;
    while t < end {
        instants.push(t);
        t += step_s * Unit::Second;
    }
    instants.push(end);
    instants
}

/// Collapses a sampled visibility series into access intervals, refining
/// each run's closest approach with a parabolic fit (§4.11, §11).
fn intervals_from_samples(samples: &[Sample]) -> Vec<AccessInterval> {
    let n = samples.len();
    let mut intervals = Vec::new();
    let mut i = 0;
    while i < n {
        if !samples[i].visible {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < n && samples[i].visible {
            i += 1;
        }
        let run_end = i - 1;

        let (min_idx, _) = samples[run_start..=run_end]
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.range_m.partial_cmp(&b.range_m).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, s)| (k + run_start, s.range_m))
            .expect("a non-empty run always has a minimum");

        let t0 = samples[run_start].epoch;
        let seconds_of = |e: Epoch| (e - t0).to_seconds();

        let closest_approach = if min_idx > 0 && min_idx < n - 1 {
            let x = [seconds_of(samples[min_idx - 1].epoch), seconds_of(samples[min_idx].epoch), seconds_of(samples[min_idx + 1].epoch)];
            let y = [samples[min_idx - 1].range_m, samples[min_idx].range_m, samples[min_idx + 1].range_m];
            t0 + refine_extremum(x, y) * Unit::Second
        } else {
            samples[min_idx].epoch
        };

        intervals.push(AccessInterval {
            start: samples[run_start].epoch,
            end: samples[run_end].epoch,
            closest_approach,
            closest_range_m: samples[min_idx].range_m,
            partial: run_start == 0 || run_end == n - 1,
        });
    }
    intervals
}

/// Scans an AER visibility window against a ground station (§4.11, S6).
/// `target_position_at` yields the target's position in the station's
/// body's inertial frame; a per-sample evaluation failure marks that
/// sample unobservable and scanning continues (§7).
#[allow(clippy::too_many_arguments)]
pub fn scan_ground_station(
    observer: &GroundStation,
    target_position_at: &dyn Fn(Epoch) -> Result<Vector3<f64>, AstrodyneError>,
    start: Epoch,
    end: Epoch,
    step_s: f64,
    mask: &ElevationMask,
    min_range_m: Option<f64>,
    max_range_m: Option<f64>,
) -> Vec<AccessInterval> {
    let samples: Vec<Sample> = uniform_grid(start, end, step_s)
        .into_iter()
        .map(|epoch| match target_position_at(epoch).and_then(|p| aer(observer, p, epoch)) {
            Ok(a) => {
                let elevation_ok = a.elevation_rad >= mask.min_elevation_at(a.azimuth_rad);
                let range_ok = min_range_m.is_none_or(|m| a.range_m >= m) && max_range_m.is_none_or(|m| a.range_m <= m);
                Sample { epoch, visible: elevation_ok && range_ok, range_m: a.range_m }
            }
            Err(_) => Sample { epoch, visible: false, range_m: f64::INFINITY },
        })
        .collect();
    intervals_from_samples(&samples)
}

/// Scans a straight-line-of-sight window between two trajectories around
/// an occluding body (§4.11's third predicate kind).
pub fn scan_line_of_sight(
    position_a_at: &dyn Fn(Epoch) -> Result<Vector3<f64>, AstrodyneError>,
    position_b_at: &dyn Fn(Epoch) -> Result<Vector3<f64>, AstrodyneError>,
    body_radius_m: f64,
    start: Epoch,
    end: Epoch,
    step_s: f64,
) -> Vec<AccessInterval> {
    let samples: Vec<Sample> = uniform_grid(start, end, step_s)
        .into_iter()
        .map(|epoch| match (position_a_at(epoch), position_b_at(epoch)) {
            (Ok(a), Ok(b)) => Sample { epoch, visible: line_of_sight_clear(a, b, body_radius_m), range_m: (b - a).norm() },
            _ => Sample { epoch, visible: false, range_m: f64::INFINITY },
        })
        .collect();
    intervals_from_samples(&samples)
}
