//! Minimal stand-ins for the external collaborators named in the
//! specification's §6.1 ("Collaborators consumed"): reference frames,
//! celestial bodies and their optional force models. These are deliberately
//! thin — full ephemerides, gravity-field evaluation and frame graphs are
//! out of scope (§1) — but they are real enough to drive the scenarios in
//! §8 end to end.

use hifitime::Epoch;
use nalgebra::{Matrix3, Vector3};
use std::fmt;
use std::sync::Arc;

use crate::errors::AstrodyneError;

/// A reference frame.
///
/// Two kinds are modeled: an inertial frame (e.g. an Earth-centered
/// inertial frame such as GCRF) and a uniformly rotating frame tied to a
/// named inertial parent (e.g. an Earth-fixed frame spinning at the
/// sidereal rate). Frame identity is by name, matching the teacher's
/// `Frame` equality checks in `dynamics/orbital.rs` (`third_body == &osc.frame`).
#[derive(Clone, Debug)]
pub enum Frame {
    Inertial {
        name: &'static str,
    },
    BodyFixed {
        name: &'static str,
        parent: &'static str,
        /// Rotation rate about +Z, rad/s.
        sidereal_rate_rad_s: f64,
        /// Rotation angle (rad, about +Z) from `parent` to this frame at `epoch0`.
        theta0_rad: f64,
        epoch0: Epoch,
    },
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Inertial { name } => name,
            Frame::BodyFixed { name, .. } => name,
        }
    }

    pub fn is_inertial(&self) -> bool {
        matches!(self, Frame::Inertial { .. })
    }

    fn theta(&self, at: Epoch) -> f64 {
        match self {
            Frame::Inertial { .. } => 0.0,
            Frame::BodyFixed {
                sidereal_rate_rad_s,
                theta0_rad,
                epoch0,
                ..
            } => theta0_rad + sidereal_rate_rad_s * (at - *epoch0).to_seconds(),
        }
    }

    /// Angular velocity of this frame with respect to its inertial parent,
    /// expressed in the parent's (inertial) axes. Zero for inertial frames.
    pub fn angular_velocity_in_parent(&self, _at: Epoch) -> Vector3<f64> {
        match self {
            Frame::Inertial { .. } => Vector3::zeros(),
            Frame::BodyFixed {
                sidereal_rate_rad_s,
                ..
            } => Vector3::new(0.0, 0.0, *sidereal_rate_rad_s),
        }
    }

    fn rotation_to_parent(&self, at: Epoch) -> Matrix3<f64> {
        // Rotation R such that v_parent = R * v_self.
        let theta = self.theta(at);
        Matrix3::new(
            theta.cos(),
            -theta.sin(),
            0.0,
            theta.sin(),
            theta.cos(),
            0.0,
            0.0,
            0.0,
            1.0,
        )
    }
}

/// Transforms a (position, velocity) pair between two frames at an instant.
///
/// Grounded on the spec's §9 design note: co-rotation must be derived from
/// the body-fixed-to-inertial transform at the current instant, not a
/// hard-coded sidereal rate. Only inertial<->body-fixed-of-that-inertial
/// and identity transforms are supported — consistent with the two
/// concrete frame kinds this crate ships.
pub fn transform_position_velocity(
    from: &Frame,
    to: &Frame,
    at: Epoch,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
) -> Result<(Vector3<f64>, Vector3<f64>), AstrodyneError> {
    if from == to {
        return Ok((position, velocity));
    }
    match (from, to) {
        (Frame::Inertial { name: pname }, Frame::BodyFixed { parent, .. }) if *pname == *parent => {
            let r = to.rotation_to_parent(at).transpose();
            let omega = to.angular_velocity_in_parent(at);
            let pos = r * position;
            let vel = r * (velocity - omega.cross(&position));
            Ok((pos, vel))
        }
        (Frame::BodyFixed { parent, .. }, Frame::Inertial { name: pname }) if *parent == *pname => {
            let r = from.rotation_to_parent(at);
            let omega = from.angular_velocity_in_parent(at);
            let pos = r * position;
            let vel = r * velocity + omega.cross(&pos);
            Ok((pos, vel))
        }
        _ => Err(AstrodyneError::FrameStructureMismatch),
    }
}

/// A point-mass (or more detailed) gravitational model: just `gm`.
pub trait GravityModel: fmt::Debug + Send + Sync {
    fn gm(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct PointMassGravity {
    pub gm: f64,
}

impl GravityModel for PointMassGravity {
    fn gm(&self) -> f64 {
        self.gm
    }
}

/// An exponential atmosphere density model, queried by altitude above the
/// body's equatorial radius.
pub trait AtmosphereModel: fmt::Debug + Send + Sync {
    /// Density in kg/m^3 at the given altitude (m) above the equatorial radius.
    fn density_at_altitude(&self, altitude_m: f64) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct ExponentialAtmosphere {
    pub reference_altitude_m: f64,
    pub reference_density_kg_m3: f64,
    pub scale_height_m: f64,
}

impl AtmosphereModel for ExponentialAtmosphere {
    fn density_at_altitude(&self, altitude_m: f64) -> f64 {
        self.reference_density_kg_m3
            * (-(altitude_m - self.reference_altitude_m) / self.scale_height_m).exp()
    }
}

/// Minimum altitude (above the equatorial radius) below which propagation
/// reports re-entry instead of evaluating drag (§4.3).
pub const MIN_PROPAGATION_ALTITUDE_M: f64 = 70_000.0;

/// A celestial body: identity, frames, and whatever models it happens to
/// expose. Grounded on the teacher's `Frame`/`Bodies`/`Cosm` trio in
/// `dynamics/orbital.rs`, collapsed into a single value since ephemeris
/// lookup is out of scope here.
#[derive(Clone)]
pub struct CelestialBody {
    pub name: String,
    pub inertial_frame: Frame,
    pub body_fixed_frame: Option<Frame>,
    pub equatorial_radius_m: f64,
    pub is_central_body: bool,
    pub gravity: Option<Arc<dyn GravityModel>>,
    pub atmosphere: Option<Arc<dyn AtmosphereModel>>,
    /// Position of this body relative to the environment's central body,
    /// expressed in the central body's inertial frame, as a function of
    /// epoch. `None` for the central body itself.
    #[allow(clippy::type_complexity)]
    pub ephemeris: Option<Arc<dyn Fn(Epoch) -> Vector3<f64> + Send + Sync>>,
}

impl fmt::Debug for CelestialBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CelestialBody")
            .field("name", &self.name)
            .field("is_central_body", &self.is_central_body)
            .finish()
    }
}

impl CelestialBody {
    pub fn gm(&self) -> Result<f64, AstrodyneError> {
        self.gravity
            .as_ref()
            .map(|g| g.gm())
            .ok_or(AstrodyneError::UndefinedModel("gravitational"))
    }

    pub fn position_at(&self, epoch: Epoch) -> Result<Vector3<f64>, AstrodyneError> {
        match &self.ephemeris {
            Some(f) => Ok(f(epoch)),
            None => Ok(Vector3::zeros()),
        }
    }
}

/// The set of bodies a propagation runs in: one central body plus any
/// number of perturbing third bodies, all sharing the central body's
/// inertial frame as the integration frame.
#[derive(Clone)]
pub struct Environment {
    pub central_body: Arc<CelestialBody>,
    pub other_bodies: Vec<Arc<CelestialBody>>,
}

impl Environment {
    pub fn new(central_body: Arc<CelestialBody>, other_bodies: Vec<Arc<CelestialBody>>) -> Self {
        Self {
            central_body,
            other_bodies,
        }
    }

    pub fn integration_frame(&self) -> Frame {
        self.central_body.inertial_frame.clone()
    }
}
