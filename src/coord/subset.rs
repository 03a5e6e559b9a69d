//! Coordinate subsets (C1): named, sized, frame-aware slices of a flat
//! state vector. Grounded on the teacher's pattern of dynamics declaring
//! read/write subsets in `dynamics/mod.rs` (`Dynamics::StateType`,
//! `AccelModel`), generalized into values rather than generic dimension
//! parameters per the spec's "dynamic dispatch over coordinate subsets"
//! design note.

use hifitime::Epoch;
use lazy_static::lazy_static;
use nalgebra::{DVector, Quaternion, UnitQuaternion, Vector3};
use std::sync::Arc;

use crate::errors::AstrodyneError;
use crate::frames::{transform_position_velocity, Frame};

use super::broker::CoordinateBroker;

/// A named, sized slice of a state or derivative vector with frame-aware
/// arithmetic. Implementors are stateless singletons (one default instance
/// per kind, per the broker invariant).
pub trait CoordinateSubset: std::fmt::Debug + Send + Sync {
    /// Globally unique name.
    fn name(&self) -> &'static str;

    /// Fixed dimension of this subset.
    fn size(&self) -> usize;

    /// Default (zero) value for this subset.
    fn default_value(&self) -> Vec<f64>;

    /// Other subset names this one must find in the broker to reframe
    /// (e.g. velocity depends on position).
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// `lhs + rhs`, both expressed in `frame`.
    fn add(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError>;

    /// `lhs - rhs`, both expressed in `frame`. The result length need not
    /// equal `size()` (attitude quaternions subtract to a 3-vector).
    fn subtract(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError>;

    /// Re-expresses `value` (this subset's own slice, in `from_frame`) in
    /// `to_frame`. `full_vector`/`broker` are provided so dependent subsets
    /// (velocity needing position, angular velocity needing attitude) can
    /// look up what they need.
    fn in_frame(
        &self,
        epoch: Epoch,
        value: &[f64],
        from_frame: &Frame,
        to_frame: &Frame,
        full_vector: &DVector<f64>,
        broker: &CoordinateBroker,
    ) -> Result<Vec<f64>, AstrodyneError>;
}

fn vec_add(lhs: &[f64], rhs: &[f64]) -> Vec<f64> {
    lhs.iter().zip(rhs.iter()).map(|(a, b)| a + b).collect()
}

fn vec_sub(lhs: &[f64], rhs: &[f64]) -> Vec<f64> {
    lhs.iter().zip(rhs.iter()).map(|(a, b)| a - b).collect()
}

fn dependency_vector3(
    broker: &CoordinateBroker,
    full_vector: &DVector<f64>,
    name: &'static str,
) -> Result<Vector3<f64>, AstrodyneError> {
    let slice = broker.extract_by_name(full_vector, name)?;
    Ok(Vector3::new(slice[0], slice[1], slice[2]))
}

fn dependency_quaternion(
    broker: &CoordinateBroker,
    full_vector: &DVector<f64>,
    name: &'static str,
) -> Result<UnitQuaternion<f64>, AstrodyneError> {
    let s = broker.extract_by_name(full_vector, name)?;
    Ok(UnitQuaternion::from_quaternion(Quaternion::new(s[0], s[1], s[2], s[3])))
}

#[derive(Debug, Default)]
pub struct CartesianPosition;

impl CoordinateSubset for CartesianPosition {
    fn name(&self) -> &'static str {
        "cartesian_position"
    }
    fn size(&self) -> usize {
        3
    }
    fn default_value(&self) -> Vec<f64> {
        vec![0.0; 3]
    }
    fn add(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
        Ok(vec_add(lhs, rhs))
    }
    fn subtract(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
        Ok(vec_sub(lhs, rhs))
    }
    fn in_frame(
        &self,
        epoch: Epoch,
        value: &[f64],
        from_frame: &Frame,
        to_frame: &Frame,
        _full_vector: &DVector<f64>,
        _broker: &CoordinateBroker,
    ) -> Result<Vec<f64>, AstrodyneError> {
        let r = Vector3::new(value[0], value[1], value[2]);
        let (r2, _) = transform_position_velocity(from_frame, to_frame, epoch, r, Vector3::zeros())?;
        Ok(vec![r2.x, r2.y, r2.z])
    }
}

#[derive(Debug, Default)]
pub struct CartesianVelocity;

impl CoordinateSubset for CartesianVelocity {
    fn name(&self) -> &'static str {
        "cartesian_velocity"
    }
    fn size(&self) -> usize {
        3
    }
    fn default_value(&self) -> Vec<f64> {
        vec![0.0; 3]
    }
    fn dependencies(&self) -> &'static [&'static str] {
        &["cartesian_position"]
    }
    fn add(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
        Ok(vec_add(lhs, rhs))
    }
    fn subtract(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
        Ok(vec_sub(lhs, rhs))
    }
    fn in_frame(
        &self,
        epoch: Epoch,
        value: &[f64],
        from_frame: &Frame,
        to_frame: &Frame,
        full_vector: &DVector<f64>,
        broker: &CoordinateBroker,
    ) -> Result<Vec<f64>, AstrodyneError> {
        let r = dependency_vector3(broker, full_vector, "cartesian_position")?;
        let v = Vector3::new(value[0], value[1], value[2]);
        let (_, v2) = transform_position_velocity(from_frame, to_frame, epoch, r, v)?;
        Ok(vec![v2.x, v2.y, v2.z])
    }
}

#[derive(Debug, Default)]
pub struct AttitudeQuaternion;

impl CoordinateSubset for AttitudeQuaternion {
    fn name(&self) -> &'static str {
        "attitude_quaternion"
    }
    fn size(&self) -> usize {
        4
    }
    fn default_value(&self) -> Vec<f64> {
        vec![1.0, 0.0, 0.0, 0.0]
    }
    fn add(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
        let a = UnitQuaternion::from_quaternion(Quaternion::new(lhs[0], lhs[1], lhs[2], lhs[3]));
        let b = UnitQuaternion::from_quaternion(Quaternion::new(rhs[0], rhs[1], rhs[2], rhs[3]));
        let q = a * b;
        Ok(vec![q.w, q.i, q.j, q.k])
    }
    fn subtract(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
        let a = UnitQuaternion::from_quaternion(Quaternion::new(lhs[0], lhs[1], lhs[2], lhs[3]));
        let b = UnitQuaternion::from_quaternion(Quaternion::new(rhs[0], rhs[1], rhs[2], rhs[3]));
        // Small-angle rotation vector between the two orientations.
        let delta = a * b.inverse();
        let rotvec = delta.scaled_axis();
        Ok(vec![rotvec.x, rotvec.y, rotvec.z])
    }
    fn in_frame(
        &self,
        _epoch: Epoch,
        value: &[f64],
        from_frame: &Frame,
        to_frame: &Frame,
        _full_vector: &DVector<f64>,
        _broker: &CoordinateBroker,
    ) -> Result<Vec<f64>, AstrodyneError> {
        let relative = relative_orientation(from_frame, to_frame, _epoch)?;
        let q = UnitQuaternion::from_quaternion(Quaternion::new(value[0], value[1], value[2], value[3]));
        let q2 = relative * q;
        Ok(vec![q2.w, q2.i, q2.j, q2.k])
    }
}

fn relative_orientation(from: &Frame, to: &Frame, epoch: Epoch) -> Result<UnitQuaternion<f64>, AstrodyneError> {
    if from == to {
        return Ok(UnitQuaternion::identity());
    }
    // Use the position transform of the unit X axis to recover the relative
    // rotation between the two frames (both kinds this crate ships rotate
    // only about +Z, so this is exact for them).
    let (x2, _) = transform_position_velocity(from, to, epoch, Vector3::x(), Vector3::zeros())?;
    let theta = x2.y.atan2(x2.x);
    Ok(UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta))
}

#[derive(Debug, Default)]
pub struct AngularVelocity;

impl CoordinateSubset for AngularVelocity {
    fn name(&self) -> &'static str {
        "angular_velocity"
    }
    fn size(&self) -> usize {
        3
    }
    fn default_value(&self) -> Vec<f64> {
        vec![0.0; 3]
    }
    fn dependencies(&self) -> &'static [&'static str] {
        &["attitude_quaternion"]
    }
    fn add(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
        Ok(vec_add(lhs, rhs))
    }
    fn subtract(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
        Ok(vec_sub(lhs, rhs))
    }
    fn in_frame(
        &self,
        epoch: Epoch,
        value: &[f64],
        from_frame: &Frame,
        to_frame: &Frame,
        _full_vector: &DVector<f64>,
        _broker: &CoordinateBroker,
    ) -> Result<Vec<f64>, AstrodyneError> {
        let relative = relative_orientation(from_frame, to_frame, epoch)?;
        let w = Vector3::new(value[0], value[1], value[2]);
        let w2 = relative * w;
        Ok(vec![w2.x, w2.y, w2.z])
    }
}

/// Shared implementation for frame-invariant scalars (mass, drag
/// coefficient, surface area, ...): pass through under any frame change.
macro_rules! scalar_subset {
    ($ty:ident, $name:literal, $default:expr) => {
        #[derive(Debug, Default)]
        pub struct $ty;

        impl CoordinateSubset for $ty {
            fn name(&self) -> &'static str {
                $name
            }
            fn size(&self) -> usize {
                1
            }
            fn default_value(&self) -> Vec<f64> {
                vec![$default]
            }
            fn add(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
                Ok(vec![lhs[0] + rhs[0]])
            }
            fn subtract(&self, lhs: &[f64], rhs: &[f64]) -> Result<Vec<f64>, AstrodyneError> {
                Ok(vec![lhs[0] - rhs[0]])
            }
            fn in_frame(
                &self,
                _epoch: Epoch,
                value: &[f64],
                _from_frame: &Frame,
                _to_frame: &Frame,
                _full_vector: &DVector<f64>,
                _broker: &CoordinateBroker,
            ) -> Result<Vec<f64>, AstrodyneError> {
                Ok(value.to_vec())
            }
        }
    };
}

scalar_subset!(Mass, "mass", 0.0);
scalar_subset!(DragCoefficient, "drag_coefficient", 2.2);
scalar_subset!(SurfaceArea, "surface_area", 0.0);

lazy_static! {
    pub static ref CARTESIAN_POSITION: Arc<dyn CoordinateSubset> = Arc::new(CartesianPosition);
    pub static ref CARTESIAN_VELOCITY: Arc<dyn CoordinateSubset> = Arc::new(CartesianVelocity);
    pub static ref ATTITUDE_QUATERNION: Arc<dyn CoordinateSubset> = Arc::new(AttitudeQuaternion);
    pub static ref ANGULAR_VELOCITY: Arc<dyn CoordinateSubset> = Arc::new(AngularVelocity);
    pub static ref MASS: Arc<dyn CoordinateSubset> = Arc::new(Mass);
    pub static ref DRAG_COEFFICIENT: Arc<dyn CoordinateSubset> = Arc::new(DragCoefficient);
    pub static ref SURFACE_AREA: Arc<dyn CoordinateSubset> = Arc::new(SurfaceArea);
}
