//! Coordinate subsets, broker and state (C1-C2): the typed layer that lets
//! heterogeneous state vectors flow through dynamics, conditions and the
//! integrator without losing meaning.

pub mod broker;
pub mod state;
pub mod subset;

pub use broker::CoordinateBroker;
pub use state::{State, StateBuilder, StateDelta};
pub use subset::{
    AngularVelocity, AttitudeQuaternion, CartesianPosition, CartesianVelocity, CoordinateSubset,
    DragCoefficient, Mass, SurfaceArea, ANGULAR_VELOCITY, ATTITUDE_QUATERNION, CARTESIAN_POSITION,
    CARTESIAN_VELOCITY, DRAG_COEFFICIENT, MASS, SURFACE_AREA,
};
