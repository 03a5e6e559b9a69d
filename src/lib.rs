//! Trajectory propagation and mission-sequencing engine: typed coordinate
//! brokers and states (C1-C2), dynamics-as-data force terms (C3), event
//! conditions (C4), a numerical integrator (C5), a propagator that wires the
//! two together (C6), coast/maneuver segments and sequences of them (C7-C8),
//! a finite-difference Jacobian (C9), least-squares orbit determination
//! (C10), and access/visibility scanning (C11).

pub mod access;
pub mod blm;
pub mod coe;
pub mod coord;
pub mod dynamics;
pub mod errors;
pub mod event;
pub mod frames;
pub mod integrator;
pub mod interp;
pub mod jacobian;
pub mod od;
pub mod propagators;
pub mod rootfind;
pub mod segment;
pub mod sequence;

pub use coord::{CoordinateBroker, State, StateBuilder, StateDelta};
pub use errors::AstrodyneError;
pub use event::EventCondition;
pub use frames::{CelestialBody, Environment, Frame};
pub use integrator::{ConditionSolution, IntegratorOpts, NumericalIntegrator, Stepper};
pub use propagators::Propagator;
pub use segment::{Maneuver, Segment, SegmentSolution};
pub use sequence::{Sequence, SequenceSolution};
