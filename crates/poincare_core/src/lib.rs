//! The `poincare_core` crate locates periodic orbits of smooth flows by
//! Poincaré shooting on one or more hyperplane sections.
//!
//! Key components:
//! - **Traits**: `Scalar`, `DynamicalSystem` and `SmoothField` (a vector field
//!   that evaluates on both `f64` and `Dual`), `Steppable` (solvers).
//! - **Flow**: fixed-step integration with section-crossing events, state
//!   histories and the variational (tangent) flow.
//! - **Section**: hyperplanes with local charts that remove one dimension each.
//! - **Shooting**: the shooting functional, its Jacobian (finite-difference or
//!   analytical), period, trajectory, extrema, section updates, branch
//!   switching and Floquet multipliers.
//! - **Newton**: a plain Newton solver on the shooting functional.
pub mod autodiff;
pub mod error;
pub mod flow;
pub mod newton;
pub mod section;
pub mod shooting;
pub mod solvers;
pub mod traits;

#[cfg(test)]
mod testing;

pub use error::ShootingError;
pub use flow::{EventFunction, Flow, FlowPoint, FlowSettings, OdeFlow, Stop, Trajectory};
pub use newton::{solve_orbit, NewtonSettings, OrbitSolution};
pub use section::{Reduction, Section};
pub use shooting::{
    ExtremumKind, ExtremumOptions, FloquetReport, FlowConfig, FlowHandle, ShootingProblem,
    ShootingSettings,
};
pub use traits::SmoothField;
