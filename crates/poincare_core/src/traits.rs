use crate::autodiff::Dual;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in our dynamical systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// An ODE vector field `dx/dt = F(t, x, params)`.
///
/// Parameters are passed on every call rather than stored, so one field can be
/// shared across threads while different parameter sets are evaluated.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// params: parameter values
    /// out: buffer to write dx/dt
    fn apply(&self, t: T, x: &[T], params: &[T], out: &mut [T]);
}

/// A vector field that can be evaluated on plain floats and on dual numbers.
///
/// The dual evaluation provides the field derivative used by the variational
/// (tangent) flow, so implementors only write the field once, generically.
pub trait SmoothField: DynamicalSystem<f64> + DynamicalSystem<Dual> + Send + Sync {}

impl<S> SmoothField for S where S: DynamicalSystem<f64> + DynamicalSystem<Dual> + Send + Sync {}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    fn step<S>(&mut self, system: &S, params: &[T], t: &mut T, state: &mut [T], dt: T)
    where
        S: DynamicalSystem<T> + ?Sized;
}
