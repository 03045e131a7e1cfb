use crate::traits::{DynamicalSystem, Scalar, Steppable};
use serde::{Deserialize, Serialize};

/// Fixed-step integrator selection, used in flow settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepperKind {
    Rk4,
    Tsit5,
}

impl Default for StepperKind {
    fn default() -> Self {
        StepperKind::Rk4
    }
}

impl StepperKind {
    pub fn build<T: Scalar>(self, dim: usize) -> Stepper<T> {
        match self {
            StepperKind::Rk4 => Stepper::Rk4(RK4::new(dim)),
            StepperKind::Tsit5 => Stepper::Tsit5(Tsit5::new(dim)),
        }
    }
}

/// A built stepper with its own scratch buffers.
pub enum Stepper<T: Scalar> {
    Rk4(RK4<T>),
    Tsit5(Tsit5<T>),
}

impl<T: Scalar> Steppable<T> for Stepper<T> {
    fn step<S>(&mut self, system: &S, params: &[T], t: &mut T, state: &mut [T], dt: T)
    where
        S: DynamicalSystem<T> + ?Sized,
    {
        match self {
            Stepper::Rk4(s) => s.step(system, params, t, state, dt),
            Stepper::Tsit5(s) => s.step(system, params, t, state, dt),
        }
    }
}

fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step<S>(&mut self, system: &S, params: &[T], t: &mut T, state: &mut [T], dt: T)
    where
        S: DynamicalSystem<T> + ?Sized,
    {
        let half = constant::<T>(0.5);
        let sixth = constant::<T>(1.0 / 6.0);
        let two = constant::<T>(2.0);
        let t0 = *t;
        let n = state.len();

        system.apply(t0, state, params, &mut self.k1);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, params, &mut self.k2);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, params, &mut self.k3);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, params, &mut self.k4);

        for i in 0..n {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

const TSIT5_C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0];

const TSIT5_A: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [0.161, 0.0, 0.0, 0.0, 0.0],
    [-0.008480655492356989, 0.335480655492357, 0.0, 0.0, 0.0],
    [2.898, -6.359447987781783, 4.361447987781783, 0.0, 0.0],
    [
        5.325864858437957,
        -11.748883564062828,
        7.495539342889693,
        -0.09249506636030195,
        0.0,
    ],
    [
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.02826857949054663,
    ],
];

// 5th-order weights (first-same-as-last row of the tableau).
const TSIT5_B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436099,
    2.324710524099774,
];

/// Tsitouras 5/4 Solver, used here with a fixed step.
pub struct Tsit5<T: Scalar> {
    stages: Vec<Vec<T>>,
    tmp: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            stages: vec![vec![T::zero(); dim]; TSIT5_C.len()],
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step<S>(&mut self, system: &S, params: &[T], t: &mut T, state: &mut [T], dt: T)
    where
        S: DynamicalSystem<T> + ?Sized,
    {
        let t0 = *t;
        let n = state.len();

        for stage in 0..TSIT5_C.len() {
            for i in 0..n {
                let mut acc = T::zero();
                for (prev, &a) in TSIT5_A[stage].iter().enumerate().take(stage) {
                    acc = acc + constant::<T>(a) * self.stages[prev][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            let stage_time = t0 + constant::<T>(TSIT5_C[stage]) * dt;
            system.apply(stage_time, &self.tmp, params, &mut self.stages[stage]);
        }

        for i in 0..n {
            let mut acc = T::zero();
            for (stage, &b) in TSIT5_B.iter().enumerate() {
                acc = acc + constant::<T>(b) * self.stages[stage][i];
            }
            state[i] = state[i] + dt * acc;
        }

        *t = t0 + dt;
    }
}
