//! Flow contract consumed by the shooting functional, plus `OdeFlow`, a
//! fixed-step implementation with event-terminated integration.
//!
//! A flow maps `(state, params, stop)` to a terminal state. `Stop::After`
//! integrates for a fixed time with event detection disabled; `Stop::AtEvent`
//! runs until the event indicator crosses zero upward (from `< 0` to `>= 0`).
//! Batched variants take independent start states and return results in input
//! order; the default implementations dispatch them on the rayon pool.

use crate::autodiff::TangentSystem;
use crate::error::ShootingError;
use crate::solvers::{Stepper, StepperKind};
use crate::traits::{DynamicalSystem, SmoothField, Steppable};
use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Scalar indicator whose upward zero crossing terminates integration.
pub trait EventFunction: Sync {
    fn value(&self, state: &[f64]) -> f64;
}

/// Termination rule for one integration.
#[derive(Clone, Copy)]
pub enum Stop<'a> {
    /// Integrate for exactly this long; events disabled.
    After(f64),
    /// Integrate until the indicator crosses zero upward.
    AtEvent(&'a dyn EventFunction),
}

impl Stop<'_> {
    pub fn events_enabled(&self) -> bool {
        matches!(self, Stop::AtEvent(_))
    }
}

impl fmt::Debug for Stop<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stop::After(time) => f.debug_tuple("After").field(time).finish(),
            Stop::AtEvent(_) => f.write_str("AtEvent(..)"),
        }
    }
}

/// Terminal state together with the elapsed integration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPoint {
    pub state: Vec<f64>,
    pub time: f64,
}

/// Recorded state history, one entry per accepted step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn final_time(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }

    fn push(&mut self, time: f64, state: &[f64]) {
        self.times.push(time);
        self.states.push(state.to_vec());
    }

    /// Appends `other` end-to-end, shifting its times to start where this one ends.
    pub fn append(&mut self, other: Trajectory) {
        let offset = self.final_time();
        self.times.extend(other.times.into_iter().map(|t| t + offset));
        self.states.extend(other.states);
    }
}

/// The integrator seen by the shooting core.
pub trait Flow: Send + Sync {
    /// Dimension of the full state space.
    fn dimension(&self) -> usize;

    /// Instantaneous vector field `F(state, params)`.
    fn field(&self, state: &[f64], params: &[f64]) -> Result<Vec<f64>>;

    /// Terminal state and time of termination.
    fn advance_with_time(&self, state: &[f64], params: &[f64], stop: Stop<'_>)
        -> Result<FlowPoint>;

    /// Terminal state only.
    fn advance(&self, state: &[f64], params: &[f64], stop: Stop<'_>) -> Result<Vec<f64>> {
        Ok(self.advance_with_time(state, params, stop)?.state)
    }

    /// Full state/time history up to termination.
    fn trajectory(&self, state: &[f64], params: &[f64], stop: Stop<'_>) -> Result<Trajectory>;

    /// Variational solution: derivative of the time-`time` flow map at `state`
    /// applied to `direction`. Events are never active here.
    fn tangent(
        &self,
        state: &[f64],
        params: &[f64],
        direction: &[f64],
        time: f64,
    ) -> Result<Vec<f64>>;

    fn advance_batch(
        &self,
        states: &[Vec<f64>],
        params: &[f64],
        stops: &[Stop<'_>],
    ) -> Result<Vec<FlowPoint>> {
        check_batch(states.len(), stops.len())?;
        states
            .par_iter()
            .zip(stops.par_iter())
            .map(|(state, stop)| self.advance_with_time(state, params, *stop))
            .collect()
    }

    fn trajectory_batch(
        &self,
        states: &[Vec<f64>],
        params: &[f64],
        stops: &[Stop<'_>],
    ) -> Result<Vec<Trajectory>> {
        check_batch(states.len(), stops.len())?;
        states
            .par_iter()
            .zip(stops.par_iter())
            .map(|(state, stop)| self.trajectory(state, params, *stop))
            .collect()
    }

    fn tangent_batch(
        &self,
        states: &[Vec<f64>],
        params: &[f64],
        directions: &[Vec<f64>],
        times: &[f64],
    ) -> Result<Vec<Vec<f64>>> {
        check_batch(states.len(), directions.len())?;
        check_batch(states.len(), times.len())?;
        states
            .par_iter()
            .zip(directions.par_iter())
            .zip(times.par_iter())
            .map(|((state, direction), &time)| self.tangent(state, params, direction, time))
            .collect()
    }
}

fn check_batch(states: usize, others: usize) -> Result<()> {
    if states != others {
        bail!(
            "Batched flow call needs one entry per start state ({} states, {} entries)",
            states,
            others
        );
    }
    Ok(())
}

/// Integrator configuration for `OdeFlow`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowSettings {
    pub stepper: StepperKind,
    pub step_size: f64,
    /// Upper bound on the time spent searching for an event.
    pub max_time: f64,
    /// Indicator magnitude accepted as "on the section". Zero is allowed; the
    /// flow never goes below the rounding level of the start state.
    pub event_tolerance: f64,
    pub max_event_iterations: usize,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            stepper: StepperKind::Rk4,
            step_size: 1e-3,
            max_time: 1e3,
            event_tolerance: 1e-12,
            max_event_iterations: 64,
        }
    }
}

impl FlowSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.step_size > 0.0) || !self.step_size.is_finite() {
            bail!("step_size must be positive and finite.");
        }
        if !(self.max_time > 0.0) {
            bail!("max_time must be positive.");
        }
        if !(self.event_tolerance >= 0.0) {
            bail!("event_tolerance must be non-negative.");
        }
        if self.max_event_iterations == 0 {
            bail!("max_event_iterations must be greater than zero.");
        }
        Ok(())
    }
}

/// Fixed-step flow of a `SmoothField` with upward zero-crossing detection.
///
/// The tangent flow integrates the variational system with its own settings,
/// which default to the base settings.
pub struct OdeFlow {
    field: Arc<dyn SmoothField>,
    settings: FlowSettings,
    tangent_settings: FlowSettings,
}

impl OdeFlow {
    pub fn new(field: Arc<dyn SmoothField>, settings: FlowSettings) -> Result<Self> {
        settings.validate()?;
        if DynamicalSystem::<f64>::dimension(field.as_ref()) == 0 {
            bail!("Vector field has zero dimension.");
        }
        Ok(Self {
            field,
            settings,
            tangent_settings: settings,
        })
    }

    pub fn with_tangent_settings(mut self, settings: FlowSettings) -> Result<Self> {
        settings.validate()?;
        self.tangent_settings = settings;
        Ok(self)
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub fn tangent_settings(&self) -> &FlowSettings {
        &self.tangent_settings
    }

    fn check_state(&self, what: &'static str, state: &[f64]) -> Result<()> {
        let expected = self.dimension();
        if state.len() != expected {
            return Err(ShootingError::Dimension {
                what,
                expected,
                found: state.len(),
            }
            .into());
        }
        Ok(())
    }
}

impl Flow for OdeFlow {
    fn dimension(&self) -> usize {
        DynamicalSystem::<f64>::dimension(self.field.as_ref())
    }

    fn field(&self, state: &[f64], params: &[f64]) -> Result<Vec<f64>> {
        self.check_state("flow state", state)?;
        let mut out = vec![0.0; state.len()];
        DynamicalSystem::<f64>::apply(self.field.as_ref(), 0.0, state, params, &mut out);
        Ok(out)
    }

    fn advance_with_time(
        &self,
        state: &[f64],
        params: &[f64],
        stop: Stop<'_>,
    ) -> Result<FlowPoint> {
        self.check_state("flow state", state)?;
        integrate(self.field.as_ref(), &self.settings, params, state, stop, None)
    }

    fn trajectory(&self, state: &[f64], params: &[f64], stop: Stop<'_>) -> Result<Trajectory> {
        self.check_state("flow state", state)?;
        let mut trajectory = Trajectory::default();
        integrate(
            self.field.as_ref(),
            &self.settings,
            params,
            state,
            stop,
            Some(&mut trajectory),
        )?;
        Ok(trajectory)
    }

    fn tangent(
        &self,
        state: &[f64],
        params: &[f64],
        direction: &[f64],
        time: f64,
    ) -> Result<Vec<f64>> {
        self.check_state("flow state", state)?;
        self.check_state("tangent direction", direction)?;
        let n = state.len();
        let system = TangentSystem::new(self.field.as_ref(), n);
        let mut augmented = Vec::with_capacity(2 * n);
        augmented.extend_from_slice(state);
        augmented.extend_from_slice(direction);
        let end = integrate(
            &system,
            &self.tangent_settings,
            params,
            &augmented,
            Stop::After(time),
            None,
        )?;
        Ok(end.state[n..].to_vec())
    }
}

fn record(recorder: &mut Option<&mut Trajectory>, time: f64, state: &[f64]) {
    if let Some(trajectory) = recorder.as_deref_mut() {
        trajectory.push(time, state);
    }
}

fn check_finite(state: &[f64], time: f64) -> Result<()> {
    if state.iter().any(|v| !v.is_finite()) {
        bail!("Integration diverged at t = {}.", time);
    }
    Ok(())
}

/// Indicator magnitude treated as zero for an integration starting at `state`.
///
/// A point placed on a hyperplane far from the origin only satisfies the
/// hyperplane equation up to the rounding of its coordinates, so the configured
/// tolerance is floored at that rounding level.
fn on_section_tolerance(settings: &FlowSettings, state: &[f64]) -> f64 {
    let magnitude: f64 = state.iter().map(|v| v.abs()).sum();
    settings
        .event_tolerance
        .max(4.0 * f64::EPSILON * magnitude)
}

fn integrate<S>(
    system: &S,
    settings: &FlowSettings,
    params: &[f64],
    start: &[f64],
    stop: Stop<'_>,
    mut recorder: Option<&mut Trajectory>,
) -> Result<FlowPoint>
where
    S: DynamicalSystem<f64> + ?Sized,
{
    let mut stepper = settings.stepper.build::<f64>(start.len());
    let mut state = start.to_vec();
    let mut t = 0.0;
    record(&mut recorder, t, &state);

    match stop {
        Stop::After(horizon) => {
            if !(horizon >= 0.0) || !horizon.is_finite() {
                bail!("Integration horizon must be finite and non-negative (got {}).", horizon);
            }
            while t < horizon {
                let remaining = horizon - t;
                let last = remaining <= settings.step_size;
                let h = if last { remaining } else { settings.step_size };
                stepper.step(system, params, &mut t, &mut state, h);
                if last {
                    t = horizon;
                }
                check_finite(&state, t)?;
                record(&mut recorder, t, &state);
            }
        }
        Stop::AtEvent(event) => {
            let tolerance = on_section_tolerance(settings, &state);
            let mut g_prev = event.value(&state);
            // A start point on the section does not count as a crossing.
            if g_prev.abs() <= tolerance {
                g_prev = 0.0;
            }
            let mut previous = state.clone();
            loop {
                if t >= settings.max_time {
                    bail!(
                        "Trajectory did not reach the section within max_time = {} \
                         (indicator = {}).",
                        settings.max_time,
                        g_prev
                    );
                }
                previous.copy_from_slice(&state);
                let t_prev = t;
                stepper.step(system, params, &mut t, &mut state, settings.step_size);
                check_finite(&state, t)?;
                let g_next = event.value(&state);
                if g_prev < 0.0 && g_next >= 0.0 {
                    let h = locate_crossing(
                        system,
                        &mut stepper,
                        settings,
                        tolerance,
                        params,
                        event,
                        (t_prev, previous.as_slice(), g_prev),
                        g_next,
                        &mut state,
                    );
                    t = t_prev + h;
                    record(&mut recorder, t, &state);
                    break;
                }
                record(&mut recorder, t, &state);
                g_prev = g_next;
            }
        }
    }

    Ok(FlowPoint { state, time: t })
}

/// Finds the step length `h` in `(0, step_size]` at which the indicator
/// reaches zero, by Illinois regula falsi on re-taken steps from the last
/// accepted state. `landing` holds the state at the full step on entry and the
/// located state on exit.
#[allow(clippy::too_many_arguments)]
fn locate_crossing<S>(
    system: &S,
    stepper: &mut Stepper<f64>,
    settings: &FlowSettings,
    tolerance: f64,
    params: &[f64],
    event: &dyn EventFunction,
    (t_prev, previous, g_prev): (f64, &[f64], f64),
    g_next: f64,
    landing: &mut [f64],
) -> f64
where
    S: DynamicalSystem<f64> + ?Sized,
{
    let (mut a, mut fa) = (0.0, g_prev);
    let (mut b, mut fb) = (settings.step_size, g_next);
    let mut h = b;
    let mut g_landing = g_next;
    let mut trial = previous.to_vec();
    let mut side = 0i8;

    for _ in 0..settings.max_event_iterations {
        if g_landing.abs() <= tolerance || b - a <= f64::EPSILON * settings.step_size {
            break;
        }
        let c = (a * fb - b * fa) / (fb - fa);
        trial.copy_from_slice(previous);
        let mut t = t_prev;
        stepper.step(system, params, &mut t, &mut trial, c);
        let gc = event.value(&trial);

        if gc >= 0.0 {
            b = c;
            fb = gc;
            h = c;
            g_landing = gc;
            landing.copy_from_slice(&trial);
            if side == 1 {
                fa *= 0.5;
            }
            side = 1;
        } else {
            a = c;
            fa = gc;
            if gc.abs() <= tolerance {
                h = c;
                landing.copy_from_slice(&trial);
                break;
            }
            if side == -1 {
                fb *= 0.5;
            }
            side = -1;
        }
    }

    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HarmonicOscillator, ShiftedOscillator};
    use crate::traits::Scalar;
    use std::f64::consts::PI;

    struct Coordinate {
        index: usize,
        sign: f64,
    }

    impl EventFunction for Coordinate {
        fn value(&self, state: &[f64]) -> f64 {
            self.sign * state[self.index]
        }
    }

    struct NeverCrosses;

    impl EventFunction for NeverCrosses {
        fn value(&self, state: &[f64]) -> f64 {
            -1.0 - state[0] * state[0]
        }
    }

    struct Quadratic;

    impl<T: Scalar> DynamicalSystem<T> for Quadratic {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, x: &[T], _params: &[T], out: &mut [T]) {
            out[0] = x[0] * x[0];
        }
    }

    fn oscillator_flow() -> OdeFlow {
        OdeFlow::new(Arc::new(HarmonicOscillator), FlowSettings::default())
            .expect("flow should build")
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn fixed_horizon_returns_to_start_after_one_period() {
        let flow = oscillator_flow();
        let end = flow
            .advance_with_time(&[1.0, 0.0], &[], Stop::After(2.0 * PI))
            .expect("advance should succeed");
        assert_eq!(end.time, 2.0 * PI);
        assert!((end.state[0] - 1.0).abs() < 1e-9);
        assert!(end.state[1].abs() < 1e-9);
    }

    #[test]
    fn event_localizes_upward_crossing() {
        let flow = oscillator_flow();
        // y = -sin(t) crosses zero upward at t = π.
        let event = Coordinate { index: 1, sign: 1.0 };
        let end = flow
            .advance_with_time(&[1.0, 0.0], &[], Stop::AtEvent(&event))
            .expect("event should fire");
        assert!((end.time - PI).abs() < 1e-10, "time = {}", end.time);
        assert!((end.state[0] + 1.0).abs() < 1e-9);
        assert!(end.state[1].abs() < 1e-11);
    }

    #[test]
    fn start_on_section_is_not_a_crossing() {
        let flow = oscillator_flow();
        let event = Coordinate { index: 1, sign: -1.0 };
        let end = flow
            .advance_with_time(&[1.0, 0.0], &[], Stop::AtEvent(&event))
            .expect("event should fire");
        assert!((end.time - 2.0 * PI).abs() < 1e-10, "time = {}", end.time);
    }

    /// `C - y - offset`: the line `y = C` seen from a start point that rounding
    /// put slightly below it.
    struct RoundedLine {
        level: f64,
        offset: f64,
    }

    impl EventFunction for RoundedLine {
        fn value(&self, state: &[f64]) -> f64 {
            self.level - state[1] - self.offset
        }
    }

    #[test]
    fn start_on_section_far_from_origin_is_not_a_crossing() {
        let center = 1e6;
        let settings = FlowSettings {
            event_tolerance: 0.0,
            ..FlowSettings::default()
        };
        let flow = OdeFlow::new(Arc::new(ShiftedOscillator), settings).expect("flow");
        let event = RoundedLine {
            level: center,
            offset: 5e-11,
        };
        assert!(event.value(&[center + 1.0, center]) < 0.0);
        let end = flow
            .advance_with_time(&[center + 1.0, center], &[center], Stop::AtEvent(&event))
            .expect("event should fire");
        assert!((end.time - 2.0 * PI).abs() < 1e-6, "time = {}", end.time);
        assert!((end.state[0] - center - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_crossing_is_reported_after_max_time() {
        let settings = FlowSettings {
            max_time: 5.0,
            step_size: 1e-2,
            ..FlowSettings::default()
        };
        let flow = OdeFlow::new(Arc::new(HarmonicOscillator), settings).expect("flow");
        assert_err_contains(
            flow.advance(&[1.0, 0.0], &[], Stop::AtEvent(&NeverCrosses)),
            "max_time",
        );
    }

    #[test]
    fn divergence_is_reported() {
        let flow = OdeFlow::new(Arc::new(Quadratic), FlowSettings::default()).expect("flow");
        assert_err_contains(flow.advance(&[1.0], &[], Stop::After(5.0)), "diverged");
    }

    #[test]
    fn trajectory_records_every_step_and_lands_on_horizon() {
        let settings = FlowSettings {
            step_size: 0.25,
            ..FlowSettings::default()
        };
        let flow = OdeFlow::new(Arc::new(HarmonicOscillator), settings).expect("flow");
        let trajectory = flow
            .trajectory(&[1.0, 0.0], &[], Stop::After(1.0))
            .expect("trajectory");
        assert_eq!(trajectory.times, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(trajectory.len(), 5);
        assert!(!trajectory.is_empty());
        assert!(Trajectory::default().is_empty());
        assert_eq!(trajectory.states.len(), 5);
        assert_eq!(trajectory.states[0], vec![1.0, 0.0]);
    }

    #[test]
    fn trajectory_append_shifts_times() {
        let mut first = Trajectory {
            times: vec![0.0, 1.0],
            states: vec![vec![0.0], vec![1.0]],
        };
        let second = Trajectory {
            times: vec![0.0, 0.5],
            states: vec![vec![1.0], vec![2.0]],
        };
        first.append(second);
        assert_eq!(first.times, vec![0.0, 1.0, 1.0, 1.5]);
        assert_eq!(first.final_state(), Some(&[2.0][..]));
    }

    #[test]
    fn tangent_of_rotation_is_rotation() {
        let flow = oscillator_flow();
        let t = 1.3;
        let v = flow
            .tangent(&[0.4, 0.2], &[], &[1.0, 0.0], t)
            .expect("tangent");
        assert!((v[0] - t.cos()).abs() < 1e-10);
        assert!((v[1] + t.sin()).abs() < 1e-10);
    }

    #[test]
    fn batch_matches_sequential_in_order() {
        let flow = oscillator_flow();
        let event = Coordinate { index: 1, sign: 1.0 };
        let starts = vec![vec![1.0, 0.0], vec![0.5, 0.0], vec![2.0, 0.0]];
        let stops = vec![Stop::AtEvent(&event), Stop::After(1.0), Stop::AtEvent(&event)];
        let batch = flow.advance_batch(&starts, &[], &stops).expect("batch");
        for ((start, stop), got) in starts.iter().zip(&stops).zip(&batch) {
            let expected = flow.advance_with_time(start, &[], *stop).expect("single");
            assert_eq!(&expected, got);
        }
        assert_err_contains(flow.advance_batch(&starts, &[], &stops[..1]), "one entry per");
    }

    #[test]
    fn stop_reports_whether_events_are_active() {
        let event = Coordinate { index: 0, sign: 1.0 };
        assert!(!Stop::After(1.0).events_enabled());
        assert!(Stop::AtEvent(&event).events_enabled());
    }

    #[test]
    fn tangent_batch_matches_sequential_in_order() {
        let flow = oscillator_flow();
        let starts = vec![vec![1.0, 0.0], vec![0.3, -0.2]];
        let directions = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let times = [0.7, 2.1];
        let batch = flow
            .tangent_batch(&starts, &[], &directions, &times)
            .expect("batch");
        for (i, got) in batch.iter().enumerate() {
            let expected = flow
                .tangent(&starts[i], &[], &directions[i], times[i])
                .expect("single");
            assert_eq!(&expected, got);
        }
        assert_err_contains(
            flow.tangent_batch(&starts, &[], &directions, &times[..1]),
            "one entry per",
        );
    }

    #[test]
    fn tangent_settings_default_to_base_settings() {
        let flow = oscillator_flow();
        assert_eq!(flow.settings(), flow.tangent_settings());
        let fine = FlowSettings {
            step_size: 5e-4,
            ..FlowSettings::default()
        };
        let flow = flow.with_tangent_settings(fine).expect("valid settings");
        assert_eq!(flow.settings().step_size, 1e-3);
        assert_eq!(flow.tangent_settings(), &fine);
    }

    #[test]
    fn rejects_wrong_state_dimension() {
        let flow = oscillator_flow();
        let err = flow
            .advance(&[1.0, 0.0, 0.0], &[], Stop::After(1.0))
            .expect_err("dimension mismatch");
        assert!(matches!(
            err.downcast_ref::<ShootingError>(),
            Some(ShootingError::Dimension { expected: 2, found: 3, .. })
        ));
    }
}
