//! End-to-end periodic orbit search on the Van der Pol oscillator.

use approx::assert_abs_diff_eq;
use poincare_core::traits::{DynamicalSystem, Scalar};
use poincare_core::*;
use std::sync::Arc;

/// `x' = y`, `y' = mu (1 - x²) y - x`, params `[mu]`.
struct VanDerPol;

impl<T: Scalar> DynamicalSystem<T> for VanDerPol {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _t: T, x: &[T], params: &[T], out: &mut [T]) {
        out[0] = x[1];
        out[1] = params[0] * (T::one() - x[0] * x[0]) * x[1] - x[0];
    }
}

const PARAMS: [f64; 1] = [1.0];
const PERIOD: f64 = 6.663_286_859;
const AMPLITUDE: f64 = 2.008_619_86;

fn problem(centers: Vec<Vec<f64>>, settings: ShootingSettings) -> ShootingProblem {
    let config = FlowConfig::new(Arc::new(VanDerPol), FlowSettings::default());
    let flow = config.build().unwrap();
    let section = Section::from_field(&flow, &PARAMS, centers, Reduction::Hyperplane).unwrap();
    ShootingProblem::new(FlowHandle::Deferred(config), section, settings).unwrap()
}

// ============================================================================
// Single section, analytical Jacobian
// ============================================================================

#[test]
fn single_section_limit_cycle() {
    let problem = problem(vec![vec![2.0, 0.0]], ShootingSettings::default());
    let solution = solve_orbit(&problem, &[0.0], &PARAMS, NewtonSettings::default()).unwrap();

    assert_abs_diff_eq!(solution.period, PERIOD, epsilon = 1e-4);
    // The section at x = 2 is crossed where the cycle reaches its largest x.
    assert_abs_diff_eq!(2.0 + solution.x_bar[0], AMPLITUDE, epsilon = 1e-3);

    let amplitude = problem
        .extremum(&solution.x_bar, &PARAMS, &ExtremumOptions::default())
        .unwrap();
    assert_abs_diff_eq!(amplitude, AMPLITUDE, epsilon = 1e-3);

    let report = problem.floquet(&solution.x_bar, &PARAMS).unwrap();
    assert_eq!(report.multipliers.len(), 1);
    let multiplier = report.multipliers[0];
    assert!(multiplier.re > 0.0 && multiplier.re < 1.0, "{multiplier}");
    assert!(report.stable);
}

#[test]
fn section_update_moves_onto_the_cycle() {
    let mut problem = problem(vec![vec![2.0, 0.0]], ShootingSettings::default());
    let solution = solve_orbit(&problem, &[0.0], &PARAMS, NewtonSettings::default()).unwrap();

    let guess = problem.update_section(&solution.x_bar, &PARAMS).unwrap();
    assert_eq!(guess, vec![0.0]);
    let residual = problem.evaluate(&guess, &PARAMS).unwrap();
    assert!(residual[0].abs() < 1e-8, "{residual:?}");
}

// ============================================================================
// Two sections, parallel finite differences
// ============================================================================

#[test]
fn two_sections_in_parallel() {
    let settings = ShootingSettings {
        delta: 1e-7,
        parallel: true,
        ..Default::default()
    };
    let problem = problem(vec![vec![2.0, 0.0], vec![-2.0, 0.0]], settings);
    assert!(problem.is_parallel());

    let solution = solve_orbit(&problem, &[0.0, 0.0], &PARAMS, NewtonSettings::default()).unwrap();
    assert_abs_diff_eq!(solution.period, PERIOD, epsilon = 1e-4);
    // The cycle is symmetric under x -> -x.
    assert_abs_diff_eq!(solution.x_bar[0], -solution.x_bar[1], epsilon = 1e-6);

    let trajectory = problem.trajectory(&solution.x_bar, &PARAMS).unwrap();
    assert_abs_diff_eq!(trajectory.final_time(), PERIOD, epsilon = 1e-4);

    let err = ShootingProblem::new(
        problem.handle().clone(),
        problem.section().clone(),
        ShootingSettings {
            parallel: true,
            ..Default::default()
        },
    )
    .unwrap()
    .jacobian_apply(&[0.0, 0.0], &PARAMS, &[1.0, 0.0])
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ShootingError>(),
        Some(&ShootingError::ParallelAnalyticalJacobian)
    );
}

// ============================================================================
// Branch switching
// ============================================================================

#[test]
fn branch_switch_to_a_different_parameter() {
    let problem = problem(vec![vec![2.0, 0.0]], ShootingSettings::default());
    let params = [0.5];
    let (branch, guess) = problem
        .switch_branch(Arc::new(VanDerPol), &params, vec![vec![2.0, 0.0]], PERIOD)
        .unwrap();
    let solution = solve_orbit(&branch, &guess, &params, NewtonSettings::default()).unwrap();
    // Weaker damping gives a cycle closer to the harmonic one.
    assert!(solution.period > 2.0 * std::f64::consts::PI && solution.period < PERIOD);
}
