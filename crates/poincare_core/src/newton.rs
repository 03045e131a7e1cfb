use crate::shooting::ShootingProblem;
use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitSolution {
    pub x_bar: Vec<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    pub period: f64,
}

/// Newton iteration on the shooting functional, with the Jacobian assembled
/// column by column through `jacobian_apply`.
pub fn solve_orbit(
    problem: &ShootingProblem,
    initial_guess: &[f64],
    params: &[f64],
    settings: NewtonSettings,
) -> Result<OrbitSolution> {
    let dim = problem.unknowns();
    if initial_guess.len() != dim {
        bail!(
            "Initial guess dimension mismatch. Expected {}, got {}.",
            dim,
            initial_guess.len()
        );
    }
    if settings.max_steps == 0 {
        bail!("max_steps must be greater than zero.");
    }
    if settings.damping <= 0.0 {
        bail!("damping must be positive.");
    }
    if settings.tolerance <= 0.0 {
        bail!("tolerance must be positive.");
    }

    let mut x_bar = initial_guess.to_vec();
    let mut residual = problem.evaluate(&x_bar, params)?;
    let mut residual_norm = l2_norm(&residual);
    let mut iterations = 0usize;

    loop {
        log::debug!("newton step {iterations}: ‖F(x)‖ = {residual_norm:e}");
        if residual_norm <= settings.tolerance {
            break;
        }

        if iterations >= settings.max_steps {
            bail!(
                "Newton solver failed to converge in {} steps (‖F(x)‖ = {}).",
                settings.max_steps,
                residual_norm
            );
        }

        let jacobian = problem.jacobian_matrix(&x_bar, params)?;
        let delta = solve_linear_system(jacobian, &residual)
            .context("Failed to solve linear system during Newton iteration.")?;

        for (x, d) in x_bar.iter_mut().zip(delta.iter()) {
            *x -= settings.damping * d;
        }

        iterations += 1;
        residual = problem.evaluate(&x_bar, params)?;
        residual_norm = l2_norm(&residual);
    }

    let period = problem.period(&x_bar, params)?;
    Ok(OrbitSolution {
        x_bar,
        residual_norm,
        iterations,
        period,
    })
}

fn solve_linear_system(jacobian: DMatrix<f64>, residual: &[f64]) -> Result<DVector<f64>> {
    let rhs = DVector::from_column_slice(residual);
    jacobian
        .lu()
        .solve(&rhs)
        .ok_or_else(|| anyhow!("Shooting Jacobian is singular."))
}

fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
