use super::ShootingProblem;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Nontrivial Floquet multipliers of an orbit and the test functions that
/// change sign at its codimension-one bifurcations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloquetReport {
    pub multipliers: Vec<Complex<f64>>,
    /// Every multiplier strictly inside the unit circle.
    pub stable: bool,
    /// Product of `mu - 1` over real multipliers.
    pub cycle_fold: f64,
    /// Product of `mu + 1` over real multipliers.
    pub period_doubling: f64,
    /// Product of `|mu|² - 1` over complex pairs.
    pub neimark_sacker: f64,
}

impl ShootingProblem {
    /// Derivative of the full return map to section 0, in reduced coordinates.
    ///
    /// Block `i` maps the tangent space of section `i - 1` to that of section
    /// `i`; the monodromy is the product `A_0 A_{M-1} ... A_1`.
    pub fn monodromy(&self, x_bar: &[f64], params: &[f64]) -> Result<DMatrix<f64>> {
        let xc = self.lift(x_bar)?;
        let r = self.reduced_dimension();
        let mut monodromy = DMatrix::<f64>::identity(r, r);
        for step in 1..=self.count() {
            let to = step % self.count();
            monodromy = self.return_block(&xc, params, to)? * monodromy;
        }
        Ok(monodromy)
    }

    fn return_block(&self, xc: &[Vec<f64>], params: &[f64], to: usize) -> Result<DMatrix<f64>> {
        let from = self.previous(to);
        let r = self.reduced_dimension();
        let mut block = DMatrix::<f64>::zeros(r, r);
        let mut reduced = vec![0.0; r];
        let mut direction = vec![0.0; self.dimension()];
        let mut column = vec![0.0; r];
        for j in 0..r {
            reduced[j] = 1.0;
            self.section.embed_tangent(&mut direction, &reduced, from);
            reduced[j] = 0.0;
            let mapped = self.diff_poincare_map(&xc[from], params, &direction, from)?;
            self.section.restrict_tangent(&mut column, &mapped, to);
            block.set_column(j, &DVector::from_column_slice(&column));
        }
        Ok(block)
    }

    /// Floquet multipliers from the eigenvalues of `monodromy`.
    pub fn floquet(&self, x_bar: &[f64], params: &[f64]) -> Result<FloquetReport> {
        let monodromy = self.monodromy(x_bar, params)?;
        if monodromy.iter().any(|v| !v.is_finite()) {
            bail!("Monodromy matrix contains non-finite entries.");
        }
        let multipliers: Vec<Complex<f64>> =
            monodromy.complex_eigenvalues().iter().cloned().collect();
        let (cycle_fold, period_doubling, neimark_sacker) = cycle_tests(&multipliers);
        let stable = multipliers.iter().all(|mu| mu.norm() < 1.0);
        Ok(FloquetReport {
            multipliers,
            stable,
            cycle_fold,
            period_doubling,
            neimark_sacker,
        })
    }
}

fn cycle_tests(multipliers: &[Complex<f64>]) -> (f64, f64, f64) {
    const IMAG_EPS: f64 = 1e-5;
    let mut cycle_fold = 1.0;
    let mut period_doubling = 1.0;
    let mut neimark_sacker = 1.0;
    for mu in multipliers {
        if mu.im.abs() < IMAG_EPS {
            cycle_fold *= mu.re - 1.0;
            period_doubling *= mu.re + 1.0;
        } else if mu.im > 0.0 {
            neimark_sacker *= mu.norm_sqr() - 1.0;
        }
    }
    (cycle_fold, period_doubling, neimark_sacker)
}
