use super::ShootingProblem;
use crate::error::ShootingError;
use crate::flow::Stop;
use crate::section::Reduction;
use anyhow::{bail, Result};
use nalgebra::DMatrix;

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl ShootingProblem {
    /// Directional derivative of `evaluate` at `x_bar` along `dx_bar`.
    ///
    /// A positive `delta` uses a one-sided finite difference; `delta == 0`
    /// differentiates the return maps through the variational flow, which is
    /// only available in sequential mode.
    pub fn jacobian_apply(
        &self,
        x_bar: &[f64],
        params: &[f64],
        dx_bar: &[f64],
    ) -> Result<Vec<f64>> {
        self.check_unknowns("reduced orbit", x_bar)?;
        self.check_unknowns("reduced direction", dx_bar)?;
        if self.settings.delta > 0.0 {
            return self.finite_difference_apply(x_bar, params, dx_bar);
        }
        if self.settings.parallel {
            return Err(ShootingError::ParallelAnalyticalJacobian.into());
        }
        self.analytical_apply(x_bar, params, dx_bar)
    }

    fn finite_difference_apply(
        &self,
        x_bar: &[f64],
        params: &[f64],
        dx_bar: &[f64],
    ) -> Result<Vec<f64>> {
        let delta = self.settings.delta;
        let shifted: Vec<f64> = x_bar.iter().zip(dx_bar).map(|(x, d)| x + delta * d).collect();
        let base = self.evaluate(x_bar, params)?;
        let plus = self.evaluate(&shifted, params)?;
        Ok(plus.iter().zip(&base).map(|(p, b)| (p - b) / delta).collect())
    }

    fn analytical_apply(&self, x_bar: &[f64], params: &[f64], dx_bar: &[f64]) -> Result<Vec<f64>> {
        let xc = self.lift(x_bar)?;
        let dxc = self.lift_tangent(dx_bar)?;
        let r = self.reduced_dimension();
        let mut out = vec![0.0; self.unknowns()];
        let mut residual = vec![0.0; self.dimension()];
        for (i, block) in out.chunks_mut(r).enumerate() {
            let prev = self.previous(i);
            let mapped = self.diff_poincare_map(&xc[prev], params, &dxc[prev], prev)?;
            for ((dst, d), m) in residual.iter_mut().zip(&dxc[i]).zip(&mapped) {
                *dst = d - m;
            }
            self.section.restrict_tangent(block, &residual, i);
        }
        Ok(out)
    }

    /// Derivative of the return map from section `from` to the next section,
    /// at `state` along `direction`.
    ///
    /// With `y = DΦ(state, τ) direction` and `z = F(Φ(state, τ))`, where `τ` is
    /// the arrival time, the result is `y - (n·y / n·z) z` for the normal `n`
    /// of the landing section. `direction` is expected to lie in the tangent
    /// plane of section `from`; a violation is logged, not rejected.
    pub fn diff_poincare_map(
        &self,
        state: &[f64],
        params: &[f64],
        direction: &[f64],
        from: usize,
    ) -> Result<Vec<f64>> {
        if from >= self.count() {
            bail!("Section index {} out of range ({} sections).", from, self.count());
        }
        if direction.len() != self.dimension() {
            return Err(ShootingError::Dimension {
                what: "tangent direction",
                expected: self.dimension(),
                found: direction.len(),
            }
            .into());
        }
        if self.section.reduction() == Reduction::Hyperplane {
            let off_plane = dot(self.section.normal(from), direction);
            let scale = dot(direction, direction).sqrt();
            if off_plane.abs() > self.settings.orthogonality_tolerance * (1.0 + scale) {
                log::warn!(
                    "direction leaves the tangent plane of section {from} (n·dx = {off_plane:e})"
                );
            }
        }

        let to = self.next(from);
        let crossing = self.section.crossing(to);
        let arrival = self
            .flow
            .advance_with_time(state, params, Stop::AtEvent(&crossing))?;
        let z = self.flow.field(&arrival.state, params)?;
        let mut y = self.flow.tangent(state, params, direction, arrival.time)?;

        let normal = self.section.normal(to);
        let transversality = dot(normal, &z);
        if transversality == 0.0 {
            bail!(
                "Vector field is tangent to section {} at the crossing; \
                 the return map is not differentiable there.",
                to
            );
        }
        let ratio = dot(normal, &y) / transversality;
        for (yi, zi) in y.iter_mut().zip(&z) {
            *yi -= ratio * zi;
        }
        Ok(y)
    }

    /// Dense Jacobian of `evaluate`, one `jacobian_apply` per unit direction.
    pub fn jacobian_matrix(&self, x_bar: &[f64], params: &[f64]) -> Result<DMatrix<f64>> {
        let n = self.unknowns();
        let mut jac = DMatrix::<f64>::zeros(n, n);
        let mut direction = vec![0.0; n];
        for j in 0..n {
            direction[j] = 1.0;
            let column = self.jacobian_apply(x_bar, params, &direction)?;
            direction[j] = 0.0;
            jac.set_column(j, &nalgebra::DVector::from_vec(column));
        }
        Ok(jac)
    }
}
