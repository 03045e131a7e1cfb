use super::{FlowConfig, FlowHandle, ShootingProblem};
use crate::error::ShootingError;
use crate::section::Section;
use crate::traits::{DynamicalSystem, SmoothField};
use anyhow::{bail, Result};
use std::sync::Arc;

/// Event searches on the new branch are bounded by this multiple of the
/// period estimate.
const RETURN_TIME_FACTOR: f64 = 4.0;

impl ShootingProblem {
    /// Builds a shooting problem for a new orbit branch, e.g. the
    /// period-doubled cycle emanating from a flip point.
    ///
    /// `centers` are points on the new orbit (one per section). Each gets a
    /// hyperplane normal to `field` there. The flow is rebuilt from this
    /// problem's deferred configuration with `field` swapped in, so a
    /// problem created from a constructed flow cannot switch branches.
    ///
    /// Returns the new problem and its initial guess (the reduced centers).
    pub fn switch_branch(
        &self,
        field: Arc<dyn SmoothField>,
        params: &[f64],
        centers: Vec<Vec<f64>>,
        period_estimate: f64,
    ) -> Result<(ShootingProblem, Vec<f64>)> {
        let config = match &self.handle {
            FlowHandle::Deferred(config) => config,
            FlowHandle::Constructed(_) => return Err(ShootingError::FlowFinalized.into()),
        };
        if !(period_estimate > 0.0) || !period_estimate.is_finite() {
            bail!("period_estimate must be positive and finite (got {}).", period_estimate);
        }
        if centers.is_empty() {
            bail!("Branch switching needs at least one section center.");
        }

        let dimension = DynamicalSystem::<f64>::dimension(field.as_ref());
        let mut normals = Vec::with_capacity(centers.len());
        for center in &centers {
            if center.len() != dimension {
                return Err(ShootingError::Dimension {
                    what: "section center",
                    expected: dimension,
                    found: center.len(),
                }
                .into());
            }
            let mut normal = vec![0.0; dimension];
            DynamicalSystem::<f64>::apply(field.as_ref(), 0.0, center, params, &mut normal);
            normals.push(normal);
        }
        let section = Section::new(normals, centers, self.section.reduction())?;

        let mut settings = config.settings;
        settings.max_time = RETURN_TIME_FACTOR * period_estimate;
        let config = FlowConfig {
            field,
            settings,
            tangent: config.tangent,
        };
        let problem = ShootingProblem::new(FlowHandle::Deferred(config), section, self.settings)?;
        let guess = problem.reduced_centers();
        log::info!(
            "switched branch: {} sections, period estimate {:.6}",
            problem.count(),
            period_estimate
        );
        Ok((problem, guess))
    }
}
