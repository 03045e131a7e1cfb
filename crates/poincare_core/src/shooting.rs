pub mod branch;
pub mod floquet;
pub mod jacobian;
pub mod orbit;

pub use floquet::FloquetReport;
pub use orbit::{ExtremumKind, ExtremumOptions};

use crate::error::ShootingError;
use crate::flow::{Flow, FlowPoint, FlowSettings, OdeFlow, Stop};
use crate::section::{HyperplaneCrossing, Section};
use crate::traits::SmoothField;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Settings of a Poincaré shooting problem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShootingSettings {
    /// Finite-difference step of the Jacobian. Zero selects the analytical
    /// (variational) Jacobian.
    pub delta: f64,
    /// Advance the per-section trajectories concurrently.
    pub parallel: bool,
    /// Relative tolerance of the tangent-plane check in the analytical Jacobian.
    pub orthogonality_tolerance: f64,
}

impl Default for ShootingSettings {
    fn default() -> Self {
        Self {
            delta: 0.0,
            parallel: false,
            orthogonality_tolerance: 1e-10,
        }
    }
}

/// Everything needed to build an `OdeFlow` later.
///
/// A config with `tangent` set is the dual-flow variant: the variational solve
/// runs with its own integrator settings.
#[derive(Clone)]
pub struct FlowConfig {
    pub field: Arc<dyn SmoothField>,
    pub settings: FlowSettings,
    pub tangent: Option<FlowSettings>,
}

impl FlowConfig {
    pub fn new(field: Arc<dyn SmoothField>, settings: FlowSettings) -> Self {
        Self {
            field,
            settings,
            tangent: None,
        }
    }

    pub fn with_tangent(mut self, settings: FlowSettings) -> Self {
        self.tangent = Some(settings);
        self
    }

    pub fn is_dual(&self) -> bool {
        self.tangent.is_some()
    }

    pub fn build(&self) -> Result<OdeFlow> {
        let flow = OdeFlow::new(Arc::clone(&self.field), self.settings)?;
        match self.tangent {
            Some(settings) => flow.with_tangent_settings(settings),
            None => Ok(flow),
        }
    }
}

impl fmt::Debug for FlowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowConfig")
            .field("settings", &self.settings)
            .field("tangent", &self.tangent)
            .finish_non_exhaustive()
    }
}

/// The flow a problem was built from: either a configuration the problem
/// builds itself (and can rebuild around new sections), or a flow supplied
/// ready-made by the caller.
#[derive(Clone)]
pub enum FlowHandle {
    Deferred(FlowConfig),
    Constructed(Arc<dyn Flow>),
}

impl FlowHandle {
    pub fn is_deferred(&self) -> bool {
        matches!(self, FlowHandle::Deferred(_))
    }

    fn materialize(&self) -> Result<Arc<dyn Flow>> {
        match self {
            FlowHandle::Deferred(config) => Ok(Arc::new(config.build()?)),
            FlowHandle::Constructed(flow) => Ok(Arc::clone(flow)),
        }
    }
}

impl fmt::Debug for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowHandle::Deferred(config) => f.debug_tuple("Deferred").field(config).finish(),
            FlowHandle::Constructed(_) => f.write_str("Constructed(..)"),
        }
    }
}

/// Periodic orbit search by Poincaré shooting on `M` hyperplane sections.
///
/// Unknowns are the reduced coordinates `x_bar` of the orbit's intersection
/// with each section, stored section after section (`M` blocks of
/// `reduced_dimension()` values). The residual of block `i` is the
/// difference between the lifted point on section `i` and the point where the
/// flow from section `i - 1` (cyclically) first reaches section `i`.
pub struct ShootingProblem {
    handle: FlowHandle,
    flow: Arc<dyn Flow>,
    section: Section,
    settings: ShootingSettings,
}

impl ShootingProblem {
    pub fn new(
        handle: FlowHandle,
        section: Section,
        mut settings: ShootingSettings,
    ) -> Result<Self> {
        if !(settings.delta >= 0.0) || !settings.delta.is_finite() {
            bail!("delta must be finite and non-negative (got {}).", settings.delta);
        }
        if !(settings.orthogonality_tolerance >= 0.0) {
            bail!("orthogonality_tolerance must be non-negative.");
        }
        let flow = handle.materialize()?;
        if flow.dimension() != section.dimension() {
            return Err(ShootingError::Dimension {
                what: "section",
                expected: flow.dimension(),
                found: section.dimension(),
            }
            .into());
        }
        if section.count() == 1 && settings.parallel {
            log::debug!("single section: parallel shooting disabled");
            settings.parallel = false;
        }
        Ok(Self {
            handle,
            flow,
            section,
            settings,
        })
    }

    pub fn handle(&self) -> &FlowHandle {
        &self.handle
    }

    pub fn flow(&self) -> &dyn Flow {
        self.flow.as_ref()
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    pub fn settings(&self) -> &ShootingSettings {
        &self.settings
    }

    pub fn is_parallel(&self) -> bool {
        self.settings.parallel
    }

    /// Number of sections `M`.
    pub fn count(&self) -> usize {
        self.section.count()
    }

    /// Full state dimension `N`.
    pub fn dimension(&self) -> usize {
        self.section.dimension()
    }

    /// Reduced coordinates per section.
    pub fn reduced_dimension(&self) -> usize {
        self.section.reduced_dimension()
    }

    /// Length of `x_bar`.
    pub fn unknowns(&self) -> usize {
        self.count() * self.reduced_dimension()
    }

    /// Swaps in a new section. The section count and dimension must not change.
    pub fn replace_section(&mut self, section: Section) -> Result<()> {
        if section.count() != self.count() {
            return Err(ShootingError::SectionCount {
                expected: self.count(),
                found: section.count(),
            }
            .into());
        }
        if section.dimension() != self.dimension() {
            return Err(ShootingError::Dimension {
                what: "section",
                expected: self.dimension(),
                found: section.dimension(),
            }
            .into());
        }
        self.section = section;
        Ok(())
    }

    fn previous(&self, index: usize) -> usize {
        if index == 0 {
            self.count() - 1
        } else {
            index - 1
        }
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.count()
    }

    fn check_unknowns(&self, what: &'static str, values: &[f64]) -> Result<()> {
        if values.len() != self.unknowns() {
            return Err(ShootingError::Dimension {
                what,
                expected: self.unknowns(),
                found: values.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Embeds every reduced block onto its section (the lifted state matrix).
    pub fn lift(&self, x_bar: &[f64]) -> Result<Vec<Vec<f64>>> {
        self.check_unknowns("reduced orbit", x_bar)?;
        let r = self.reduced_dimension();
        Ok(x_bar
            .chunks(r)
            .enumerate()
            .map(|(i, reduced)| {
                let mut full = vec![0.0; self.dimension()];
                self.section.embed(&mut full, reduced, i);
                full
            })
            .collect())
    }

    fn lift_tangent(&self, dx_bar: &[f64]) -> Result<Vec<Vec<f64>>> {
        self.check_unknowns("reduced direction", dx_bar)?;
        let r = self.reduced_dimension();
        Ok(dx_bar
            .chunks(r)
            .enumerate()
            .map(|(i, reduced)| {
                let mut full = vec![0.0; self.dimension()];
                self.section.embed_tangent(&mut full, reduced, i);
                full
            })
            .collect())
    }

    /// Reduced coordinates of every section center on its own hyperplane.
    pub fn reduced_centers(&self) -> Vec<f64> {
        let r = self.reduced_dimension();
        let mut out = vec![0.0; self.unknowns()];
        for (i, block) in out.chunks_mut(r).enumerate() {
            self.section.restrict(block, self.section.center(i), i);
        }
        out
    }

    fn crossings(&self) -> Vec<HyperplaneCrossing<'_>> {
        (0..self.count()).map(|i| self.section.crossing(i)).collect()
    }

    /// Entry `i` is where the flow from `xc[i - 1]` first reaches section `i`.
    fn arrivals(&self, xc: &[Vec<f64>], params: &[f64]) -> Result<Vec<FlowPoint>> {
        let crossings = self.crossings();
        if self.settings.parallel {
            let starts: Vec<Vec<f64>> = (0..self.count())
                .map(|i| xc[self.previous(i)].clone())
                .collect();
            let stops: Vec<Stop<'_>> = crossings.iter().map(|c| Stop::AtEvent(c)).collect();
            return self.flow.advance_batch(&starts, params, &stops);
        }
        crossings
            .iter()
            .enumerate()
            .map(|(i, crossing)| {
                self.flow
                    .advance_with_time(&xc[self.previous(i)], params, Stop::AtEvent(crossing))
            })
            .collect()
    }

    /// Residual of the shooting functional at `x_bar`; zero on a periodic orbit.
    pub fn evaluate(&self, x_bar: &[f64], params: &[f64]) -> Result<Vec<f64>> {
        let xc = self.lift(x_bar)?;
        let arrivals = self.arrivals(&xc, params)?;
        let r = self.reduced_dimension();
        let mut out = vec![0.0; self.unknowns()];
        let mut residual = vec![0.0; self.dimension()];
        for (i, (block, arrival)) in out.chunks_mut(r).zip(&arrivals).enumerate() {
            for ((dst, lifted), reached) in residual.iter_mut().zip(&xc[i]).zip(&arrival.state) {
                *dst = lifted - reached;
            }
            self.section.restrict_tangent(block, &residual, i);
        }
        Ok(out)
    }
}
