use super::ShootingProblem;
use crate::flow::{Stop, Trajectory};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtremumKind {
    Maximum,
    Minimum,
}

impl ExtremumKind {
    fn identity(self) -> f64 {
        match self {
            ExtremumKind::Maximum => f64::NEG_INFINITY,
            ExtremumKind::Minimum => f64::INFINITY,
        }
    }

    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            ExtremumKind::Maximum => a.max(b),
            ExtremumKind::Minimum => a.min(b),
        }
    }
}

/// Which extremum of the orbit to report, over the first `components` state
/// variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtremumOptions {
    pub components: usize,
    pub kind: ExtremumKind,
}

impl Default for ExtremumOptions {
    fn default() -> Self {
        Self {
            components: 1,
            kind: ExtremumKind::Maximum,
        }
    }
}

fn reduce<F>(trajectory: &Trajectory, components: usize, init: f64, combine: &F) -> f64
where
    F: Fn(f64, f64) -> f64,
{
    trajectory
        .states
        .iter()
        .flat_map(|state| state[..components].iter().copied())
        .fold(init, |acc, v| combine(acc, v))
}

impl ShootingProblem {
    /// Total return time: the sum over all sections of the time from one
    /// section to the next.
    pub fn period(&self, x_bar: &[f64], params: &[f64]) -> Result<f64> {
        let xc = self.lift(x_bar)?;
        let arrivals = self.arrivals(&xc, params)?;
        Ok(arrivals.iter().map(|arrival| arrival.time).sum())
    }

    /// One full revolution of the orbit through `x_bar`.
    ///
    /// In sequential mode this is a single fixed-horizon integration from the
    /// first section over `period`. In parallel mode the per-section legs are
    /// integrated concurrently and concatenated in section order.
    pub fn trajectory(&self, x_bar: &[f64], params: &[f64]) -> Result<Trajectory> {
        if self.count() == 1 || !self.settings.parallel {
            let period = self.period(x_bar, params)?;
            let xc = self.lift(x_bar)?;
            return self.flow.trajectory(&xc[0], params, Stop::After(period));
        }
        let xc = self.lift(x_bar)?;
        let mut legs = self.legs(&xc, params)?.into_iter();
        let mut whole = legs.next().unwrap_or_default();
        for leg in legs {
            whole.append(leg);
        }
        Ok(whole)
    }

    /// Leg `i` runs from `xc[i]` until the first crossing of section `i + 1`.
    fn legs(&self, xc: &[Vec<f64>], params: &[f64]) -> Result<Vec<Trajectory>> {
        let crossings: Vec<_> = (0..self.count())
            .map(|i| self.section.crossing(self.next(i)))
            .collect();
        if self.settings.parallel {
            let stops: Vec<Stop<'_>> = crossings.iter().map(|c| Stop::AtEvent(c)).collect();
            return self.flow.trajectory_batch(xc, params, &stops);
        }
        xc.iter()
            .zip(&crossings)
            .map(|(start, crossing)| self.flow.trajectory(start, params, Stop::AtEvent(crossing)))
            .collect()
    }

    pub fn extremum(
        &self,
        x_bar: &[f64],
        params: &[f64],
        options: &ExtremumOptions,
    ) -> Result<f64> {
        let kind = options.kind;
        self.extremum_by(x_bar, params, options.components, kind.identity(), move |a, b| {
            kind.combine(a, b)
        })
    }

    /// Folds `combine` over the first `components` variables of every state
    /// along the orbit. With several sections each leg is folded on its own
    /// and the partial results combined.
    pub fn extremum_by<F>(
        &self,
        x_bar: &[f64],
        params: &[f64],
        components: usize,
        init: f64,
        combine: F,
    ) -> Result<f64>
    where
        F: Fn(f64, f64) -> f64,
    {
        if components == 0 || components > self.dimension() {
            bail!(
                "components must be in 1..={} (got {}).",
                self.dimension(),
                components
            );
        }
        if self.count() == 1 {
            let trajectory = self.trajectory(x_bar, params)?;
            return Ok(reduce(&trajectory, components, init, &combine));
        }
        let xc = self.lift(x_bar)?;
        let legs = self.legs(&xc, params)?;
        Ok(legs
            .iter()
            .map(|leg| reduce(leg, components, init, &combine))
            .fold(init, |acc, v| combine(acc, v)))
    }

    /// Moves the sections to `centers_bar` (reduced coordinates on the current
    /// sections) with normals along the vector field there, and returns the
    /// guess that corresponds to the same points on the new sections.
    pub fn update_section(&mut self, centers_bar: &[f64], params: &[f64]) -> Result<Vec<f64>> {
        let centers = self.lift(centers_bar)?;
        let normals = centers
            .iter()
            .map(|center| self.flow.field(center, params))
            .collect::<Result<Vec<_>>>()?;
        let mut section = self.section.clone();
        section.update(normals, centers)?;
        self.replace_section(section)?;
        log::debug!("moved {} sections onto the current orbit guess", self.count());
        Ok(self.reduced_centers())
    }
}
