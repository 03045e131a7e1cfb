//! Hyperplane sections and their local charts.
//!
//! Section `i` is the hyperplane `{x : dot(n_i, x - c_i) = 0}` with unit normal
//! `n_i` and center `c_i`. In `Reduction::Hyperplane` mode a point on the
//! hyperplane is described by `N - 1` local coordinates: the components of
//! `x - c_i` with the pivot component (largest `|n_i[k]|`) removed. The pivot
//! component is recovered from the hyperplane equation on embedding, so
//! `restrict(embed(x_bar)) == x_bar` and `restrict(c_i) == 0`.
//!
//! Displacements (residuals, tangent vectors) go through the linear parts
//! `embed_tangent` / `restrict_tangent`, which omit the center.

use crate::error::ShootingError;
use crate::flow::{EventFunction, Flow};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// How a section maps full states to local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reduction {
    /// Each hyperplane removes one dimension.
    #[default]
    Hyperplane,
    /// Local coordinates are the full state (no reduction).
    Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    normals: Vec<Vec<f64>>,
    centers: Vec<Vec<f64>>,
    /// Component dropped by the chart of each hyperplane.
    pivots: Vec<usize>,
    reduction: Reduction,
}

/// Signed distance to one hyperplane, as an event indicator.
#[derive(Debug, Clone, Copy)]
pub struct HyperplaneCrossing<'a> {
    normal: &'a [f64],
    center: &'a [f64],
}

impl EventFunction for HyperplaneCrossing<'_> {
    fn value(&self, state: &[f64]) -> f64 {
        signed_distance(self.normal, self.center, state)
    }
}

fn signed_distance(normal: &[f64], center: &[f64], state: &[f64]) -> f64 {
    normal
        .iter()
        .zip(center)
        .zip(state)
        .map(|((n, c), x)| n * (x - c))
        .sum()
}

fn unit(vector: &[f64]) -> Result<Vec<f64>> {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        bail!("Section normal must be non-zero and finite (norm = {}).", norm);
    }
    Ok(vector.iter().map(|v| v / norm).collect())
}

fn pivot_of(normal: &[f64]) -> usize {
    let mut best = 0;
    for (j, value) in normal.iter().enumerate() {
        if value.abs() > normal[best].abs() {
            best = j;
        }
    }
    best
}

impl Section {
    /// Builds a section from explicit normals and centers. Normals are scaled to
    /// unit length.
    pub fn new(
        normals: Vec<Vec<f64>>,
        centers: Vec<Vec<f64>>,
        reduction: Reduction,
    ) -> Result<Self> {
        let mut section = Self {
            normals: Vec::new(),
            centers: Vec::new(),
            pivots: Vec::new(),
            reduction,
        };
        section.replace(normals, centers)?;
        Ok(section)
    }

    /// Builds a section whose normals are the normalized vector field at each center.
    pub fn from_field(
        flow: &dyn Flow,
        params: &[f64],
        centers: Vec<Vec<f64>>,
        reduction: Reduction,
    ) -> Result<Self> {
        let normals = centers
            .iter()
            .map(|center| flow.field(center, params))
            .collect::<Result<Vec<_>>>()?;
        Self::new(normals, centers, reduction)
    }

    /// Replaces normals and centers wholesale. The section count may change
    /// here; `ShootingProblem` guards against that where it matters.
    pub fn update(&mut self, normals: Vec<Vec<f64>>, centers: Vec<Vec<f64>>) -> Result<()> {
        self.replace(normals, centers)
    }

    fn replace(&mut self, normals: Vec<Vec<f64>>, centers: Vec<Vec<f64>>) -> Result<()> {
        if normals.is_empty() {
            bail!("A section needs at least one hyperplane.");
        }
        if centers.len() != normals.len() {
            return Err(ShootingError::SectionCount {
                expected: normals.len(),
                found: centers.len(),
            }
            .into());
        }
        let dim = normals[0].len();
        for (normal, center) in normals.iter().zip(&centers) {
            for (what, vector) in [("section normal", normal), ("section center", center)] {
                if vector.len() != dim {
                    return Err(ShootingError::Dimension {
                        what,
                        expected: dim,
                        found: vector.len(),
                    }
                    .into());
                }
            }
        }
        if self.reduction == Reduction::Hyperplane && dim < 2 {
            bail!("Hyperplane reduction needs a state dimension of at least 2 (got {}).", dim);
        }

        let normals = normals
            .iter()
            .map(|normal| unit(normal))
            .collect::<Result<Vec<_>>>()?;
        self.pivots = normals.iter().map(|normal| pivot_of(normal)).collect();
        self.normals = normals;
        self.centers = centers;
        Ok(())
    }

    /// Number of hyperplanes `M`.
    pub fn count(&self) -> usize {
        self.normals.len()
    }

    /// Full state dimension `N`.
    pub fn dimension(&self) -> usize {
        self.normals[0].len()
    }

    /// Local coordinate count per hyperplane.
    pub fn reduced_dimension(&self) -> usize {
        match self.reduction {
            Reduction::Hyperplane => self.dimension() - 1,
            Reduction::Identity => self.dimension(),
        }
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    pub fn normals(&self) -> &[Vec<f64>] {
        &self.normals
    }

    pub fn centers(&self) -> &[Vec<f64>] {
        &self.centers
    }

    pub fn normal(&self, index: usize) -> &[f64] {
        &self.normals[index]
    }

    pub fn center(&self, index: usize) -> &[f64] {
        &self.centers[index]
    }

    /// `dot(n_i, state - c_i)`.
    pub fn indicator(&self, index: usize, state: &[f64]) -> f64 {
        signed_distance(&self.normals[index], &self.centers[index], state)
    }

    /// Event that fires when a trajectory crosses hyperplane `index` in the
    /// direction of its normal.
    pub fn crossing(&self, index: usize) -> HyperplaneCrossing<'_> {
        HyperplaneCrossing {
            normal: &self.normals[index],
            center: &self.centers[index],
        }
    }

    /// Writes the full-state point on hyperplane `index` with local coordinates `reduced`.
    pub fn embed(&self, out: &mut [f64], reduced: &[f64], index: usize) {
        self.embed_tangent(out, reduced, index);
        if self.reduction == Reduction::Hyperplane {
            for (dst, c) in out.iter_mut().zip(&self.centers[index]) {
                *dst += c;
            }
        }
    }

    /// Local coordinates of `full` on hyperplane `index`.
    pub fn restrict(&self, out: &mut [f64], full: &[f64], index: usize) {
        match self.reduction {
            Reduction::Hyperplane => {
                let center = &self.centers[index];
                let shifted: Vec<f64> = full.iter().zip(center).map(|(x, c)| x - c).collect();
                self.restrict_tangent(out, &shifted, index);
            }
            Reduction::Identity => out.copy_from_slice(full),
        }
    }

    /// Differential of `embed`: lifts a local displacement into the tangent
    /// space of hyperplane `index`.
    pub fn embed_tangent(&self, out: &mut [f64], reduced: &[f64], index: usize) {
        debug_assert_eq!(out.len(), self.dimension());
        debug_assert_eq!(reduced.len(), self.reduced_dimension());
        match self.reduction {
            Reduction::Hyperplane => {
                let normal = &self.normals[index];
                let pivot = self.pivots[index];
                let mut dot = 0.0;
                let mut local = reduced.iter();
                for (j, dst) in out.iter_mut().enumerate() {
                    if j == pivot {
                        continue;
                    }
                    let value = local.next().copied().unwrap_or(0.0);
                    *dst = value;
                    dot += normal[j] * value;
                }
                out[pivot] = -dot / normal[pivot];
            }
            Reduction::Identity => out.copy_from_slice(reduced),
        }
    }

    /// Differential of `restrict`.
    pub fn restrict_tangent(&self, out: &mut [f64], full: &[f64], index: usize) {
        debug_assert_eq!(full.len(), self.dimension());
        debug_assert_eq!(out.len(), self.reduced_dimension());
        match self.reduction {
            Reduction::Hyperplane => {
                let pivot = self.pivots[index];
                let kept = full
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != pivot)
                    .map(|(_, value)| *value);
                for (dst, value) in out.iter_mut().zip(kept) {
                    *dst = value;
                }
            }
            Reduction::Identity => out.copy_from_slice(full),
        }
    }
}
