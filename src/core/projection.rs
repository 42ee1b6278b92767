//! Radius-limited, weighted connection sets between two sheets.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::hexgrid::HexGrid;
use crate::prng::Prng;
use crate::sheet::SheetId;

/// Construction parameters for one projection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProjectionSpec {
    pub radius: f64,
    pub strength: f64,
    /// Learning rate; 0 disables learning.
    pub alpha: f64,
    /// Width of the initial Gaussian weight profile.
    pub sigma: f64,
    /// Fraction of each initial weight replaced by uniform noise (0..=1).
    pub jitter: f64,
    /// Scale each field to unit sum at construction.
    pub normalize: bool,
}

impl ProjectionSpec {
    pub fn new(radius: f64, strength: f64, alpha: f64, sigma: f64) -> Self {
        Self {
            radius,
            strength,
            alpha,
            sigma,
            jitter: 0.0,
            normalize: true,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

/// CSR (Compressed Sparse Row) field storage.
///
/// Target unit `i` owns entries `offsets[i]..offsets[i+1]` of `sources` and
/// `weights`. Membership is fixed at construction; only weights change.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CsrFields {
    pub sources: Vec<usize>,
    pub weights: Vec<f64>,
    pub offsets: Vec<usize>,
}

impl CsrFields {
    #[inline]
    fn range(&self, i: usize) -> core::ops::Range<usize> {
        self.offsets[i]..self.offsets[i + 1]
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    source: SheetId,
    target: SheetId,
    source_len: usize,

    radius: f64,
    strength: f64,
    alpha: f64,
    sigma: f64,

    // Normalization group, assigned by the owning network.
    group: Option<usize>,

    fields: CsrFields,
}

impl Projection {
    /// Wire every target site to the source sites within `spec.radius` of
    /// its position. The two grids are taken to share one coordinate frame.
    pub fn new(
        spec: &ProjectionSpec,
        source: SheetId,
        source_grid: &HexGrid,
        target: SheetId,
        target_grid: &HexGrid,
        rng: &mut Prng,
    ) -> Self {
        let n = target_grid.len();
        let mut sources = Vec::new();
        let mut weights = Vec::new();
        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0);

        for i in 0..n {
            let centre = target_grid.position(i);
            let start = weights.len();
            for j in source_grid.within(centre, spec.radius) {
                let d = source_grid.position(j).distance(&centre);
                let mut w = gaussian_profile(d, spec.sigma);
                if spec.jitter > 0.0 {
                    w *= (1.0 - spec.jitter) + spec.jitter * rng.next_f64_01();
                }
                sources.push(j);
                weights.push(w);
            }
            if spec.normalize {
                let sum: f64 = weights[start..].iter().sum();
                if sum > 0.0 {
                    weights[start..].iter_mut().for_each(|w| *w /= sum);
                }
            }
            offsets.push(weights.len());
        }

        Self {
            source,
            target,
            source_len: source_grid.len(),
            radius: spec.radius,
            strength: spec.strength,
            alpha: spec.alpha,
            sigma: spec.sigma,
            group: None,
            fields: CsrFields {
                sources,
                weights,
                offsets,
            },
        }
    }

    pub fn source(&self) -> SheetId {
        self.source
    }

    pub fn target(&self) -> SheetId {
        self.target
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn group(&self) -> Option<usize> {
        self.group
    }

    pub(crate) fn set_group(&mut self, group: Option<usize>) {
        self.group = group;
    }

    pub fn target_count(&self) -> usize {
        self.fields.offsets.len() - 1
    }

    /// Total number of field entries across all target units.
    pub fn connection_count(&self) -> usize {
        self.fields.weights.len()
    }

    /// One target unit's field as parallel (source index, weight) slices.
    pub fn field(&self, i: usize) -> (&[usize], &[f64]) {
        let r = self.fields.range(i);
        (&self.fields.sources[r.clone()], &self.fields.weights[r])
    }

    /// `strength * Σ w_k * source[k]` over unit `i`'s field.
    #[inline]
    pub fn activate(&self, i: usize, source_x: &[f64]) -> f64 {
        let mut acc = 0.0;
        for idx in self.fields.range(i) {
            acc += self.fields.weights[idx] * source_x[self.fields.sources[idx]];
        }
        self.strength * acc
    }

    /// Hebbian update `w += alpha * pre * post`. Must be fed settled activations.
    pub fn learn(&mut self, source_x: &[f64], target_x: &[f64]) {
        if self.alpha == 0.0 {
            return;
        }
        for (i, &post) in target_x.iter().enumerate().take(self.target_count()) {
            if post == 0.0 {
                continue;
            }
            let gain = self.alpha * post;
            for idx in self.fields.range(i) {
                self.fields.weights[idx] += gain * source_x[self.fields.sources[idx]];
            }
        }
    }

    pub fn weight_sum(&self, i: usize) -> f64 {
        self.fields.weights[self.fields.range(i)].iter().sum()
    }

    /// Divide unit `i`'s weights by `group_sum`. A zero sum leaves the field
    /// untouched and returns `false`.
    pub fn renormalize(&mut self, i: usize, group_sum: f64) -> bool {
        if group_sum == 0.0 {
            return false;
        }
        let r = self.fields.range(i);
        self.fields.weights[r].iter_mut().for_each(|w| *w /= group_sum);
        true
    }

    /// All weights, target-unit ascending then field order.
    pub fn weights(&self) -> &[f64] {
        &self.fields.weights
    }

    pub fn set_weights(&mut self, flat: &[f64]) -> Result<(), PersistenceError> {
        if flat.len() != self.fields.weights.len() {
            return Err(PersistenceError::FieldSize {
                stored: flat.len(),
                expected: self.fields.weights.len(),
            });
        }
        self.fields.weights.copy_from_slice(flat);
        Ok(())
    }

    /// Unit `i`'s weights laid out over the whole source grid (zero elsewhere).
    pub fn weight_plot(&self, i: usize) -> Vec<f64> {
        let mut out = vec![0.0; self.source_len];
        let (src, w) = self.field(i);
        for (&s, &w) in src.iter().zip(w) {
            out[s] = w;
        }
        out
    }
}

#[inline]
fn gaussian_profile(d: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 1.0;
    }
    (-(d * d) / (2.0 * sigma * sigma)).exp()
}
