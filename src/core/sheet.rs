//! Activation vectors over a hex lattice, and the stimulus painters that fill them.

use core::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hexgrid::HexGrid;

/// Stable handle for a sheet owned by a `Network`.
///
/// Projections refer to sheets through this handle rather than by reference,
/// so sheets can move without invalidating connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SheetId(pub usize);

/// A named activation vector, one scalar per lattice site.
#[derive(Debug, Clone)]
pub struct Sheet {
    name: String,
    grid: HexGrid,
    pub x: Vec<f64>,
}

impl Sheet {
    pub fn new(name: &str, grid: HexGrid) -> Self {
        let x = vec![0.0; grid.len()];
        Self {
            name: name.to_string(),
            grid,
            x,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> &HexGrid {
        &self.grid
    }

    pub fn nhex(&self) -> usize {
        self.x.len()
    }

    pub fn zero(&mut self) {
        self.x.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Oriented 2-D Gaussian blob centred at (`x0`, `y0`), long axis rotated
    /// by `phi`, widths `sigma_a` (along) and `sigma_b` (across).
    pub fn paint_gaussian(&mut self, x0: f64, y0: f64, phi: f64, sigma_a: f64, sigma_b: f64) {
        let (s, c) = phi.sin_cos();
        let inv_a = 1.0 / (2.0 * sigma_a * sigma_a);
        let inv_b = 1.0 / (2.0 * sigma_b * sigma_b);
        for (v, p) in self.x.iter_mut().zip(self.grid.positions()) {
            let dx = p.x - x0;
            let dy = p.y - y0;
            let u = dx * c + dy * s;
            let w = -dx * s + dy * c;
            *v = (-(u * u * inv_a + w * w * inv_b)).exp();
        }
    }

    /// Sinusoidal grating with stripes running along `theta`.
    ///
    /// Values lie in [0, `amplitude`].
    pub fn paint_grating(&mut self, theta: f64, phase: f64, frequency: f64, amplitude: f64) {
        let (s, c) = theta.sin_cos();
        for (v, p) in self.x.iter_mut().zip(self.grid.positions()) {
            let across = -p.x * s + p.y * c;
            *v = amplitude * 0.5 * (1.0 + (frequency * across + phase).cos());
        }
    }

    /// Copy an externally produced drive vector into the sheet.
    ///
    /// Returns `false` (and leaves the sheet untouched) on a length mismatch.
    pub fn set(&mut self, values: &[f64]) -> bool {
        if values.len() != self.x.len() {
            return false;
        }
        self.x.copy_from_slice(values);
        true
    }
}

/// Orientations presented by the map probe: `n` evenly spaced over [0, π).
pub fn probe_orientations(n: usize) -> impl Iterator<Item = f64> {
    (0..n).map(move |i| i as f64 * PI / n as f64)
}
