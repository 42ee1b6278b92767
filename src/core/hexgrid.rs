//! Hexagonal lattice underlying a sheet.
//!
//! Sites are stored in a fixed order; every per-unit vector in the crate is
//! index-aligned with it. Distances are Euclidean on the embedded
//! coordinates.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const SQRT3_2: f64 = 0.866_025_403_784_438_6;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HexPos {
    pub x: f64,
    pub y: f64,
}

impl HexPos {
    #[inline]
    pub fn distance(&self, other: &HexPos) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct HexGrid {
    /// Centre-to-centre spacing.
    d: f64,
    positions: Vec<HexPos>,
    neighbours: Vec<Vec<usize>>,
}

impl HexGrid {
    /// Centre site plus `rings` concentric rings (1 ring = 7 sites).
    pub fn hexagon(d: f64, rings: u32) -> Self {
        let n = rings as i64;
        let mut axial = Vec::new();
        for r in -n..=n {
            for g in -n..=n {
                if (r + g).abs() <= n {
                    axial.push((r, g));
                }
            }
        }
        Self::from_axial(d, axial)
    }

    /// Every lattice site whose centre lies within `radius` of the origin.
    pub fn disc(d: f64, radius: f64) -> Self {
        let n = (radius / (d * SQRT3_2)).ceil() as i64 + 1;
        let mut axial = Vec::new();
        for r in -n..=n {
            for g in -n..=n {
                let p = axial_to_pos(d, r, g);
                if (p.x * p.x + p.y * p.y).sqrt() <= radius {
                    axial.push((r, g));
                }
            }
        }
        Self::from_axial(d, axial)
    }

    /// Wrap an externally constructed lattice. Neighbours are the sites at
    /// spacing distance `d` (within 1%).
    pub fn from_positions(d: f64, positions: Vec<HexPos>) -> Self {
        let tol = d * 0.01;
        let neighbours = positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                positions
                    .iter()
                    .enumerate()
                    .filter(|&(j, q)| j != i && (p.distance(q) - d).abs() <= tol)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        Self {
            d,
            positions,
            neighbours,
        }
    }

    fn from_axial(d: f64, mut axial: Vec<(i64, i64)>) -> Self {
        // Row-major from the bottom row up, left to right.
        axial.sort_by(|a, b| a.1.cmp(&b.1).then((2 * a.0 + a.1).cmp(&(2 * b.0 + b.1))));
        let positions = axial.iter().map(|&(r, g)| axial_to_pos(d, r, g)).collect();
        Self::from_positions(d, positions)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn spacing(&self) -> f64 {
        self.d
    }

    pub fn position(&self, i: usize) -> HexPos {
        self.positions[i]
    }

    pub fn positions(&self) -> &[HexPos] {
        &self.positions
    }

    pub fn neighbours(&self, i: usize) -> &[usize] {
        &self.neighbours[i]
    }

    /// Indices of all sites within `radius` of `centre`, in lattice order.
    pub fn within(&self, centre: HexPos, radius: f64) -> Vec<usize> {
        self.positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distance(&centre) <= radius)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn nearest(&self, x: f64, y: f64) -> Option<usize> {
        let q = HexPos { x, y };
        self.positions
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.distance(&q).total_cmp(&b.1.distance(&q)))
            .map(|(i, _)| i)
    }
}

#[inline]
fn axial_to_pos(d: f64, r: i64, g: i64) -> HexPos {
    HexPos {
        x: d * (r as f64 + 0.5 * g as f64),
        y: d * SQRT3_2 * g as f64,
    }
}
