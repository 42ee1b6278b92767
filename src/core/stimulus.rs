//! Input-drive providers.
//!
//! The network only asks for "the next input vector"; how it is produced is
//! one of a closed set of [`InputSource`] variants. Frame-based variants
//! resample a Cartesian pixel frame onto the input lattice through a
//! [`CartesianSampler`].

use core::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::StimulusError;
use crate::hexgrid::HexGrid;
use crate::prng::Prng;
use crate::sheet::Sheet;
use crate::store::ArrayStore;

pub const PATTERNS_KEY: &str = "patterns";

/// Oriented Gaussian blob placement and shape.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlobParams {
    pub x_range: f64,
    pub y_range: f64,
    pub sigma_a: f64,
    pub sigma_b: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SamplerParams {
    pub cols: usize,
    pub rows: usize,
    /// Pixel pitch in lattice units.
    pub dx: f64,
    /// Gaussian sampling width in lattice units.
    pub sigma: f64,
}

/// Input-type selector of the driver surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InputKind {
    SyntheticBlob,
    Preloaded,
    Live,
    RandomFallback,
}

impl InputKind {
    /// 0 synthetic, 1 pre-loaded, 2 live; anything else falls back to random.
    pub fn from_selector(sel: u32) -> Self {
        match sel {
            0 => InputKind::SyntheticBlob,
            1 => InputKind::Preloaded,
            2 => InputKind::Live,
            _ => InputKind::RandomFallback,
        }
    }
}

/// A producer of row-major Cartesian frames (e.g. a camera).
pub trait FrameSource {
    fn dims(&self) -> (usize, usize);
    fn next_frame(&mut self, out: &mut [f64]) -> Result<(), StimulusError>;
}

/// Precomputed Gaussian resampling from a `cols x rows` frame onto a lattice.
///
/// Pixel (c, r) sits at `((c - (cols-1)/2) * dx, ((rows-1)/2 - r) * dx)`, so
/// the frame is centred on the lattice origin with row 0 at the top.
#[derive(Debug, Clone)]
pub struct CartesianSampler {
    cols: usize,
    rows: usize,
    pixels: Vec<usize>,
    weights: Vec<f64>,
    offsets: Vec<usize>,
}

impl CartesianSampler {
    pub fn new(grid: &HexGrid, p: &SamplerParams) -> Self {
        let (cols, rows, dx) = (p.cols, p.rows, p.dx);
        let cx = (cols as f64 - 1.0) * 0.5;
        let cy = (rows as f64 - 1.0) * 0.5;
        let mut pixels = Vec::new();
        let mut weights = Vec::new();
        let mut offsets = Vec::with_capacity(grid.len() + 1);
        offsets.push(0);

        for h in grid.positions() {
            let start = weights.len();
            // fractional pixel coordinates of the site
            let fc = h.x / dx + cx;
            let fr = cy - h.y / dx;
            if p.sigma <= 0.0 {
                let (c, r) = (fc.round(), fr.round());
                if c >= 0.0 && r >= 0.0 && (c as usize) < cols && (r as usize) < rows {
                    pixels.push(r as usize * cols + c as usize);
                    weights.push(1.0);
                }
            } else {
                let reach = 3.0 * p.sigma / dx;
                let c0 = (fc - reach).floor().max(0.0) as usize;
                let r0 = (fr - reach).floor().max(0.0) as usize;
                let c1 = ((fc + reach).ceil().max(-1.0) + 1.0).min(cols as f64) as usize;
                let r1 = ((fr + reach).ceil().max(-1.0) + 1.0).min(rows as f64) as usize;
                let inv = 1.0 / (2.0 * p.sigma * p.sigma);
                for r in r0..r1 {
                    for c in c0..c1 {
                        let px = (c as f64 - cx) * dx - h.x;
                        let py = (cy - r as f64) * dx - h.y;
                        let d2 = px * px + py * py;
                        if d2 <= 9.0 * p.sigma * p.sigma {
                            pixels.push(r * cols + c);
                            weights.push((-d2 * inv).exp());
                        }
                    }
                }
                let sum: f64 = weights[start..].iter().sum();
                if sum > 0.0 {
                    weights[start..].iter_mut().for_each(|w| *w /= sum);
                }
            }
            offsets.push(weights.len());
        }

        Self {
            cols,
            rows,
            pixels,
            weights,
            offsets,
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn frame_len(&self) -> usize {
        self.cols * self.rows
    }

    /// Resample `frame` into `out`; sites outside the frame read 0.
    pub fn sample(&self, frame: &[f64], out: &mut [f64]) -> Result<(), StimulusError> {
        if frame.len() != self.frame_len() {
            return Err(StimulusError::FrameSize {
                expected: self.frame_len(),
                actual: frame.len(),
            });
        }
        for (i, o) in out.iter_mut().enumerate().take(self.offsets.len() - 1) {
            let mut acc = 0.0;
            for idx in self.offsets[i]..self.offsets[i + 1] {
                acc += self.weights[idx] * frame[self.pixels[idx]];
            }
            *o = acc;
        }
        Ok(())
    }
}

pub enum InputSource {
    SyntheticBlob {
        params: BlobParams,
        rng: Prng,
    },
    Preloaded {
        sampler: CartesianSampler,
        patterns: Vec<f64>,
        cursor: usize,
    },
    Live {
        sampler: CartesianSampler,
        frames: Box<dyn FrameSource>,
        frame: Vec<f64>,
    },
    RandomFallback {
        sampler: CartesianSampler,
        frame: Vec<f64>,
        rng: Prng,
    },
}

impl InputSource {
    pub fn synthetic(params: BlobParams, rng: Prng) -> Self {
        InputSource::SyntheticBlob { params, rng }
    }

    /// Frames stored back-to-back under [`PATTERNS_KEY`], presented in order
    /// and cycled.
    pub fn preloaded<S: ArrayStore + ?Sized>(
        sampler: CartesianSampler,
        store: &S,
    ) -> Result<Self, StimulusError> {
        let patterns = store.get_f64s(PATTERNS_KEY)?.to_vec();
        let len = sampler.frame_len();
        if patterns.is_empty() || len == 0 {
            return Err(StimulusError::NoPatterns);
        }
        if patterns.len() % len != 0 {
            return Err(StimulusError::FrameSize {
                expected: len * (patterns.len() / len + 1),
                actual: patterns.len(),
            });
        }
        tracing::info!(count = patterns.len() / len, "pre-loaded patterns");
        Ok(InputSource::Preloaded {
            sampler,
            patterns,
            cursor: 0,
        })
    }

    pub fn live(sampler: CartesianSampler, frames: Box<dyn FrameSource>) -> Result<Self, StimulusError> {
        if frames.dims() != sampler.dims() {
            let (c, r) = frames.dims();
            return Err(StimulusError::FrameSize {
                expected: sampler.frame_len(),
                actual: c * r,
            });
        }
        let frame = vec![0.0; sampler.frame_len()];
        Ok(InputSource::Live {
            sampler,
            frames,
            frame,
        })
    }

    pub fn random(sampler: CartesianSampler, rng: Prng) -> Self {
        let frame = vec![0.0; sampler.frame_len()];
        InputSource::RandomFallback {
            sampler,
            frame,
            rng,
        }
    }

    pub fn kind(&self) -> InputKind {
        match self {
            InputSource::SyntheticBlob { .. } => InputKind::SyntheticBlob,
            InputSource::Preloaded { .. } => InputKind::Preloaded,
            InputSource::Live { .. } => InputKind::Live,
            InputSource::RandomFallback { .. } => InputKind::RandomFallback,
        }
    }

    /// Write the next drive vector into `sheet`.
    pub fn next_into(&mut self, sheet: &mut Sheet) -> Result<(), StimulusError> {
        match self {
            InputSource::SyntheticBlob { params, rng } => {
                let x = rng.gen_range_f64(-0.5 * params.x_range, 0.5 * params.x_range);
                let y = rng.gen_range_f64(-0.5 * params.y_range, 0.5 * params.y_range);
                let phi = rng.gen_range_f64(0.0, PI);
                sheet.paint_gaussian(x, y, phi, params.sigma_a, params.sigma_b);
                Ok(())
            }
            InputSource::Preloaded {
                sampler,
                patterns,
                cursor,
            } => {
                let len = sampler.frame_len();
                let count = patterns.len() / len;
                let frame = &patterns[*cursor * len..(*cursor + 1) * len];
                *cursor = (*cursor + 1) % count;
                sampler.sample(frame, &mut sheet.x)
            }
            InputSource::Live {
                sampler,
                frames,
                frame,
            } => {
                frames.next_frame(frame)?;
                sampler.sample(frame, &mut sheet.x)
            }
            InputSource::RandomFallback {
                sampler,
                frame,
                rng,
            } => {
                frame.iter_mut().for_each(|v| *v = rng.next_f64_01());
                sampler.sample(frame, &mut sheet.x)
            }
        }
    }
}
