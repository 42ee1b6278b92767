//! Input sheet → cortical sheet network and its settle/learn cycle.
//!
//! One call to [`Network::step_cortex`] runs:
//! zero → settle × N → learn → normalize → homeostasis → `time += 1`.
//! [`Network::map`] is a read-only probe of the afferent pathway.

use core::f64::consts::PI;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use tracing::{debug, info};

use crate::config::Params;
use crate::error::{ConfigError, PersistenceError, StimulusError};
use crate::hexgrid::HexGrid;
use crate::prng::Prng;
use crate::projection::{Projection, ProjectionSpec};
use crate::sheet::{probe_orientations, Sheet, SheetId};
use crate::stimulus::InputSource;
use crate::store::ArrayStore;

pub const INPUT: SheetId = SheetId(0);
pub const CORTEX: SheetId = SheetId(1);

/// Index of each projection in a network built by [`Network::gcal`].
pub const AFFERENT_EXCIT: usize = 0;
pub const AFFERENT_INHIB: usize = 1;
pub const LATERAL_EXCIT: usize = 2;
pub const LATERAL_INHIB: usize = 3;

pub const TIME_KEY: &str = "time";

// Loaded group sums closer than this to 1 are kept bit-for-bit.
const LOAD_SUM_TOLERANCE: f64 = 1e-9;

/// Store key of projection `k`'s weight array.
pub fn projection_key(k: usize) -> String {
    format!("proj_{k}")
}

fn parse_projection_key(key: &str) -> Option<usize> {
    key.strip_prefix("proj_")?.parse().ok()
}

/// Execution tier for settling.
///
/// - `Scalar`: single-threaded (default, works everywhere)
/// - `Parallel`: per-unit sums of a sub-step computed via rayon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    #[default]
    Scalar,
    /// Requires the `parallel` feature; falls back to `Scalar` otherwise.
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HomeostasisParams {
    pub enabled: bool,
    /// Decay of the running activity average.
    pub beta: f64,
    /// Threshold adaptation rate.
    pub lambda: f64,
    /// Target average activity.
    pub mu: f64,
    pub theta_init: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CortexParams {
    /// Relaxation sub-steps per cycle (at least 1).
    pub settle: u32,
    pub homeostasis: HomeostasisParams,
}

/// Grating probe used by [`Network::map`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapProbe {
    pub orientations: usize,
    pub phases: usize,
    pub frequency: f64,
    pub amplitude: f64,
}

impl Default for MapProbe {
    fn default() -> Self {
        Self {
            orientations: 20,
            phases: 8,
            frequency: 30.0,
            amplitude: 1.0,
        }
    }
}

pub struct Network {
    cfg: CortexParams,
    probe: MapProbe,
    tier: ExecutionTier,

    sheets: Vec<Sheet>,
    projections: Vec<Projection>,
    // Projection indices sharing one divisive normalization.
    groups: Vec<Vec<usize>>,

    time: u32,
    theta: Vec<f64>,
    avg_activity: Vec<f64>,

    // Last map() result.
    pref: Vec<f64>,
    sel: Vec<f64>,

    scratch: Vec<f64>,
    degenerate_last_cycle: usize,
}

impl Network {
    /// Two sheets, no projections yet.
    pub fn new(cfg: CortexParams, input_grid: HexGrid, cortex_grid: HexGrid) -> Result<Self, ConfigError> {
        if cfg.settle == 0 {
            return Err(ConfigError::Invalid("settle must be at least 1".into()));
        }
        let n = cortex_grid.len();
        let homeo = cfg.homeostasis;
        Ok(Self {
            cfg,
            probe: MapProbe::default(),
            tier: ExecutionTier::default(),
            sheets: vec![Sheet::new("IN", input_grid), Sheet::new("CX", cortex_grid)],
            projections: Vec::new(),
            groups: Vec::new(),
            time: 0,
            theta: vec![homeo.theta_init; n],
            avg_activity: vec![homeo.mu; n],
            pref: vec![0.0; n],
            sel: vec![0.0; n],
            scratch: vec![0.0; n],
            degenerate_last_cycle: 0,
        })
    }

    /// The four-projection GCAL topology: afferent excitatory/inhibitory
    /// (jointly normalized), lateral excitatory, lateral inhibitory.
    pub fn gcal(
        params: &Params,
        input_grid: HexGrid,
        cortex_grid: HexGrid,
        rng: &mut Prng,
    ) -> Result<Self, ConfigError> {
        let mut net = Self::new(params.cortex, input_grid, cortex_grid)?;
        net.set_probe(params.probe)?;
        net.add_projection(INPUT, &params.afferent, rng)?;
        net.add_projection(INPUT, &params.afferent_inhib, rng)?;
        net.add_projection(CORTEX, &params.lateral_excit, rng)?;
        net.add_projection(CORTEX, &params.lateral_inhib, rng)?;
        net.set_normalize(&[AFFERENT_EXCIT, AFFERENT_INHIB])?;
        net.set_normalize(&[LATERAL_EXCIT])?;
        net.set_normalize(&[LATERAL_INHIB])?;
        net.renormalize();
        info!(
            input_units = net.input().nhex(),
            cortex_units = net.cortex().nhex(),
            connections = net.projections.iter().map(|p| p.connection_count()).sum::<usize>(),
            "GCAL network wired"
        );
        Ok(net)
    }

    /// Add a projection from `source` onto the cortical sheet. Returns its index.
    pub fn add_projection(
        &mut self,
        source: SheetId,
        spec: &ProjectionSpec,
        rng: &mut Prng,
    ) -> Result<usize, ConfigError> {
        let source_grid = self
            .sheets
            .get(source.0)
            .map(Sheet::grid)
            .ok_or_else(|| ConfigError::Invalid(format!("no sheet {}", source.0)))?;
        let p = Projection::new(
            spec,
            source,
            source_grid,
            CORTEX,
            self.sheets[CORTEX.0].grid(),
            rng,
        );
        self.projections.push(p);
        Ok(self.projections.len() - 1)
    }

    /// Declare a normalization group. Each projection may belong to at most one.
    pub fn set_normalize(&mut self, members: &[usize]) -> Result<(), ConfigError> {
        for &k in members {
            match self.projections.get(k) {
                None => {
                    return Err(ConfigError::Invalid(format!("no projection {k}")));
                }
                Some(p) if p.group().is_some() => {
                    return Err(ConfigError::Invalid(format!(
                        "projection {k} already in a normalization group"
                    )));
                }
                Some(_) => {}
            }
        }
        let g = self.groups.len();
        for &k in members {
            self.projections[k].set_group(Some(g));
        }
        self.groups.push(members.to_vec());
        Ok(())
    }

    pub fn set_probe(&mut self, probe: MapProbe) -> Result<(), ConfigError> {
        if probe.orientations == 0 || probe.phases == 0 {
            return Err(ConfigError::Invalid(
                "map probe needs at least one orientation and one phase".into(),
            ));
        }
        self.probe = probe;
        Ok(())
    }

    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.tier = tier;
    }

    pub fn effective_execution_tier(&self) -> ExecutionTier {
        match self.tier {
            #[cfg(feature = "parallel")]
            ExecutionTier::Parallel => ExecutionTier::Parallel,
            _ => ExecutionTier::Scalar,
        }
    }

    // ── accessors ──────────────────────────────────────────────────────────

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn settle(&self) -> u32 {
        self.cfg.settle
    }

    pub fn params(&self) -> &CortexParams {
        &self.cfg
    }

    pub fn probe(&self) -> &MapProbe {
        &self.probe
    }

    pub fn sheet(&self, id: SheetId) -> &Sheet {
        &self.sheets[id.0]
    }

    pub fn input(&self) -> &Sheet {
        &self.sheets[INPUT.0]
    }

    pub fn cortex(&self) -> &Sheet {
        &self.sheets[CORTEX.0]
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    pub fn projection(&self, k: usize) -> Option<&Projection> {
        self.projections.get(k)
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn theta(&self) -> &[f64] {
        &self.theta
    }

    pub fn average_activity(&self) -> &[f64] {
        &self.avg_activity
    }

    pub fn pref(&self) -> &[f64] {
        &self.pref
    }

    pub fn sel(&self) -> &[f64] {
        &self.sel
    }

    /// Units whose normalization was skipped (zero group sum) in the last cycle.
    pub fn degenerate_last_cycle(&self) -> usize {
        self.degenerate_last_cycle
    }

    pub fn weight_plot(&self, k: usize, unit: usize) -> Option<Vec<f64>> {
        let p = self.projections.get(k)?;
        (unit < p.target_count()).then(|| p.weight_plot(unit))
    }

    // ── input ──────────────────────────────────────────────────────────────

    pub fn set_input(&mut self, values: &[f64]) -> Result<(), StimulusError> {
        let sheet = &mut self.sheets[INPUT.0];
        if !sheet.set(values) {
            return Err(StimulusError::FrameSize {
                expected: sheet.nhex(),
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// Pull the next drive vector from `source` into the input sheet.
    pub fn step_afferent(&mut self, source: &mut InputSource) -> Result<(), StimulusError> {
        source.next_into(&mut self.sheets[INPUT.0])
    }

    // ── cycle ──────────────────────────────────────────────────────────────

    /// One full settle → learn → normalize → homeostasis cycle.
    pub fn step_cortex(&mut self) {
        self.sheets[CORTEX.0].zero();
        for _ in 0..self.cfg.settle {
            self.settle_step(None);
        }
        self.learn();
        self.degenerate_last_cycle = self.renormalize_groups(true, 0.0);
        if self.degenerate_last_cycle > 0 {
            debug!(
                units = self.degenerate_last_cycle,
                time = self.time,
                "normalization skipped for zero-sum fields"
            );
        }
        if self.cfg.homeostasis.enabled {
            self.homeostasis();
        }
        self.time += 1;
    }

    /// One relaxation sub-step over the projections in `only` (all if `None`).
    ///
    /// Every unit reads the previous sub-step's cortical state, so the new
    /// state is built in a scratch buffer and swapped in at the end.
    fn settle_step(&mut self, only: Option<&[usize]>) {
        match self.effective_execution_tier() {
            ExecutionTier::Scalar => self.settle_step_scalar(only),
            ExecutionTier::Parallel => self.settle_step_parallel(only),
        }
        let cx = &mut self.sheets[CORTEX.0].x;
        core::mem::swap(cx, &mut self.scratch);
    }

    fn settle_step_scalar(&mut self, only: Option<&[usize]>) {
        let sheets = &self.sheets;
        let projections = &self.projections;
        let theta = &self.theta;
        for (i, out) in self.scratch.iter_mut().enumerate() {
            *out = unit_drive(i, sheets, projections, only, theta[i]);
        }
    }

    #[cfg(feature = "parallel")]
    fn settle_step_parallel(&mut self, only: Option<&[usize]>) {
        let sheets = &self.sheets;
        let projections = &self.projections;
        let theta = &self.theta;
        self.scratch
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, out)| *out = unit_drive(i, sheets, projections, only, theta[i]));
    }

    #[cfg(not(feature = "parallel"))]
    fn settle_step_parallel(&mut self, only: Option<&[usize]>) {
        self.settle_step_scalar(only);
    }

    /// Hebbian update of every plastic projection from settled activity.
    fn learn(&mut self) {
        let sheets = &self.sheets;
        let post = &sheets[CORTEX.0].x;
        for p in self.projections.iter_mut().filter(|p| p.alpha() > 0.0) {
            p.learn(&sheets[p.source().0].x, post);
        }
    }

    /// Rescale every unit's weights so each normalization group sums to 1.
    /// Returns the number of (unit, group) pairs left untouched because
    /// their sum was exactly zero.
    pub fn renormalize(&mut self) -> usize {
        self.renormalize_groups(false, 0.0)
    }

    // Within a cycle only groups with a learning member can have drifted.
    // Sums already within `tolerance` of 1 are left as they are.
    fn renormalize_groups(&mut self, plastic_only: bool, tolerance: f64) -> usize {
        let n = self.sheets[CORTEX.0].nhex();
        let mut degenerate = 0;
        for group in &self.groups {
            if plastic_only && group.iter().all(|&k| self.projections[k].alpha() == 0.0) {
                continue;
            }
            for i in 0..n {
                let sum: f64 = group.iter().map(|&k| self.projections[k].weight_sum(i)).sum();
                if sum == 0.0 {
                    degenerate += 1;
                    continue;
                }
                if tolerance > 0.0 && (sum - 1.0).abs() <= tolerance {
                    continue;
                }
                for &k in group {
                    self.projections[k].renormalize(i, sum);
                }
            }
        }
        degenerate
    }

    fn homeostasis(&mut self) {
        let h = self.cfg.homeostasis;
        let x = &self.sheets[CORTEX.0].x;
        for ((avg, theta), &xi) in self.avg_activity.iter_mut().zip(&mut self.theta).zip(x) {
            *avg = h.beta * *avg + (1.0 - h.beta) * xi;
            *theta += h.lambda * (*avg - h.mu);
        }
    }

    // ── map probe ──────────────────────────────────────────────────────────

    /// Orientation preference and selectivity of every cortical unit, from
    /// phase-maximised grating responses through the afferent pathway only.
    ///
    /// Weights, thresholds and `time` are untouched; the sheets' activations
    /// are restored on return.
    pub fn map(&mut self) {
        let saved_in = self.sheets[INPUT.0].x.clone();
        let saved_cx = self.sheets[CORTEX.0].x.clone();

        let afferent: Vec<usize> = self
            .projections
            .iter()
            .enumerate()
            .filter(|(_, p)| p.source() == INPUT)
            .map(|(k, _)| k)
            .collect();

        let n = self.sheets[CORTEX.0].nhex();
        let probe = self.probe;
        let phase_inc = PI / probe.phases as f64;
        let mut vx = vec![0.0; n];
        let mut vy = vec![0.0; n];
        let mut max_phase = vec![0.0; n];

        for theta in probe_orientations(probe.orientations) {
            max_phase.iter_mut().for_each(|m| *m = f64::NEG_INFINITY);
            for j in 0..probe.phases {
                let phase = j as f64 * phase_inc;
                self.sheets[INPUT.0].paint_grating(theta, phase, probe.frequency, probe.amplitude);
                self.sheets[CORTEX.0].zero();
                self.settle_step(Some(&afferent));
                for (m, &x) in max_phase.iter_mut().zip(&self.sheets[CORTEX.0].x) {
                    if *m < x {
                        *m = x;
                    }
                }
            }
            let (s2, c2) = (2.0 * theta).sin_cos();
            for k in 0..n {
                vx[k] += max_phase[k] * c2;
                vy[k] += max_phase[k] * s2;
            }
        }

        for k in 0..n {
            let mut pref = 0.5 * (vy[k].atan2(vx[k]) + PI);
            if pref >= PI {
                pref -= PI;
            }
            self.pref[k] = pref;
            self.sel[k] = (vx[k] * vx[k] + vy[k] * vy[k]).sqrt();
        }

        self.sheets[INPUT.0].x = saved_in;
        self.sheets[CORTEX.0].x = saved_cx;
    }

    // ── persistence ────────────────────────────────────────────────────────

    /// Write `time` and every projection's weights.
    pub fn save<S: ArrayStore + ?Sized>(&self, store: &mut S) -> Result<(), PersistenceError> {
        let time = i32::try_from(self.time).map_err(|_| PersistenceError::BadTime)?;
        store.put_i32s(TIME_KEY, &[time]);
        for (k, p) in self.projections.iter().enumerate() {
            store.put_f64s(&projection_key(k), p.weights());
        }
        debug!(time = self.time, projections = self.projections.len(), "weights saved");
        Ok(())
    }

    /// Restore `time` and all projection weights.
    ///
    /// Everything is validated before anything is applied: on error the
    /// network is exactly as it was.
    pub fn load<S: ArrayStore + ?Sized>(&mut self, store: &S) -> Result<(), PersistenceError> {
        let time = match store.get_i32s(TIME_KEY)? {
            [t] if *t >= 0 => *t as u32,
            _ => return Err(PersistenceError::BadTime),
        };

        let stored = store
            .keys()
            .into_iter()
            .filter(|k| parse_projection_key(k).is_some())
            .count();
        if stored != self.projections.len() {
            return Err(PersistenceError::ProjectionCount {
                stored,
                expected: self.projections.len(),
            });
        }

        let mut arrays = Vec::with_capacity(self.projections.len());
        for (k, p) in self.projections.iter().enumerate() {
            let w = store.get_f64s(&projection_key(k))?;
            if w.len() != p.connection_count() {
                return Err(PersistenceError::LengthMismatch {
                    projection: k,
                    stored: w.len(),
                    expected: p.connection_count(),
                });
            }
            arrays.push(w);
        }

        for (p, w) in self.projections.iter_mut().zip(arrays) {
            p.set_weights(w)?;
        }
        self.time = time;
        // Frozen groups are skipped per cycle, so stored fields must already sum to 1.
        let degenerate = self.renormalize_groups(false, LOAD_SUM_TOLERANCE);
        info!(time, degenerate, "loaded weights");
        Ok(())
    }
}

/// Rectified net drive of cortical unit `i`.
#[inline]
fn unit_drive(
    i: usize,
    sheets: &[Sheet],
    projections: &[Projection],
    only: Option<&[usize]>,
    theta: f64,
) -> f64 {
    let mut acc = 0.0;
    match only {
        Some(set) => {
            for &k in set {
                let p = &projections[k];
                acc += p.activate(i, &sheets[p.source().0].x);
            }
        }
        None => {
            for p in projections {
                acc += p.activate(i, &sheets[p.source().0].x);
            }
        }
    }
    (acc - theta).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::store::MemoryStore;

    fn cortex_params(settle: u32, homeostasis: bool) -> CortexParams {
        CortexParams {
            settle,
            homeostasis: HomeostasisParams {
                enabled: homeostasis,
                beta: 0.991,
                lambda: 0.01,
                mu: 0.024,
                theta_init: 0.0,
            },
        }
    }

    fn small_params() -> Params {
        let cfg = ModelConfig {
            settle: 4,
            ..ModelConfig::default()
        };
        Params::from_config(&cfg).unwrap()
    }

    fn small_gcal(seed: u64) -> Network {
        let grid = HexGrid::hexagon(0.05, 4);
        let mut rng = Prng::new(seed);
        Network::gcal(&small_params(), grid.clone(), grid, &mut rng).unwrap()
    }

    fn blob(net: &mut Network, x: f64, y: f64, phi: f64) {
        let mut s = net.input().clone();
        s.paint_gaussian(x, y, phi, 0.3, 0.2);
        net.set_input(&s.x).unwrap();
    }

    fn all_weights(net: &Network) -> Vec<Vec<f64>> {
        net.projections().iter().map(|p| p.weights().to_vec()).collect()
    }

    #[test]
    fn seven_unit_ring_passes_input_through() {
        let ring = HexGrid::hexagon(1.0, 1);
        let mut net = Network::new(cortex_params(1, false), ring.clone(), ring).unwrap();
        let mut rng = Prng::new(1);
        net.add_projection(INPUT, &ProjectionSpec::new(0.1, 1.0, 0.0, 1.0), &mut rng)
            .unwrap();

        let input = [0.0, 0.25, 0.5, 1.0, 0.125, 0.75, 0.3];
        net.set_input(&input).unwrap();
        net.step_cortex();

        assert_eq!(net.cortex().x, input.to_vec());
        assert_eq!(net.time(), 1);
    }

    #[test]
    fn lateral_terms_read_previous_substep() {
        let ring = HexGrid::hexagon(1.0, 1);
        let mut net = Network::new(cortex_params(2, false), ring.clone(), ring).unwrap();
        let mut rng = Prng::new(1);
        net.add_projection(INPUT, &ProjectionSpec::new(0.1, 1.0, 0.0, 1.0), &mut rng)
            .unwrap();
        let flat = ProjectionSpec::new(1.01, 1.0, 0.0, 0.0).with_normalize(false);
        net.add_projection(CORTEX, &flat, &mut rng).unwrap();

        // unit 0 sits on the bottom row; its ring neighbours are 1, 2 and 3
        let mut input = [0.0; 7];
        input[0] = 1.0;
        net.set_input(&input).unwrap();
        net.step_cortex();

        assert_eq!(net.cortex().x, vec![2.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn unknown_source_sheet_is_rejected() {
        let ring = HexGrid::hexagon(1.0, 1);
        let mut net = Network::new(cortex_params(1, false), ring.clone(), ring).unwrap();
        let mut rng = Prng::new(1);
        assert!(matches!(
            net.add_projection(SheetId(5), &ProjectionSpec::new(0.1, 1.0, 0.0, 1.0), &mut rng),
            Err(ConfigError::Invalid(_))
        ));
        assert!(net.projections().is_empty());
    }

    #[test]
    fn zero_settle_is_rejected() {
        let ring = HexGrid::hexagon(1.0, 1);
        assert!(matches!(
            Network::new(cortex_params(0, false), ring.clone(), ring),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn groups_sum_to_one_after_cycles() {
        let mut net = small_gcal(11);
        for t in 0..5 {
            blob(&mut net, 0.02 * t as f64, -0.03, 0.4 * t as f64);
            net.step_cortex();
            for group in net.groups() {
                for i in 0..net.cortex().nhex() {
                    let sum: f64 = group
                        .iter()
                        .map(|&k| net.projections()[k].weight_sum(i))
                        .sum();
                    assert!((sum - 1.0).abs() < 1e-9, "group {group:?} unit {i}: {sum}");
                }
            }
        }
        assert_eq!(net.time(), 5);
    }

    #[test]
    fn learning_changes_plastic_weights_only() {
        let mut net = small_gcal(5);
        let before = all_weights(&net);
        blob(&mut net, 0.0, 0.0, 0.0);
        net.step_cortex();
        let after = all_weights(&net);
        // excitAlpha defaults to 0
        assert_eq!(before[LATERAL_EXCIT], after[LATERAL_EXCIT]);
        assert!(net.cortex().x.iter().any(|&x| x > 0.0));
        assert_ne!(before[AFFERENT_EXCIT], after[AFFERENT_EXCIT]);
    }

    #[test]
    fn zero_learning_rates_freeze_weights() {
        let cfg = ModelConfig {
            settle: 3,
            affer_alpha: 0.0,
            excit_alpha: 0.0,
            inhib_alpha: 0.0,
            ..ModelConfig::default()
        };
        let params = Params::from_config(&cfg).unwrap();
        let grid = HexGrid::hexagon(0.05, 3);
        let mut rng = Prng::new(9);
        let mut net = Network::gcal(&params, grid.clone(), grid, &mut rng).unwrap();
        let before = all_weights(&net);
        for t in 0..10 {
            blob(&mut net, -0.05 + 0.01 * t as f64, 0.0, t as f64);
            net.step_cortex();
        }
        assert_eq!(all_weights(&net), before);
    }

    #[test]
    fn homeostasis_disabled_keeps_theta() {
        let cfg = ModelConfig {
            settle: 2,
            homeostasis: false,
            ..ModelConfig::default()
        };
        let params = Params::from_config(&cfg).unwrap();
        let grid = HexGrid::hexagon(0.05, 3);
        let mut rng = Prng::new(2);
        let mut net = Network::gcal(&params, grid.clone(), grid, &mut rng).unwrap();
        for t in 0..8 {
            blob(&mut net, 0.0, 0.01 * t as f64, 0.3);
            net.step_cortex();
        }
        assert!(net.theta().iter().all(|&t| t == cfg.theta_init));
    }

    #[test]
    fn homeostasis_tracks_running_average() {
        let ring = HexGrid::hexagon(1.0, 1);
        let mut cp = cortex_params(1, true);
        cp.homeostasis.beta = 0.5;
        cp.homeostasis.lambda = 0.1;
        cp.homeostasis.mu = 0.0;
        let mut net = Network::new(cp, ring.clone(), ring).unwrap();
        let mut rng = Prng::new(1);
        net.add_projection(INPUT, &ProjectionSpec::new(0.1, 1.0, 0.0, 1.0), &mut rng)
            .unwrap();
        net.set_input(&[1.0; 7]).unwrap();
        net.step_cortex();
        // avg = 0.5*0 + 0.5*1; theta = 0 + 0.1*0.5
        for (&a, &t) in net.average_activity().iter().zip(net.theta()) {
            assert!((a - 0.5).abs() < 1e-12);
            assert!((t - 0.05).abs() < 1e-12);
        }
        net.step_cortex();
        // x = 1 - 0.05 = 0.95; avg = 0.25 + 0.475; theta += 0.1*0.725
        assert!((net.cortex().x[0] - 0.95).abs() < 1e-12);
        assert!((net.theta()[0] - 0.1225).abs() < 1e-12);
    }

    #[test]
    fn degenerate_groups_left_unchanged() {
        let ring = HexGrid::hexagon(1.0, 1);
        let mut net = Network::new(cortex_params(1, false), ring.clone(), ring).unwrap();
        let mut rng = Prng::new(1);
        let k = net
            .add_projection(INPUT, &ProjectionSpec::new(1.01, 1.0, 0.0, 0.5), &mut rng)
            .unwrap();
        net.set_normalize(&[k]).unwrap();
        let n = net.projections()[k].connection_count();
        net.projections[k].set_weights(&vec![0.0; n]).unwrap();
        assert_eq!(net.renormalize(), 7);
        assert!(net.projections()[k].weights().iter().all(|&w| w == 0.0));
    }

    #[test]
    fn normalize_group_validation() {
        let mut net = small_gcal(1);
        assert!(net.set_normalize(&[AFFERENT_EXCIT]).is_err());
        assert!(net.set_normalize(&[17]).is_err());
    }

    #[test]
    fn map_is_idempotent_and_read_only() {
        let mut net = small_gcal(21);
        for t in 0..3 {
            blob(&mut net, 0.0, 0.0, t as f64);
            net.step_cortex();
        }
        let weights = all_weights(&net);
        let theta = net.theta().to_vec();
        let input = net.input().x.clone();
        let cortex = net.cortex().x.clone();
        let time = net.time();

        net.map();
        let (pref, sel) = (net.pref().to_vec(), net.sel().to_vec());
        net.map();

        assert_eq!(net.pref(), &pref[..]);
        assert_eq!(net.sel(), &sel[..]);
        assert_eq!(all_weights(&net), weights);
        assert_eq!(net.theta(), &theta[..]);
        assert_eq!(net.input().x, input);
        assert_eq!(net.cortex().x, cortex);
        assert_eq!(net.time(), time);

        for (&p, &s) in pref.iter().zip(&sel) {
            assert!((0.0..PI).contains(&p), "pref {p}");
            assert!(s >= 0.0);
        }
    }

    #[test]
    fn save_load_roundtrip_is_exact() {
        let mut a = small_gcal(3);
        for t in 0..3 {
            blob(&mut a, 0.01 * t as f64, 0.0, 1.0);
            a.step_cortex();
        }
        let mut store = MemoryStore::new();
        a.save(&mut store).unwrap();

        let mut b = small_gcal(4);
        assert_ne!(all_weights(&a), all_weights(&b));
        b.load(&store).unwrap();
        assert_eq!(b.time(), 3);
        for (pa, pb) in a.projections().iter().zip(b.projections()) {
            let ba: Vec<u64> = pa.weights().iter().map(|w| w.to_bits()).collect();
            let bb: Vec<u64> = pb.weights().iter().map(|w| w.to_bits()).collect();
            assert_eq!(ba, bb);
        }
    }

    #[test]
    fn load_renormalizes_frozen_groups() {
        let a = small_gcal(3);
        let mut store = MemoryStore::new();
        a.save(&mut store).unwrap();
        let doubled: Vec<f64> = a.projections()[LATERAL_EXCIT]
            .weights()
            .iter()
            .map(|w| 2.0 * w)
            .collect();
        store.put_f64s(&projection_key(LATERAL_EXCIT), &doubled);

        let mut b = small_gcal(4);
        b.load(&store).unwrap();
        // untouched groups keep their stored bits
        assert_eq!(
            b.projections()[AFFERENT_EXCIT].weights(),
            a.projections()[AFFERENT_EXCIT].weights()
        );

        let check = |net: &Network| {
            let p = &net.projections()[LATERAL_EXCIT];
            for i in 0..net.cortex().nhex() {
                assert!((p.weight_sum(i) - 1.0).abs() < 1e-9, "unit {i}: {}", p.weight_sum(i));
            }
        };
        check(&b);
        blob(&mut b, 0.0, 0.0, 0.2);
        b.step_cortex();
        check(&b);
    }

    #[test]
    fn load_rejects_length_mismatch_without_side_effects() {
        let a = small_gcal(3);
        let mut store = MemoryStore::new();
        a.save(&mut store).unwrap();
        let mut short = a.projections()[LATERAL_INHIB].weights().to_vec();
        short.pop();
        store.put_f64s(&projection_key(LATERAL_INHIB), &short);
        store.put_i32s(TIME_KEY, &[99]);

        let mut b = small_gcal(4);
        let before = all_weights(&b);
        let err = b.load(&store).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::LengthMismatch {
                projection: LATERAL_INHIB,
                ..
            }
        ));
        assert_eq!(all_weights(&b), before);
        assert_eq!(b.time(), 0);
    }

    #[test]
    fn load_rejects_projection_count_mismatch() {
        let a = small_gcal(3);
        let mut store = MemoryStore::new();
        a.save(&mut store).unwrap();
        store.put_f64s(&projection_key(4), &[1.0]);
        let mut b = small_gcal(3);
        assert!(matches!(
            b.load(&store),
            Err(PersistenceError::ProjectionCount {
                stored: 5,
                expected: 4
            })
        ));

        store.remove(&projection_key(4));
        store.remove(TIME_KEY);
        assert!(matches!(b.load(&store), Err(PersistenceError::MissingKey(_))));
    }

    #[test]
    fn same_seed_same_network() {
        let a = small_gcal(77);
        let b = small_gcal(77);
        assert_eq!(all_weights(&a), all_weights(&b));
    }

    #[test]
    fn weight_plot_bounds() {
        let net = small_gcal(1);
        let n = net.input().nhex();
        assert_eq!(net.weight_plot(AFFERENT_EXCIT, 0).map(|v| v.len()), Some(n));
        assert!(net.weight_plot(AFFERENT_EXCIT, n + 5).is_none());
        assert!(net.weight_plot(9, 0).is_none());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_tier_matches_scalar() {
        let mut a = small_gcal(8);
        let mut b = small_gcal(8);
        b.set_execution_tier(ExecutionTier::Parallel);
        blob(&mut a, 0.0, 0.0, 0.5);
        blob(&mut b, 0.0, 0.0, 0.5);
        a.step_cortex();
        b.step_cortex();
        assert_eq!(a.cortex().x, b.cortex().x);
    }
}
