#[cfg(feature = "serde")]
use serde::Serialize;

use crate::network::Network;

/// A read-only snapshot of the network's observable state.
///
/// Design intent:
/// - Observers cannot mutate or steer the network.
/// - Snapshotting is *on-demand* and allocates; the cycle loop stays unchanged.
/// - `pref`/`sel` are whatever the last `Network::map` call left behind.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct NetworkSnapshot {
    pub time: u32,
    pub input: Vec<f64>,
    pub cortex: Vec<f64>,
    pub theta: Vec<f64>,
    pub avg_activity: Vec<f64>,
    pub pref: Vec<f64>,
    pub sel: Vec<f64>,
    pub degenerate_last_cycle: usize,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ProjectionSnapshot {
    pub index: usize,
    pub source: usize,
    pub strength: f64,
    pub alpha: f64,
    pub group: Option<usize>,
    pub connections: usize,
    /// Per-unit field weight sums.
    pub weight_sums: Vec<f64>,
}

pub struct NetworkAdapter<'a> {
    net: &'a Network,
}

impl<'a> NetworkAdapter<'a> {
    pub fn new(net: &'a Network) -> Self {
        Self { net }
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            time: self.net.time(),
            input: self.net.input().x.clone(),
            cortex: self.net.cortex().x.clone(),
            theta: self.net.theta().to_vec(),
            avg_activity: self.net.average_activity().to_vec(),
            pref: self.net.pref().to_vec(),
            sel: self.net.sel().to_vec(),
            degenerate_last_cycle: self.net.degenerate_last_cycle(),
        }
    }

    pub fn projection_snapshot(&self, k: usize) -> Option<ProjectionSnapshot> {
        let p = self.net.projection(k)?;
        Some(ProjectionSnapshot {
            index: k,
            source: p.source().0,
            strength: p.strength(),
            alpha: p.alpha(),
            group: p.group(),
            connections: p.connection_count(),
            weight_sums: (0..p.target_count()).map(|i| p.weight_sum(i)).collect(),
        })
    }

    pub fn projection_snapshots(&self) -> Vec<ProjectionSnapshot> {
        (0..self.net.projections().len())
            .filter_map(|k| self.projection_snapshot(k))
            .collect()
    }
}
