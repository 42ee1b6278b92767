//! # gcal
//!
//! A self-organizing cortical map simulator (GCAL model): a retina-like input
//! sheet drives a cortical sheet through weighted projections; cortical units
//! settle under lateral excitation and inhibition, learn by Hebbian update,
//! are divisively normalized, and adapt their thresholds homeostatically.
//!
//! ## Quick Start
//!
//! ```
//! use gcal::prelude::*;
//!
//! let mut params = Params::from_config(&ModelConfig::default()).unwrap();
//! params.cortex.settle = 2;
//!
//! let grid = HexGrid::hexagon(0.05, 2);
//! let mut rng = Prng::new(1);
//! let mut net = Network::gcal(&params, grid.clone(), grid, &mut rng).unwrap();
//!
//! let mut input = InputSource::synthetic(params.blob, rng.fork());
//! net.step_afferent(&mut input).unwrap();
//! net.step_cortex();
//! assert_eq!(net.time(), 1);
//!
//! net.map();
//! assert!(net.pref().iter().all(|&p| (0.0..std::f64::consts::PI).contains(&p)));
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): JSON configuration and serializable snapshots
//! - `parallel`: settle sub-steps computed across units via rayon
//!
//! ## Modules
//!
//! - [`hexgrid`]: hexagonal lattices and neighbour queries
//! - [`sheet`]: per-unit activations and stimulus painters
//! - [`projection`]: CSR connection fields with Hebbian learning
//! - [`network`]: settle / learn / normalize / homeostasis, orientation maps, persistence
//! - [`stimulus`]: input providers
//! - [`store`]: named-array store and its on-disk format
//! - [`observer`]: read-only snapshot adapters

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/hexgrid.rs"]
pub mod hexgrid;

#[path = "core/sheet.rs"]
pub mod sheet;

#[path = "core/projection.rs"]
pub mod projection;

#[path = "core/store.rs"]
pub mod store;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/stimulus.rs"]
pub mod stimulus;

pub mod observer;

/// Prelude module for convenient imports.
///
/// ```
/// use gcal::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ModelConfig, Params};
    pub use crate::error::{ConfigError, PersistenceError, StimulusError};
    pub use crate::hexgrid::{HexGrid, HexPos};
    pub use crate::network::{ExecutionTier, MapProbe, Network};
    pub use crate::prng::Prng;
    pub use crate::projection::ProjectionSpec;
    pub use crate::sheet::{Sheet, SheetId};
    pub use crate::stimulus::{CartesianSampler, FrameSource, InputKind, InputSource};
    pub use crate::store::{ArrayStore, MemoryStore};
}
