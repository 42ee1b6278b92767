//! Numeric configuration bundle.
//!
//! `ModelConfig` mirrors the JSON file one-to-one (camelCase keys, every key
//! optional). `Params` is what the core consumes: validated, with all
//! radius/sigma fields multiplied by `scale`.

#[cfg(feature = "serde")]
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::network::{CortexParams, HomeostasisParams, MapProbe};
use crate::projection::ProjectionSpec;
use crate::stimulus::{BlobParams, SamplerParams};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ModelConfig {
    pub homeostasis: bool,
    pub settle: u32,

    // homeostasis
    pub beta: f64,
    pub lambda: f64,
    pub mu: f64,
    pub theta_init: f64,
    pub x_range: f64,
    pub y_range: f64,

    // learning rates
    pub affer_alpha: f64,
    pub excit_alpha: f64,
    pub inhib_alpha: f64,

    // projection strengths
    pub affer_strength: f64,
    pub excit_strength: f64,
    pub inhib_strength: f64,

    // spatial params (scaled)
    pub scale: f64,
    pub sigma_a: f64,
    pub sigma_b: f64,
    pub affer_radius: f64,
    pub excit_radius: f64,
    pub inhib_radius: f64,
    pub affer_sigma: f64,
    pub excit_sigma: f64,
    pub inhib_sigma: f64,

    pub blocks: u32,
    pub steps: u32,

    // lattice (unscaled)
    pub hex_spacing: f64,
    pub sheet_radius: f64,
    pub affer_jitter: f64,

    // cartesian frame sampling
    pub camera_cols: u32,
    pub camera_rows: u32,
    pub sampler_dx: f64,
    pub sampler_sigma: f64,
    pub patterns: String,

    pub logpath: String,

    pub map_orientations: u32,
    pub map_phases: u32,
    pub map_frequency: f64,

    /// Read `mu` from the `thetaInit` key and `thetaInit` from the `mu` key,
    /// as older configuration files were interpreted.
    pub legacy_key_mapping: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            homeostasis: true,
            settle: 16,
            beta: 0.991,
            lambda: 0.01,
            mu: 0.024,
            theta_init: 0.15,
            x_range: 2.0,
            y_range: 2.0,
            affer_alpha: 0.1,
            excit_alpha: 0.0,
            inhib_alpha: 0.3,
            affer_strength: 1.5,
            excit_strength: 1.7,
            inhib_strength: -1.4,
            scale: 0.5,
            sigma_a: 1.0,
            sigma_b: 0.3,
            affer_radius: 0.27,
            excit_radius: 0.1,
            inhib_radius: 0.23,
            affer_sigma: 0.270,
            excit_sigma: 0.025,
            inhib_sigma: 0.075,
            blocks: 100,
            steps: 100,
            hex_spacing: 0.03,
            sheet_radius: 0.5,
            affer_jitter: 1.0,
            camera_cols: 105,
            camera_rows: 81,
            sampler_dx: 0.01,
            sampler_sigma: 0.02,
            patterns: "configs/testPatterns.gcal".to_string(),
            logpath: "logs/".to_string(),
            map_orientations: 20,
            map_phases: 8,
            map_frequency: 30.0,
            legacy_key_mapping: false,
        }
    }
}

#[cfg(feature = "serde")]
impl ModelConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let mut cfg: ModelConfig = serde_json::from_str(s)?;
        if cfg.legacy_key_mapping {
            tracing::warn!(
                mu = cfg.theta_init,
                theta_init = cfg.mu,
                "legacy key mapping: `thetaInit` key read as mu, `mu` key read as thetaInit"
            );
            core::mem::swap(&mut cfg.mu, &mut cfg.theta_init);
        }
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

/// Lattice used for both sheets when no external boundary is supplied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridParams {
    pub spacing: f64,
    pub radius: f64,
}

/// Validated, scaled parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub cortex: CortexParams,
    pub afferent: ProjectionSpec,
    pub afferent_inhib: ProjectionSpec,
    pub lateral_excit: ProjectionSpec,
    pub lateral_inhib: ProjectionSpec,
    pub blob: BlobParams,
    pub sampler: SamplerParams,
    pub probe: MapProbe,
    pub grid: GridParams,
    pub blocks: u32,
    pub steps: u32,
}

impl Params {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, ConfigError> {
        if cfg.settle == 0 {
            return Err(ConfigError::Invalid("settle must be at least 1".into()));
        }
        if !(cfg.scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "scale must be positive, got {}",
                cfg.scale
            )));
        }
        if !(0.0..=1.0).contains(&cfg.beta) {
            return Err(ConfigError::Invalid(format!(
                "beta must lie in [0, 1], got {}",
                cfg.beta
            )));
        }
        if !(cfg.hex_spacing > 0.0) || !(cfg.sheet_radius > 0.0) {
            return Err(ConfigError::Invalid(
                "hexSpacing and sheetRadius must be positive".into(),
            ));
        }
        if !(cfg.sampler_dx > 0.0) || cfg.sampler_sigma < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "samplerDx must be positive and samplerSigma non-negative, got {} and {}",
                cfg.sampler_dx, cfg.sampler_sigma
            )));
        }
        if cfg.map_orientations == 0 || cfg.map_phases == 0 {
            return Err(ConfigError::Invalid(
                "mapOrientations and mapPhases must be at least 1".into(),
            ));
        }

        let s = cfg.scale;
        let afferent = ProjectionSpec::new(
            cfg.affer_radius * s,
            cfg.affer_strength,
            cfg.affer_alpha,
            cfg.affer_sigma * s,
        )
        .with_jitter(cfg.affer_jitter);

        Ok(Self {
            cortex: CortexParams {
                settle: cfg.settle,
                homeostasis: HomeostasisParams {
                    enabled: cfg.homeostasis,
                    beta: cfg.beta,
                    lambda: cfg.lambda,
                    mu: cfg.mu,
                    theta_init: cfg.theta_init,
                },
            },
            afferent,
            afferent_inhib: ProjectionSpec {
                strength: -cfg.affer_strength * 0.5,
                ..afferent
            },
            lateral_excit: ProjectionSpec::new(
                cfg.excit_radius * s,
                cfg.excit_strength,
                cfg.excit_alpha,
                cfg.excit_sigma * s,
            ),
            lateral_inhib: ProjectionSpec::new(
                cfg.inhib_radius * s,
                cfg.inhib_strength,
                cfg.inhib_alpha,
                cfg.inhib_sigma * s,
            ),
            blob: BlobParams {
                x_range: cfg.x_range,
                y_range: cfg.y_range,
                sigma_a: cfg.sigma_a * s,
                sigma_b: cfg.sigma_b * s,
            },
            sampler: SamplerParams {
                cols: cfg.camera_cols as usize,
                rows: cfg.camera_rows as usize,
                dx: cfg.sampler_dx,
                sigma: cfg.sampler_sigma,
            },
            probe: MapProbe {
                orientations: cfg.map_orientations as usize,
                phases: cfg.map_phases as usize,
                frequency: cfg.map_frequency,
                amplitude: 1.0,
            },
            grid: GridParams {
                spacing: cfg.hex_spacing,
                radius: cfg.sheet_radius,
            },
            blocks: cfg.blocks,
            steps: cfg.steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_scaled() {
        let p = Params::from_config(&ModelConfig::default()).unwrap();
        assert!((p.afferent.radius - 0.135).abs() < 1e-12);
        assert!((p.lateral_inhib.sigma - 0.0375).abs() < 1e-12);
        assert!((p.blob.sigma_b - 0.15).abs() < 1e-12);
        assert_eq!(p.afferent_inhib.strength, -0.75);
        assert_eq!(p.afferent_inhib.radius, p.afferent.radius);
        assert_eq!(p.cortex.settle, 16);
        // lattice geometry is not scaled
        assert_eq!(p.grid.spacing, 0.03);
    }

    #[test]
    fn rejects_zero_settle() {
        let cfg = ModelConfig {
            settle: 0,
            ..ModelConfig::default()
        };
        assert!(matches!(
            Params::from_config(&cfg),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_bad_scale_and_beta() {
        let cfg = ModelConfig {
            scale: 0.0,
            ..ModelConfig::default()
        };
        assert!(Params::from_config(&cfg).is_err());
        let cfg = ModelConfig {
            beta: 1.5,
            ..ModelConfig::default()
        };
        assert!(Params::from_config(&cfg).is_err());
    }

    #[test]
    fn rejects_degenerate_sampler() {
        for (dx, sigma) in [(0.0, 0.02), (-0.01, 0.02), (f64::NAN, 0.02), (0.01, -1.0)] {
            let cfg = ModelConfig {
                sampler_dx: dx,
                sampler_sigma: sigma,
                ..ModelConfig::default()
            };
            assert!(
                matches!(Params::from_config(&cfg), Err(ConfigError::Invalid(_))),
                "dx {dx} sigma {sigma}"
            );
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_keys_are_camel_case_and_optional() {
        let cfg = ModelConfig::from_json_str(
            r#"{ "settle": 4, "afferRadius": 0.5, "thetaInit": 0.2, "mu": 0.03, "homeostasis": false }"#,
        )
        .unwrap();
        assert_eq!(cfg.settle, 4);
        assert_eq!(cfg.affer_radius, 0.5);
        assert_eq!(cfg.theta_init, 0.2);
        assert_eq!(cfg.mu, 0.03);
        assert!(!cfg.homeostasis);
        assert_eq!(cfg.steps, 100);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn legacy_mapping_swaps_mu_and_theta_init() {
        let cfg = ModelConfig::from_json_str(
            r#"{ "thetaInit": 0.2, "mu": 0.03, "legacyKeyMapping": true }"#,
        )
        .unwrap();
        assert_eq!(cfg.mu, 0.2);
        assert_eq!(cfg.theta_init, 0.03);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn parse_errors_surface() {
        assert!(matches!(
            ModelConfig::from_json_str("{ settle: }"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ModelConfig::from_path(Path::new("/nonexistent/gcal.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
