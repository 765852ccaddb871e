//! CLI command implementations.
//!
//! Settings are layered: built-in defaults, then the `--config` file, then
//! individual flags.

pub mod config;
pub mod info;
pub mod mix;
pub mod validate;
pub mod voxelize;

use std::path::PathBuf;

use clap::Args;
use fogmix_volume::{FalloffCurve, MixConfig, MixOperator, ResamplePolicy};
use tracing::debug;

/// Settings shared by every command that builds volumes.
#[derive(Args, Debug, Default, Clone)]
pub struct VolumeArgs {
    /// TOML file with pipeline settings (flags override it)
    #[arg(short, long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Edge length of a voxel in world units
    #[arg(long, value_name = "SIZE")]
    pub voxel_size: Option<f64>,

    /// Narrow band inside the surface, in voxels
    #[arg(long, value_name = "VOXELS")]
    pub band_interior: Option<f64>,

    /// Narrow band outside the surface, in voxels
    #[arg(long, value_name = "VOXELS")]
    pub band_exterior: Option<f64>,

    /// Half-width of the density ramp, in world units
    #[arg(long, value_name = "DIST")]
    pub falloff: Option<f64>,

    /// Ramp shape: linear or smoothstep
    #[arg(long, value_name = "CURVE")]
    pub falloff_curve: Option<FalloffCurve>,

    /// Iso value of the extracted surface
    #[arg(long, allow_hyphen_values = true)]
    pub threshold: Option<f64>,

    /// Surface relaxation strength (0 keeps the raw surface)
    #[arg(long)]
    pub adaptivity: Option<f64>,

    /// Worker threads (0 = all cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Largest dense index box the voxelizer may touch
    #[arg(long, value_name = "N")]
    pub max_voxels: Option<u64>,
}

/// Settings for combining two volumes.
#[derive(Args, Debug, Default, Clone)]
pub struct CombineArgs {
    /// multiply, add, subtract, min or max
    #[arg(long, value_name = "OP")]
    pub operator: Option<MixOperator>,

    /// How the second grid is moved onto the first: trilinear or nearest
    #[arg(long, value_name = "POLICY")]
    pub resample: Option<ResamplePolicy>,

    /// Extra world translation for the first mesh
    #[arg(long, value_name = "X,Y,Z", value_parser = parse_vec3, allow_hyphen_values = true)]
    pub translate_a: Option<[f64; 3]>,

    /// Extra world translation for the second mesh
    #[arg(long, value_name = "X,Y,Z", value_parser = parse_vec3, allow_hyphen_values = true)]
    pub translate_b: Option<[f64; 3]>,
}

/// Parse `X,Y,Z` into three finite numbers.
pub fn parse_vec3(s: &str) -> Result<[f64; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected X,Y,Z but got {:?}", s));
    }
    let mut v = [0.0; 3];
    for (slot, part) in v.iter_mut().zip(&parts) {
        *slot = part
            .parse::<f64>()
            .map_err(|e| format!("bad component {:?}: {}", part, e))?;
        if !slot.is_finite() {
            return Err(format!("component {:?} is not finite", part));
        }
    }
    Ok(v)
}

impl VolumeArgs {
    /// Defaults, then the config file, then flags.
    pub fn resolve(&self) -> anyhow::Result<MixConfig> {
        let mut config = match &self.config {
            Some(path) => MixConfig::from_toml_file(path)?,
            None => MixConfig::default(),
        };
        self.apply(&mut config);
        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }

    fn apply(&self, config: &mut MixConfig) {
        if let Some(v) = self.voxel_size {
            config.voxelize.voxel_size = v;
        }
        if let Some(v) = self.band_interior {
            config.voxelize.band_interior = v;
        }
        if let Some(v) = self.band_exterior {
            config.voxelize.band_exterior = v;
        }
        if let Some(v) = self.falloff {
            config.fog.falloff = v;
        }
        if let Some(v) = self.falloff_curve {
            config.fog.curve = v;
        }
        if let Some(v) = self.threshold {
            config.extract.threshold = v;
        }
        if let Some(v) = self.adaptivity {
            config.extract.adaptivity = v;
        }
        if let Some(v) = self.threads {
            config.threads = v;
        }
        if let Some(v) = self.max_voxels {
            config.max_voxels = v;
        }
    }
}

impl CombineArgs {
    pub fn apply(&self, config: &mut MixConfig) {
        if let Some(op) = self.operator {
            config.combine.operator = op;
        }
        if let Some(policy) = self.resample {
            config.combine.resample = policy;
        }
        if let Some(t) = self.translate_a {
            config.ingest.translate_a = t;
        }
        if let Some(t) = self.translate_b {
            config.ingest.translate_b = t;
        }
    }
}
