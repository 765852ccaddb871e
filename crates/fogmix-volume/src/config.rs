//! Pipeline configuration.
//!
//! [`MixConfig`] collects every tunable of the mix pipeline. It round-trips
//! through TOML (the on-disk format) and serializes to JSON for reports.
//! Missing keys take their defaults; unknown keys are rejected.
//!
//! ```toml
//! threads = 0
//!
//! [voxelize]
//! voxel_size = 0.1
//!
//! [combine]
//! operator = "multiply"
//! ```

use std::fs;
use std::path::Path;

use fogmix_mesh::{IngestParams, WeldPolicy};
use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::combine::MixOperator;
use crate::error::{VolumeError, VolumeResult};
use crate::extract::ExtractParams;
use crate::fog::FalloffCurve;
use crate::resample::ResamplePolicy;
use crate::voxelize::{VoxelizeParams, DEFAULT_MAX_VOXELS};

/// Complete configuration of a mix run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MixConfig {
    /// Worker threads; 0 uses every core.
    pub threads: usize,
    /// Upper bound on the dense index box of one voxelized input.
    pub max_voxels: u64,
    pub ingest: IngestConfig,
    pub voxelize: VoxelizeConfig,
    pub fog: FogConfig,
    pub combine: CombineConfig,
    pub extract: ExtractConfig,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            max_voxels: DEFAULT_MAX_VOXELS,
            ingest: IngestConfig::default(),
            voxelize: VoxelizeConfig::default(),
            fog: FogConfig::default(),
            combine: CombineConfig::default(),
            extract: ExtractConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub weld: WeldPolicy,
    pub weld_epsilon: f64,
    /// Largest accepted fraction of open or non-manifold edges.
    pub manifold_tolerance: f64,
    /// World offset added to the first input.
    pub translate_a: [f64; 3],
    /// World offset added to the second input.
    pub translate_b: [f64; 3],
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            weld: WeldPolicy::Auto,
            weld_epsilon: 1e-6,
            manifold_tolerance: 0.0,
            translate_a: [0.0; 3],
            translate_b: [0.0; 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoxelizeConfig {
    /// Edge length of one voxel in world units.
    pub voxel_size: f64,
    /// Interior band width in voxels.
    pub band_interior: f64,
    /// Exterior band width in voxels.
    pub band_exterior: f64,
}

impl Default for VoxelizeConfig {
    fn default() -> Self {
        Self {
            voxel_size: 1.0,
            band_interior: 1.0,
            band_exterior: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FogConfig {
    /// Half-width of the density ramp in world units.
    pub falloff: f64,
    pub curve: FalloffCurve,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            falloff: 0.1,
            curve: FalloffCurve::Linear,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CombineConfig {
    pub operator: MixOperator,
    pub resample: ResamplePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    pub threshold: f64,
    pub adaptivity: f64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        let params = ExtractParams::default();
        Self {
            threshold: params.threshold,
            adaptivity: params.adaptivity,
        }
    }
}

impl MixConfig {
    /// Parse a TOML document. Values not present keep their defaults.
    pub fn from_toml_str(text: &str) -> VolumeResult<Self> {
        let config: MixConfig = toml::from_str(text).map_err(|e| VolumeError::Config {
            path: None,
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> VolumeResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| VolumeError::Config {
            path: Some(path.to_path_buf()),
            details: e.to_string(),
        })?;
        let config: MixConfig = toml::from_str(&text).map_err(|e| VolumeError::Config {
            path: Some(path.to_path_buf()),
            details: e.to_string(),
        })?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn to_toml(&self) -> VolumeResult<String> {
        toml::to_string_pretty(self).map_err(|e| VolumeError::Config {
            path: None,
            details: e.to_string(),
        })
    }

    pub fn to_json(&self) -> VolumeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| VolumeError::Config {
            path: None,
            details: e.to_string(),
        })
    }

    /// Check every value against its valid range.
    pub fn validate(&self) -> VolumeResult<()> {
        let v = &self.voxelize;
        if !v.voxel_size.is_finite() || v.voxel_size <= 0.0 {
            return Err(VolumeError::invalid(
                "voxel size",
                format!("must be positive and finite, got {}", v.voxel_size),
            ));
        }
        non_negative("interior band width", v.band_interior)?;
        non_negative("exterior band width", v.band_exterior)?;
        non_negative("falloff", self.fog.falloff)?;
        non_negative("adaptivity", self.extract.adaptivity)?;
        non_negative("weld epsilon", self.ingest.weld_epsilon)?;
        if !self.extract.threshold.is_finite() {
            return Err(VolumeError::invalid("threshold", "must be finite"));
        }
        if !(0.0..=1.0).contains(&self.ingest.manifold_tolerance) {
            return Err(VolumeError::invalid(
                "manifold tolerance",
                format!("must lie in [0, 1], got {}", self.ingest.manifold_tolerance),
            ));
        }
        if self.max_voxels == 0 {
            return Err(VolumeError::invalid("max voxels", "must be positive"));
        }
        for (name, t) in [
            ("translate_a", self.ingest.translate_a),
            ("translate_b", self.ingest.translate_b),
        ] {
            if !t.iter().all(|c| c.is_finite()) {
                return Err(VolumeError::invalid(
                    "translation",
                    format!("{} has non-finite components {:?}", name, t),
                ));
            }
        }
        Ok(())
    }

    pub fn ingest_params(&self) -> IngestParams {
        let mut params = IngestParams::default()
            .with_weld(self.ingest.weld)
            .with_manifold_tolerance(self.ingest.manifold_tolerance);
        params.weld_epsilon = self.ingest.weld_epsilon;
        params
    }

    /// Voxelizer settings with both bands wide enough to hold the falloff ramp.
    pub fn voxelize_params(&self) -> VoxelizeParams {
        let ramp = falloff_band(self.fog.falloff, self.voxelize.voxel_size);
        VoxelizeParams::default()
            .with_bands(
                self.voxelize.band_interior.max(ramp),
                self.voxelize.band_exterior.max(ramp),
            )
            .with_max_voxels(self.max_voxels)
    }

    pub fn extract_params(&self) -> ExtractParams {
        ExtractParams::new(self.extract.threshold, self.extract.adaptivity)
    }

    /// World offset for the first input as a 4×4 matrix.
    pub fn offset_a(&self) -> Matrix4<f64> {
        Matrix4::new_translation(&Vector3::from(self.ingest.translate_a))
    }

    /// World offset for the second input as a 4×4 matrix.
    pub fn offset_b(&self) -> Matrix4<f64> {
        Matrix4::new_translation(&Vector3::from(self.ingest.translate_b))
    }
}

/// Fewest whole voxels whose band limit reaches `falloff`, compared at the
/// `f32` precision the grids store.
fn falloff_band(falloff: f64, voxel_size: f64) -> f64 {
    if !(falloff > 0.0 && voxel_size > 0.0) || !voxel_size.is_finite() {
        return 0.0;
    }
    let mut voxels = (falloff / voxel_size).ceil();
    if ((voxels * voxel_size) as f32) < falloff as f32 {
        voxels += 1.0;
    }
    voxels
}

fn non_negative(name: &'static str, value: f64) -> VolumeResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(VolumeError::invalid(
            name,
            format!("must be a finite value >= 0, got {}", value),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MixConfig::default();
        assert_eq!(config.voxelize.voxel_size, 1.0);
        assert_eq!(config.fog.falloff, 0.1);
        assert_eq!(config.combine.operator, MixOperator::Multiply);
        assert_eq!(config.combine.resample, ResamplePolicy::Trilinear);
        assert_eq!(config.extract.threshold, 0.5);
        assert_eq!(config.max_voxels, 1 << 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = MixConfig::from_toml_str(
            r#"
            threads = 2

            [voxelize]
            voxel_size = 0.1
            band_interior = 3

            [combine]
            operator = "sub"
            resample = "nearest"

            [ingest]
            translate_b = [0.5, 0.0, 0.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.threads, 2);
        assert_eq!(config.voxelize.voxel_size, 0.1);
        assert_eq!(config.voxelize.band_interior, 3.0);
        assert_eq!(config.voxelize.band_exterior, 1.0);
        assert_eq!(config.combine.operator, MixOperator::Subtract);
        assert_eq!(config.combine.resample, ResamplePolicy::Nearest);
        assert_eq!(config.offset_b()[(0, 3)], 0.5);
        assert_eq!(config.fog.curve, FalloffCurve::Linear);
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let err = MixConfig::from_toml_str("[combine]\noperator = \"divide\"\n").unwrap_err();
        assert!(matches!(err, VolumeError::Config { .. }));
        assert!(err.to_string().contains("divide"), "{}", err);
        assert_eq!(err.kind().exit_code(), 4);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(MixConfig::from_toml_str("[fog]\nfalloff = 0.1\nspread = 2\n").is_err());
    }

    #[test]
    fn test_out_of_range_values() {
        assert!(MixConfig::from_toml_str("[voxelize]\nvoxel_size = 0.0\n").is_err());
        assert!(MixConfig::from_toml_str("[fog]\nfalloff = -1.0\n").is_err());
        assert!(MixConfig::from_toml_str("[ingest]\nmanifold_tolerance = 2.0\n").is_err());
    }

    #[test]
    fn test_toml_and_json_export() {
        let mut config = MixConfig::default();
        config.combine.operator = MixOperator::Max;
        config.fog.curve = FalloffCurve::Smoothstep;

        let text = config.to_toml().unwrap();
        assert!(text.contains("operator = \"max\""), "{}", text);
        assert_eq!(MixConfig::from_toml_str(&text).unwrap(), config);

        let json: serde_json::Value = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(json["fog"]["curve"], "smoothstep");
        assert_eq!(json["extract"]["threshold"], 0.5);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[extract]\nthreshold = 0.25").unwrap();
        let config = MixConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.extract.threshold, 0.25);

        let err = MixConfig::from_toml_file("/nonexistent/fogmix.toml").unwrap_err();
        assert!(matches!(err, VolumeError::Config { path: Some(_), .. }));
    }

    #[test]
    fn test_param_conversion() {
        let mut config = MixConfig::default();
        config.voxelize.band_exterior = 4.0;
        config.max_voxels = 1000;
        config.ingest.weld = WeldPolicy::Always;

        let v = config.voxelize_params();
        assert_eq!(v.band_exterior, 4.0);
        assert_eq!(v.max_voxels, 1000);
        assert_eq!(config.ingest_params().weld, WeldPolicy::Always);
        assert_eq!(config.extract_params().threshold, 0.5);
    }

    #[test]
    fn test_bands_cover_the_falloff() {
        let mut config = MixConfig::default();
        config.voxelize.voxel_size = 0.04;
        let v = config.voxelize_params();
        assert_eq!(v.band_interior, 3.0);
        assert_eq!(v.band_exterior, 3.0);

        config.voxelize.voxel_size = 0.05;
        let v = config.voxelize_params();
        assert!((v.band_interior * 0.05) as f32 >= 0.1f32);

        config.voxelize.band_interior = 5.0;
        config.fog.falloff = 0.0;
        let v = config.voxelize_params();
        assert_eq!(v.band_interior, 5.0);
        assert_eq!(v.band_exterior, 1.0);
    }
}
