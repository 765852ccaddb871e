//! Signed distance to fog density.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{VolumeError, VolumeResult};
use crate::grid::{GridClass, SparseGrid};

/// Shape of the density ramp across the falloff zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FalloffCurve {
    /// Straight ramp from 1 at `-falloff` to 0 at `+falloff`.
    #[default]
    Linear,
    /// Hermite `3t² − 2t³` ramp over the same interval.
    Smoothstep,
}

impl std::str::FromStr for FalloffCurve {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(FalloffCurve::Linear),
            "smoothstep" | "smooth" => Ok(FalloffCurve::Smoothstep),
            other => Err(VolumeError::invalid(
                "falloff curve",
                format!("unknown curve {:?} (expected linear or smoothstep)", other),
            )),
        }
    }
}

/// Density for signed distance `d` with half-width `falloff`.
#[inline]
pub fn density(d: f32, falloff: f32, curve: FalloffCurve) -> f32 {
    if falloff <= 0.0 {
        return if d < 0.0 { 1.0 } else { 0.0 };
    }
    if d <= -falloff {
        return 1.0;
    }
    if d >= falloff {
        return 0.0;
    }
    let t = (falloff - d) / (2.0 * falloff);
    match curve {
        FalloffCurve::Linear => t,
        FalloffCurve::Smoothstep => t * t * (3.0 - 2.0 * t),
    }
}

/// Convert a narrow-band level set into a fog volume in place.
///
/// The background becomes 0, uniform leaves collapse to tiles and empty
/// tiles are dropped.
pub fn sdf_to_fog(grid: &mut SparseGrid, falloff: f64, curve: FalloffCurve) -> VolumeResult<()> {
    if !falloff.is_finite() || falloff < 0.0 {
        return Err(VolumeError::invalid(
            "falloff",
            format!("must be a finite value >= 0, got {}", falloff),
        ));
    }
    if grid.class() != GridClass::LevelSet {
        return Err(VolumeError::invalid(
            "fog input",
            "expected a level set grid, got a fog volume",
        ));
    }

    let f = falloff as f32;
    let outside = grid.background();
    if density(outside, f, curve) != 0.0 {
        warn!("Exterior band {} is narrower than falloff {}", outside, falloff);
        return Err(VolumeError::invalid(
            "exterior band",
            format!(
                "band limit {} lies inside the falloff {}; widen the band to at least the falloff",
                outside, falloff
            ),
        ));
    }
    grid.map_values(|d| density(d, f, curve));
    grid.reclassify(GridClass::Fog, 0.0);
    let removed = grid.prune(0.0);

    info!(
        "Converted to fog (falloff {}, {:?}): {} leaves, {} tiles, {} nodes pruned",
        falloff,
        curve,
        grid.leaf_count(),
        grid.tile_count(),
        removed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BrickCoord, Coord, GridTransform, Node};
    use approx::assert_relative_eq;

    fn level_set() -> SparseGrid {
        let t = GridTransform::axis_aligned(0.1).unwrap();
        let mut grid = SparseGrid::new(GridClass::LevelSet, 0.3, t);
        grid.insert_node(BrickCoord::new(1, 0, 0), Node::Tile(-0.3));
        for x in 0..8 {
            grid.set(Coord::new(x, 0, 0), 0.3 - 0.1 * x as f32);
        }
        grid
    }

    #[test]
    fn test_linear_density_values() {
        assert_eq!(density(-0.2, 0.1, FalloffCurve::Linear), 1.0);
        assert_eq!(density(0.2, 0.1, FalloffCurve::Linear), 0.0);
        assert_relative_eq!(density(0.0, 0.1, FalloffCurve::Linear), 0.5);
        assert_relative_eq!(density(-0.05, 0.1, FalloffCurve::Linear), 0.75);
        assert_relative_eq!(density(0.0, 0.1, FalloffCurve::Smoothstep), 0.5);
    }

    #[test]
    fn test_zero_falloff_is_a_step() {
        assert_eq!(density(-1e-6, 0.0, FalloffCurve::Linear), 1.0);
        assert_eq!(density(0.0, 0.0, FalloffCurve::Linear), 0.0);
        assert_eq!(density(1e-6, 0.0, FalloffCurve::Smoothstep), 0.0);
    }

    #[test]
    fn test_density_is_monotone() {
        for curve in [FalloffCurve::Linear, FalloffCurve::Smoothstep] {
            for falloff in [0.01f32, 0.1, 0.5, 2.0] {
                let mut prev = f32::INFINITY;
                for i in -300..=300 {
                    let d = i as f32 * 0.01;
                    let v = density(d, falloff, curve);
                    assert!((0.0..=1.0).contains(&v));
                    assert!(v <= prev, "{:?} f={} d={}", curve, falloff, d);
                    prev = v;
                }
            }
        }
    }

    #[test]
    fn test_sdf_to_fog_maps_tiles_and_background() {
        let mut grid = level_set();
        sdf_to_fog(&mut grid, 0.1, FalloffCurve::Linear).unwrap();

        assert_eq!(grid.class(), GridClass::Fog);
        assert_eq!(grid.background(), 0.0);
        assert_eq!(grid.node(BrickCoord::new(1, 0, 0)), Some(&Node::Tile(1.0)));
        assert_eq!(grid.get(Coord::new(0, 0, 0)), 0.0);
        assert_relative_eq!(grid.get(Coord::new(3, 0, 0)), 0.5, epsilon = 1e-5);
        assert_eq!(grid.get(Coord::new(7, 0, 0)), 1.0);
    }

    #[test]
    fn test_sdf_to_fog_rejects_bad_input() {
        let mut grid = level_set();
        assert!(sdf_to_fog(&mut grid, -0.1, FalloffCurve::Linear).is_err());
        assert!(sdf_to_fog(&mut grid, f64::NAN, FalloffCurve::Linear).is_err());

        sdf_to_fog(&mut grid, 0.1, FalloffCurve::Linear).unwrap();
        let err = sdf_to_fog(&mut grid, 0.1, FalloffCurve::Linear).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidParameter { .. }));
    }

    #[test]
    fn test_narrow_exterior_band_is_rejected() {
        let mut grid = level_set();
        let err = sdf_to_fog(&mut grid, 0.5, FalloffCurve::Linear).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidParameter { .. }));
        assert_eq!(grid.class(), GridClass::LevelSet);
        assert_eq!(grid.background(), 0.3);

        sdf_to_fog(&mut grid, 0.3, FalloffCurve::Smoothstep).unwrap();
        assert_eq!(grid.node(BrickCoord::new(1, 0, 0)), Some(&Node::Tile(1.0)));
    }

    #[test]
    fn test_curve_parsing() {
        assert_eq!("Smoothstep".parse::<FalloffCurve>().unwrap(), FalloffCurve::Smoothstep);
        assert_eq!("linear".parse::<FalloffCurve>().unwrap(), FalloffCurve::Linear);
        assert!("cubic".parse::<FalloffCurve>().is_err());
    }
}
