//! Move a grid onto another lattice.

use hashbrown::HashSet;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VolumeError;
use crate::grid::{BrickCoord, Coord, GridTransform, SparseGrid, BRICK_SIZE};

/// How values are read from the source lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplePolicy {
    /// Blend the eight surrounding cells.
    #[default]
    Trilinear,
    /// Take the closest cell.
    Nearest,
}

impl std::str::FromStr for ResamplePolicy {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trilinear" | "linear" => Ok(ResamplePolicy::Trilinear),
            "nearest" | "point" => Ok(ResamplePolicy::Nearest),
            other => Err(VolumeError::invalid(
                "resample policy",
                format!("unknown policy {:?} (expected trilinear or nearest)", other),
            )),
        }
    }
}

/// Resample `source` onto `target`, keeping its class and background.
///
/// Every target brick that overlaps a stored source brick (grown by one cell
/// for the interpolation stencil) is evaluated densely, then the result is
/// pruned.
pub fn resample_onto(source: &SparseGrid, target: &GridTransform, policy: ResamplePolicy) -> SparseGrid {
    let src_t = source.transform();
    let mut bricks: HashSet<BrickCoord> = HashSet::new();

    for (&brick, _) in source.nodes() {
        let o = brick.origin();
        let (lo, hi) = (-1.5, BRICK_SIZE as f64 + 0.5);
        let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for corner in 0..8 {
            let pick = |bit: i32| if corner & bit == 0 { lo } else { hi };
            let idx = Point3::new(
                o.x as f64 + pick(1),
                o.y as f64 + pick(2),
                o.z as f64 + pick(4),
            );
            let p = target.world_to_index(&src_t.index_to_world(&idx));
            min = min.inf(&p);
            max = max.sup(&p);
        }
        let b0 = Coord::new(min.x.floor() as i32, min.y.floor() as i32, min.z.floor() as i32).brick();
        let b1 = Coord::new(max.x.ceil() as i32, max.y.ceil() as i32, max.z.ceil() as i32).brick();
        for z in b0.z..=b1.z {
            for y in b0.y..=b1.y {
                for x in b0.x..=b1.x {
                    bricks.insert(BrickCoord::new(x, y, z));
                }
            }
        }
    }

    let sample = |c: Coord| {
        let world = target.cell_center(c);
        match policy {
            ResamplePolicy::Trilinear => source.sample_world(&world),
            ResamplePolicy::Nearest => source.sample_nearest(&src_t.world_to_index(&world)),
        }
    };

    let mut grid = SparseGrid::from_fn(
        source.class(),
        source.background(),
        *target,
        bricks.into_iter().collect(),
        sample,
    );
    grid.prune(0.0);

    debug!(
        "Resampled {} source nodes onto {} leaves and {} tiles ({:?})",
        source.nodes().count(),
        grid.leaf_count(),
        grid.tile_count(),
        policy
    );
    grid
}
