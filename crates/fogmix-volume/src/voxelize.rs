//! Narrow-band signed distance from a closed mesh.
//!
//! Distances are exact point-to-triangle distances, computed per brick for
//! the triangles whose band-expanded bounds touch that brick. Signs come from
//! ray parity along +Z: every cell column collects the heights at which it
//! crosses the surface, and a cell is inside when an odd number of crossings
//! lie below its center.

use fogmix_mesh::{Mesh, Triangle};
use hashbrown::HashMap;
use nalgebra::Point3;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{VolumeError, VolumeResult};
use crate::grid::{BrickCoord, Coord, GridClass, GridTransform, Node, SparseGrid, BRICK_LOG2, BRICK_VOLUME};

/// Largest dense index box the voxelizer will touch by default (2^30 cells).
pub const DEFAULT_MAX_VOXELS: u64 = 1 << 30;

/// Index-space coordinates are kept well inside `i32`.
const INDEX_LIMIT: f64 = (1u64 << 30) as f64;

/// Triangles with less index-space area than this carry no surface.
const MIN_TRIANGLE_AREA: f64 = 1e-12;

/// Parameters for [`voxelize`].
#[derive(Debug, Clone, Copy)]
pub struct VoxelizeParams {
    /// Interior band width in voxels.
    pub band_interior: f64,
    /// Exterior band width in voxels.
    pub band_exterior: f64,
    /// Upper bound on the product of the index box dimensions.
    pub max_voxels: u64,
}

impl Default for VoxelizeParams {
    fn default() -> Self {
        Self {
            band_interior: 1.0,
            band_exterior: 1.0,
            max_voxels: DEFAULT_MAX_VOXELS,
        }
    }
}

impl VoxelizeParams {
    pub fn with_bands(mut self, interior: f64, exterior: f64) -> Self {
        self.band_interior = interior;
        self.band_exterior = exterior;
        self
    }

    pub fn with_max_voxels(mut self, max_voxels: u64) -> Self {
        self.max_voxels = max_voxels;
        self
    }

    fn validate(&self) -> VolumeResult<()> {
        for (name, width) in [
            ("interior band width", self.band_interior),
            ("exterior band width", self.band_exterior),
        ] {
            if !width.is_finite() || width < 0.0 {
                return Err(VolumeError::invalid(
                    name,
                    format!("must be a finite value >= 0, got {}", width),
                ));
            }
        }
        Ok(())
    }
}

/// Convert a closed world-space mesh into a narrow-band level set on `transform`.
///
/// Values are signed distances in world units, negative inside, clamped to
/// `[-band_interior · h, band_exterior · h]`. Bands narrower than one voxel
/// are widened to one voxel.
pub fn voxelize(
    mesh: &Mesh,
    transform: &GridTransform,
    params: &VoxelizeParams,
) -> VolumeResult<SparseGrid> {
    params.validate()?;
    if mesh.is_empty() {
        return Err(VolumeError::InvalidMesh {
            details: "mesh has no polygons".into(),
        });
    }

    let h = transform.voxel_size();
    let interior = params.band_interior.max(1.0);
    let exterior = params.band_exterior.max(1.0);
    let radius = interior.max(exterior);

    let triangles: Vec<Triangle> = mesh
        .triangles()
        .map(|t| {
            Triangle::new(
                transform.world_to_index(&t.v0),
                transform.world_to_index(&t.v1),
                transform.world_to_index(&t.v2),
            )
        })
        .filter(|t| !t.is_degenerate(MIN_TRIANGLE_AREA))
        .collect();

    if triangles.is_empty() {
        return Err(VolumeError::InvalidMesh {
            details: "mesh has no triangle with non-zero area".into(),
        });
    }

    let (lo, hi) = index_bounds(&triangles)?;
    let cell_lo = Coord::new(
        (lo.x - radius).floor() as i32,
        (lo.y - radius).floor() as i32,
        (lo.z - radius).floor() as i32,
    );
    let cell_hi = Coord::new(
        (hi.x + radius).ceil() as i32,
        (hi.y + radius).ceil() as i32,
        (hi.z + radius).ceil() as i32,
    );
    check_dims(cell_lo, cell_hi, params.max_voxels)?;

    debug!(
        "Voxelizing {} triangles, index box {:?}..{:?}, bands {}/{} voxels",
        triangles.len(),
        cell_lo.as_array(),
        cell_hi.as_array(),
        interior,
        exterior
    );

    let columns = ColumnCrossings::build(&triangles);
    let buckets = bucket_by_brick(&triangles, radius);

    let interior_limit = (interior * h) as f32;
    let exterior_limit = (exterior * h) as f32;

    let jobs: Vec<(&BrickCoord, &Vec<u32>)> = buckets.iter().collect();
    let leaves: Vec<(BrickCoord, Node)> = jobs
        .into_par_iter()
        .map(|(&brick, tris)| {
            let mut values = Box::new([0.0f32; BRICK_VOLUME]);
            for (i, v) in values.iter_mut().enumerate() {
                let cell = brick.cell(i);
                let p = Point3::new(cell.x as f64, cell.y as f64, cell.z as f64);
                let mut dist = f64::INFINITY;
                for &t in tris {
                    dist = dist.min(triangles[t as usize].distance_to(&p));
                    if dist == 0.0 {
                        break;
                    }
                }
                let signed = if columns.is_inside(cell) {
                    -dist * h
                } else {
                    dist * h
                };
                *v = (signed as f32).clamp(-interior_limit, exterior_limit);
            }
            (brick, Node::Leaf(values))
        })
        .collect();

    let (brick_lo, brick_hi) = (
        Coord::new(lo.x.floor() as i32, lo.y.floor() as i32, lo.z.floor() as i32).brick(),
        Coord::new(hi.x.ceil() as i32, hi.y.ceil() as i32, hi.z.ceil() as i32).brick(),
    );
    let candidates: Vec<BrickCoord> = (brick_lo.z..=brick_hi.z)
        .flat_map(|z| {
            (brick_lo.y..=brick_hi.y)
                .flat_map(move |y| (brick_lo.x..=brick_hi.x).map(move |x| BrickCoord::new(x, y, z)))
        })
        .filter(|b| !buckets.contains_key(b))
        .collect();
    let interior_tiles: Vec<BrickCoord> = candidates
        .into_par_iter()
        .filter(|b| columns.is_inside(b.origin()))
        .collect();

    let mut grid = SparseGrid::new(GridClass::LevelSet, exterior_limit, *transform);
    let leaf_count = leaves.len();
    for (brick, node) in leaves {
        grid.insert_node(brick, node);
    }
    for &brick in &interior_tiles {
        grid.insert_node(brick, Node::Tile(-interior_limit));
    }
    grid.prune(0.0);

    info!(
        "Voxelized {} triangles: {} band bricks, {} interior tiles, {} leaves after pruning",
        triangles.len(),
        leaf_count,
        interior_tiles.len(),
        grid.leaf_count()
    );
    Ok(grid)
}

fn index_bounds(triangles: &[Triangle]) -> VolumeResult<(Point3<f64>, Point3<f64>)> {
    let mut lo = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let mut hi = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for t in triangles {
        for p in [t.v0, t.v1, t.v2] {
            lo = lo.inf(&p);
            hi = hi.sup(&p);
        }
    }

    if !lo.coords.iter().chain(hi.coords.iter()).all(|v| v.is_finite()) {
        return Err(VolumeError::InvalidMesh {
            details: "mesh has non-finite vertex coordinates".into(),
        });
    }
    if lo.coords.amax().max(hi.coords.amax()) > INDEX_LIMIT {
        return Err(VolumeError::invalid(
            "voxel size",
            format!(
                "mesh spans index range {:?}..{:?}, beyond ±{}",
                lo.coords.as_slice(),
                hi.coords.as_slice(),
                INDEX_LIMIT
            ),
        ));
    }
    Ok((lo, hi))
}

fn check_dims(lo: Coord, hi: Coord, max_voxels: u64) -> VolumeResult<()> {
    let dims = [
        (hi.x - lo.x + 1) as u64,
        (hi.y - lo.y + 1) as u64,
        (hi.z - lo.z + 1) as u64,
    ];
    let total = dims[0].saturating_mul(dims[1]).saturating_mul(dims[2]);
    if total > max_voxels {
        return Err(VolumeError::GridTooLarge {
            dims,
            total,
            max: max_voxels,
        });
    }
    Ok(())
}

/// Triangle indices per brick, for every brick the band-expanded triangle bounds touch.
fn bucket_by_brick(triangles: &[Triangle], radius: f64) -> HashMap<BrickCoord, Vec<u32>> {
    let mut buckets: HashMap<BrickCoord, Vec<u32>> = HashMap::new();
    for (i, t) in triangles.iter().enumerate() {
        let lo = t.v0.inf(&t.v1).inf(&t.v2);
        let hi = t.v0.sup(&t.v1).sup(&t.v2);
        let b0 = Coord::new(
            (lo.x - radius).floor() as i32,
            (lo.y - radius).floor() as i32,
            (lo.z - radius).floor() as i32,
        )
        .brick();
        let b1 = Coord::new(
            (hi.x + radius).ceil() as i32,
            (hi.y + radius).ceil() as i32,
            (hi.z + radius).ceil() as i32,
        )
        .brick();
        for z in b0.z..=b1.z {
            for y in b0.y..=b1.y {
                for x in b0.x..=b1.x {
                    buckets.entry(BrickCoord::new(x, y, z)).or_default().push(i as u32);
                }
            }
        }
    }
    buckets
}

/// Sorted +Z surface crossings of every cell column that has any.
struct ColumnCrossings {
    columns: HashMap<(i32, i32), Vec<f64>>,
}

impl ColumnCrossings {
    fn build(triangles: &[Triangle]) -> Self {
        // Column tiles are 8×8 columns, matching the brick footprint.
        let mut tiles: HashMap<(i32, i32), Vec<u32>> = HashMap::new();
        for (i, t) in triangles.iter().enumerate() {
            let Some((x0, x1, y0, y1)) = column_range(t) else {
                continue;
            };
            for ty in (y0 >> BRICK_LOG2)..=(y1 >> BRICK_LOG2) {
                for tx in (x0 >> BRICK_LOG2)..=(x1 >> BRICK_LOG2) {
                    tiles.entry((tx, ty)).or_default().push(i as u32);
                }
            }
        }

        let jobs: Vec<(&(i32, i32), &Vec<u32>)> = tiles.iter().collect();
        let per_tile: Vec<HashMap<(i32, i32), Vec<f64>>> = jobs
            .into_par_iter()
            .map(|(&(tx, ty), tris)| {
                let mut local: HashMap<(i32, i32), Vec<f64>> = HashMap::new();
                let (tile_x0, tile_y0) = (tx << BRICK_LOG2, ty << BRICK_LOG2);
                for &ti in tris {
                    let t = &triangles[ti as usize];
                    let Some((x0, x1, y0, y1)) = column_range(t) else {
                        continue;
                    };
                    for y in y0.max(tile_y0)..=y1.min(tile_y0 + 7) {
                        for x in x0.max(tile_x0)..=x1.min(tile_x0 + 7) {
                            if let Some(z) = crossing_height(t, x as f64, y as f64) {
                                local.entry((x, y)).or_default().push(z);
                            }
                        }
                    }
                }
                for zs in local.values_mut() {
                    zs.sort_by(f64::total_cmp);
                }
                local
            })
            .collect();

        let mut columns: HashMap<(i32, i32), Vec<f64>> = HashMap::new();
        for tile in per_tile {
            columns.extend(tile);
        }

        let odd = columns.values().filter(|zs| zs.len() % 2 == 1).count();
        if odd > 0 {
            warn!(
                "{} of {} cell columns cross the surface an odd number of times; inside/outside may be wrong",
                odd,
                columns.len()
            );
        }
        Self { columns }
    }

    fn is_inside(&self, cell: Coord) -> bool {
        self.columns.get(&(cell.x, cell.y)).is_some_and(|zs| {
            let below = zs.partition_point(|&z| z < cell.z as f64);
            below % 2 == 1
        })
    }
}

/// Inclusive integer column range under a triangle's XY footprint.
fn column_range(t: &Triangle) -> Option<(i32, i32, i32, i32)> {
    let lo = t.v0.inf(&t.v1).inf(&t.v2);
    let hi = t.v0.sup(&t.v1).sup(&t.v2);
    let (x0, x1) = (lo.x.ceil() as i32, hi.x.floor() as i32);
    let (y0, y1) = (lo.y.ceil() as i32, hi.y.floor() as i32);
    (x0 <= x1 && y0 <= y1).then_some((x0, x1, y0, y1))
}

/// 2D edge function of `p` against the segment `a`–`b`.
///
/// Evaluated with the endpoints in lexicographic order and the sign fixed up
/// afterwards, so two triangles sharing an edge get exactly opposite values.
fn edge_function(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> f64 {
    let (lo, hi, sign) = if (a[0], a[1]) <= (b[0], b[1]) {
        (a, b, 1.0)
    } else {
        (b, a, -1.0)
    };
    sign * ((hi[0] - lo[0]) * (p[1] - lo[1]) - (hi[1] - lo[1]) * (p[0] - lo[0]))
}

/// Height where the vertical line through `(x, y)` meets the triangle, if it does.
///
/// Points on an edge belong to the triangle whose interior lies toward +Y
/// (or +X for horizontal edges), so a column through a shared edge counts once.
fn crossing_height(t: &Triangle, x: f64, y: f64) -> Option<f64> {
    let v = [[t.v0.x, t.v0.y], [t.v1.x, t.v1.y], [t.v2.x, t.v2.y]];
    let p = [x, y];

    for k in 0..3 {
        let (a, b, c) = (v[k], v[(k + 1) % 3], v[(k + 2) % 3]);
        let side_c = edge_function(a, b, c);
        if side_c == 0.0 {
            return None;
        }
        let side_p = edge_function(a, b, p);
        if side_p == 0.0 {
            // Inward normal of the edge, oriented toward c.
            let (lo, hi) = if (a[0], a[1]) <= (b[0], b[1]) { (a, b) } else { (b, a) };
            let s = edge_function(lo, hi, c).signum();
            let nx = -(hi[1] - lo[1]) * s;
            let ny = (hi[0] - lo[0]) * s;
            if !(ny > 0.0 || (ny == 0.0 && nx > 0.0)) {
                return None;
            }
        } else if side_p.signum() != side_c.signum() {
            return None;
        }
    }

    let area = (v[1][0] - v[0][0]) * (v[2][1] - v[0][1]) - (v[1][1] - v[0][1]) * (v[2][0] - v[0][0]);
    let w0 = ((v[1][0] - x) * (v[2][1] - y) - (v[1][1] - y) * (v[2][0] - x)) / area;
    let w1 = ((v[2][0] - x) * (v[0][1] - y) - (v[2][1] - y) * (v[0][0] - x)) / area;
    let w2 = 1.0 - w0 - w1;
    Some(w0 * t.v0.z + w1 * t.v1.z + w2 * t.v2.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_cube() -> Mesh {
        Mesh::cuboid(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_distances_near_faces() {
        let t = GridTransform::axis_aligned(0.1).unwrap();
        let params = VoxelizeParams::default().with_bands(3.0, 3.0);
        let grid = voxelize(&unit_cube(), &t, &params).unwrap();

        assert_eq!(grid.class(), GridClass::LevelSet);
        assert_relative_eq!(grid.get(Coord::new(0, 4, 4)), -0.05, epsilon = 1e-6);
        assert_relative_eq!(grid.get(Coord::new(-1, 4, 4)), 0.05, epsilon = 1e-6);
        assert_relative_eq!(grid.get(Coord::new(4, 4, 11)), 0.15, epsilon = 1e-6);
        // Deep inside and far outside clamp to the band limits.
        assert_relative_eq!(grid.get(Coord::new(4, 4, 4)), -0.3, epsilon = 1e-6);
        assert_relative_eq!(grid.get(Coord::new(40, 4, 4)), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_sign_matches_cube_everywhere() {
        // Columns (k, k) run exactly along the face diagonals that split the
        // top and bottom quads.
        let t = GridTransform::axis_aligned(0.1).unwrap();
        let grid = voxelize(&unit_cube(), &t, &VoxelizeParams::default()).unwrap();

        for z in -3..13 {
            for y in -3..13 {
                for x in -3..13 {
                    let c = Coord::new(x, y, z);
                    let inside = (0..10).contains(&x) && (0..10).contains(&y) && (0..10).contains(&z);
                    assert_eq!(grid.get(c) < 0.0, inside, "cell {:?}", c);
                }
            }
        }
    }

    #[test]
    fn test_interior_bricks_become_tiles() {
        let t = GridTransform::axis_aligned(0.1).unwrap();
        let mesh = Mesh::cuboid(Point3::origin(), Point3::new(2.0, 2.0, 2.0));
        let grid = voxelize(&mesh, &t, &VoxelizeParams::default()).unwrap();

        let limit = (1.0f64 * 0.1) as f32;
        assert_eq!(grid.node(BrickCoord::new(1, 1, 1)), Some(&Node::Tile(-limit)));
        assert_eq!(grid.background(), limit);
        assert!(grid.leaf_count() > 0);
        assert!(grid.node(BrickCoord::new(5, 5, 5)).is_none());
    }

    #[test]
    fn test_sub_voxel_band_is_widened() {
        let t = GridTransform::axis_aligned(0.1).unwrap();
        let params = VoxelizeParams::default().with_bands(0.2, 0.0);
        let grid = voxelize(&unit_cube(), &t, &params).unwrap();
        assert_relative_eq!(grid.background(), 0.1, epsilon = 1e-6);
        assert_relative_eq!(grid.get(Coord::new(-1, 4, 4)), 0.05, epsilon = 1e-6);
    }

    #[test]
    fn test_rotated_transform() {
        let axes = nalgebra::Rotation3::from_axis_angle(&nalgebra::Vector3::z_axis(), 0.4).into_inner();
        let t = GridTransform::new(Point3::new(0.3, -0.2, 0.1), axes, 0.05).unwrap();
        let grid = voxelize(&unit_cube(), &t, &VoxelizeParams::default()).unwrap();

        let center = Point3::new(0.5, 0.5, 0.5);
        let idx = t.world_to_index(&center);
        let cell = Coord::new(idx.x.round() as i32, idx.y.round() as i32, idx.z.round() as i32);
        assert!(grid.get(cell) < 0.0);
        assert!(grid.sample_world(&Point3::new(3.0, 0.5, 0.5)) > 0.0);
    }

    #[test]
    fn test_empty_mesh_is_invalid() {
        let t = GridTransform::axis_aligned(1.0).unwrap();
        let err = voxelize(&Mesh::new(), &t, &VoxelizeParams::default()).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidMesh { .. }));
    }

    #[test]
    fn test_zero_area_mesh_is_invalid() {
        let mut mesh = Mesh::new();
        for _ in 0..3 {
            mesh.push_vertex(Point3::new(1.0, 1.0, 1.0));
        }
        mesh.polygons.push(fogmix_mesh::Polygon::Triangle([0, 1, 2]));
        let t = GridTransform::axis_aligned(1.0).unwrap();
        let err = voxelize(&mesh, &t, &VoxelizeParams::default()).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidMesh { .. }));
    }

    #[test]
    fn test_negative_band_is_rejected() {
        let t = GridTransform::axis_aligned(1.0).unwrap();
        let params = VoxelizeParams::default().with_bands(-1.0, 1.0);
        let err = voxelize(&unit_cube(), &t, &params).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidParameter { .. }));
    }

    #[test]
    fn test_grid_too_large() {
        let t = GridTransform::axis_aligned(0.001).unwrap();
        let params = VoxelizeParams::default().with_max_voxels(1_000_000);
        let err = voxelize(&unit_cube(), &t, &params).unwrap_err();
        match err {
            VolumeError::GridTooLarge { total, max, .. } => {
                assert!(total > max);
                assert_eq!(max, 1_000_000);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_shared_edge_column_counts_once() {
        // Two triangles of a square split along x = y; the column (1, 1) lies on the diagonal.
        let a = Triangle::new(
            Point3::new(0.0, 0.0, 2.0),
            Point3::new(3.0, 0.0, 2.0),
            Point3::new(3.0, 3.0, 2.0),
        );
        let b = Triangle::new(
            Point3::new(0.0, 0.0, 2.0),
            Point3::new(3.0, 3.0, 2.0),
            Point3::new(0.0, 3.0, 2.0),
        );
        let hits = [a, b]
            .iter()
            .filter(|t| crossing_height(t, 1.0, 1.0).is_some())
            .count();
        assert_eq!(hits, 1);

        // Same for the opposite winding.
        let flipped = [
            Triangle::new(a.v0, a.v2, a.v1),
            Triangle::new(b.v0, b.v2, b.v1),
        ];
        let hits = flipped
            .iter()
            .filter(|t| crossing_height(t, 1.0, 1.0).is_some())
            .count();
        assert_eq!(hits, 1);
    }
}
