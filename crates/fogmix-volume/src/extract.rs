//! Iso-surface extraction by marching tetrahedra.
//!
//! The sample lattice is cut into cubes between neighbouring cell centers and
//! every cube into six tetrahedra sharing its main diagonal. The split is the
//! same for every cube, so neighbouring tetrahedra agree on shared faces and
//! the output is closed wherever the field is.
//!
//! Surface vertices live on lattice edges and are keyed by them. Polygons from
//! different bricks that meet on an edge therefore share the vertex, which
//! keeps the mesh manifold by index after the per-brick results are merged.

use fogmix_mesh::{compute_vertex_normals, Mesh, Polygon};
use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{VolumeError, VolumeResult};
use crate::grid::{BrickCoord, Coord, GridClass, Node, SparseGrid, BRICK_SIZE};
use crate::relax::{iterations_for, taubin_smooth, TAUBIN_LAMBDA, TAUBIN_MU};

/// Corner bits: 1 = +X, 2 = +Y, 4 = +Z. Each row is a monotone path 0 → 7.
const TETRAHEDRA: [[u8; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 1, 5, 7],
    [0, 2, 3, 7],
    [0, 2, 6, 7],
    [0, 4, 5, 7],
    [0, 4, 6, 7],
];

/// Samples per block edge: one brick of cube origins plus the far corners.
const BLOCK: usize = BRICK_SIZE as usize + 1;

/// Parameters for [`extract_surface`].
#[derive(Debug, Clone, Copy)]
pub struct ExtractParams {
    /// Iso value separating inside from outside.
    pub threshold: f64,
    /// Relaxation strength; 0 keeps the raw lattice surface.
    pub adaptivity: f64,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            adaptivity: 0.05,
        }
    }
}

impl ExtractParams {
    pub fn new(threshold: f64, adaptivity: f64) -> Self {
        Self {
            threshold,
            adaptivity,
        }
    }
}

/// Lattice edge from `base` along the corner bits `dir`.
type EdgeKey = (Coord, u8);

#[derive(Default)]
struct BrickSurface {
    keys: Vec<EdgeKey>,
    positions: Vec<Point3<f64>>,
    polygons: Vec<Polygon>,
}

/// Extract the `threshold` iso-surface of a grid as a closed mesh in world space.
///
/// Fog volumes are inside above the threshold, level sets below it.
pub fn extract_surface(grid: &SparseGrid, params: &ExtractParams) -> VolumeResult<Mesh> {
    if !params.threshold.is_finite() {
        return Err(VolumeError::invalid("threshold", "must be finite"));
    }
    if !params.adaptivity.is_finite() || params.adaptivity < 0.0 {
        return Err(VolumeError::invalid(
            "adaptivity",
            format!("must be a finite value >= 0, got {}", params.adaptivity),
        ));
    }

    let iso = params.threshold as f32;
    let class = grid.class();
    let inside = move |v: f32| match class {
        GridClass::Fog => v > iso,
        GridClass::LevelSet => v < iso,
    };

    if inside(grid.background()) {
        return Err(VolumeError::invalid(
            "threshold",
            format!(
                "{} classifies the background value {} as inside; the surface would be unbounded",
                params.threshold,
                grid.background()
            ),
        ));
    }

    let mut origins: HashSet<BrickCoord> = HashSet::new();
    for (&b, _) in grid.nodes() {
        for corner in 0..8 {
            let (dx, dy, dz) = corner_offset(corner);
            origins.insert(b.offset(-dx, -dy, -dz));
        }
    }
    let mut origins: Vec<BrickCoord> = origins.into_iter().collect();
    origins.sort_unstable();

    let surfaces: Vec<BrickSurface> = origins
        .into_par_iter()
        .filter_map(|b| polygonize_brick(grid, b, iso, &inside))
        .collect();

    let mirrored = grid.transform().axes().determinant() < 0.0;
    let mut mesh = merge(grid, surfaces, mirrored);

    if mesh.polygons.is_empty() {
        return Err(VolumeError::EmptyResult {
            details: format!("no cell crosses the threshold {}", params.threshold),
        });
    }

    let iterations = iterations_for(params.adaptivity);
    if iterations > 0 {
        taubin_smooth(&mut mesh, iterations, TAUBIN_LAMBDA, TAUBIN_MU);
    }
    compute_vertex_normals(&mut mesh);

    info!(
        "Extracted iso-surface at {}: {} vertices, {} polygons ({} relaxation iterations)",
        params.threshold,
        mesh.vertex_count(),
        mesh.polygon_count(),
        iterations
    );
    Ok(mesh)
}

#[inline]
fn corner_offset(corner: u8) -> (i32, i32, i32) {
    (
        (corner & 1) as i32,
        ((corner >> 1) & 1) as i32,
        ((corner >> 2) & 1) as i32,
    )
}

#[inline]
fn block_index(i: usize, j: usize, k: usize) -> usize {
    i + BLOCK * (j + BLOCK * k)
}

/// Polygons for every cube whose origin lies in `brick`, or `None` if no cube crosses.
fn polygonize_brick(
    grid: &SparseGrid,
    brick: BrickCoord,
    iso: f32,
    inside: &(impl Fn(f32) -> bool + Sync),
) -> Option<BrickSurface> {
    let neighbours: [Option<&Node>; 8] = std::array::from_fn(|c| {
        let (dx, dy, dz) = corner_offset(c as u8);
        grid.node(brick.offset(dx, dy, dz))
    });

    let mut uniform: Option<bool> = None;
    let mut mixed = false;
    for n in &neighbours {
        let class = match n {
            None => inside(grid.background()),
            Some(Node::Tile(v)) => inside(*v),
            Some(Node::Leaf(_)) => {
                mixed = true;
                break;
            }
        };
        match uniform {
            None => uniform = Some(class),
            Some(u) if u != class => {
                mixed = true;
                break;
            }
            _ => {}
        }
    }
    if !mixed {
        return None;
    }

    let block = gather(grid, &neighbours);
    let origin = brick.origin();
    let mut out = BrickSurface::default();
    let mut lookup: HashMap<EdgeKey, u32> = HashMap::new();

    for k in 0..BRICK_SIZE as usize {
        for j in 0..BRICK_SIZE as usize {
            for i in 0..BRICK_SIZE as usize {
                let mut values = [0.0f32; 8];
                let mut mask = 0u8;
                for c in 0..8u8 {
                    let (dx, dy, dz) = corner_offset(c);
                    let v = block[block_index(i + dx as usize, j + dy as usize, k + dz as usize)];
                    values[c as usize] = v;
                    if inside(v) {
                        mask |= 1 << c;
                    }
                }
                if mask == 0 || mask == 0xff {
                    continue;
                }

                let cube = origin.offset(i as i32, j as i32, k as i32);
                for tet in &TETRAHEDRA {
                    polygonize_tet(cube, tet, &values, mask, iso, &mut out, &mut lookup);
                }
            }
        }
    }

    (!out.polygons.is_empty()).then_some(out)
}

/// Sample values for the 9×9×9 corner block of a brick's cubes.
fn gather(grid: &SparseGrid, neighbours: &[Option<&Node>; 8]) -> Vec<f32> {
    let background = grid.background();
    let mut block = vec![0.0f32; BLOCK * BLOCK * BLOCK];
    let size = BRICK_SIZE as usize;
    for k in 0..BLOCK {
        for j in 0..BLOCK {
            for i in 0..BLOCK {
                let corner = (i / size) | ((j / size) << 1) | ((k / size) << 2);
                let local = Coord::new((i % size) as i32, (j % size) as i32, (k % size) as i32);
                block[block_index(i, j, k)] = neighbours[corner]
                    .map_or(background, |n| n.get(local.local_index()));
            }
        }
    }
    block
}

fn polygonize_tet(
    cube: Coord,
    tet: &[u8; 4],
    values: &[f32; 8],
    mask: u8,
    iso: f32,
    out: &mut BrickSurface,
    lookup: &mut HashMap<EdgeKey, u32>,
) {
    let flags = tet.map(|c| mask & (1 << c) != 0);
    let count = flags.iter().filter(|&&f| f).count();
    if count == 0 || count == 4 {
        return;
    }

    let corner_pos = |slot: usize| {
        let (dx, dy, dz) = corner_offset(tet[slot]);
        Point3::new(
            (cube.x + dx) as f64,
            (cube.y + dy) as f64,
            (cube.z + dz) as f64,
        )
    };

    // Tet slots are in path order, so `a < b` always points along +bits.
    let mut vertex = |a: usize, b: usize| -> u32 {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let (ca, cb) = (tet[a], tet[b]);
        let (dx, dy, dz) = corner_offset(ca);
        let key = (cube.offset(dx, dy, dz), ca ^ cb);
        *lookup.entry(key).or_insert_with(|| {
            let (va, vb) = (values[ca as usize] as f64, values[cb as usize] as f64);
            let t = ((iso as f64 - va) / (vb - va)).clamp(0.0, 1.0);
            let pa = corner_pos(a);
            out.keys.push(key);
            out.positions.push(pa + (corner_pos(b) - pa) * t);
            (out.positions.len() - 1) as u32
        })
    };

    let (polygon, outward): (Polygon, Vector3<f64>) = if count == 2 {
        let ins: Vec<usize> = (0..4).filter(|&s| flags[s]).collect();
        let outs: Vec<usize> = (0..4).filter(|&s| !flags[s]).collect();
        let (a, b, c, d) = (ins[0], ins[1], outs[0], outs[1]);
        let quad = [vertex(a, c), vertex(a, d), vertex(b, d), vertex(b, c)];
        let dir = (corner_pos(c).coords + corner_pos(d).coords) - (corner_pos(a).coords + corner_pos(b).coords);
        (Polygon::Quad(quad), dir)
    } else {
        let lone_inside = count == 1;
        let s = (0..4).find(|&s| flags[s] == lone_inside).unwrap_or(0);
        let others: Vec<usize> = (0..4).filter(|&o| o != s).collect();
        let tri = [vertex(s, others[0]), vertex(s, others[1]), vertex(s, others[2])];
        let centroid = others.iter().fold(Vector3::zeros(), |acc, &o| acc + corner_pos(o).coords) / 3.0;
        let dir = if lone_inside {
            centroid - corner_pos(s).coords
        } else {
            corner_pos(s).coords - centroid
        };
        (Polygon::Triangle(tri), dir)
    };

    let p = |i: u32| out.positions[i as usize];
    let normal = match polygon {
        Polygon::Triangle([a, b, c]) => (p(b) - p(a)).cross(&(p(c) - p(a))),
        Polygon::Quad([a, b, c, d]) => (p(c) - p(a)).cross(&(p(d) - p(b))),
    };
    let mut polygon = polygon;
    if normal.dot(&outward) < 0.0 {
        polygon.flip();
    }
    out.polygons.push(polygon);
}

/// Concatenate per-brick surfaces, sharing vertices with equal edge keys.
fn merge(grid: &SparseGrid, surfaces: Vec<BrickSurface>, mirrored: bool) -> Mesh {
    let transform = grid.transform();
    let mut mesh = Mesh::new();
    let mut global: HashMap<EdgeKey, u32> = HashMap::new();
    let mut shared = 0usize;

    for surface in surfaces {
        let remap: Vec<u32> = surface
            .keys
            .iter()
            .zip(&surface.positions)
            .map(|(key, pos)| match global.get(key) {
                Some(&i) => {
                    shared += 1;
                    i
                }
                None => {
                    let i = mesh.push_vertex(transform.index_to_world(pos));
                    global.insert(*key, i);
                    i
                }
            })
            .collect();

        for mut polygon in surface.polygons {
            for i in polygon.indices_mut() {
                *i = remap[*i as usize];
            }
            if mirrored {
                polygon.flip();
            }
            mesh.polygons.push(polygon);
        }
    }

    debug!(
        "Merged surface: {} vertices ({} shared across bricks), {} polygons",
        mesh.vertex_count(),
        shared,
        mesh.polygon_count()
    );
    mesh
}
