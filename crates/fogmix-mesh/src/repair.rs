//! Mesh cleanup operations: degenerate removal, welding, compaction, normals.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use serde::Serialize;
use tracing::{debug, info};

use crate::{Mesh, Polygon, Triangle};

/// Parameters for [`clean_mesh`].
#[derive(Debug, Clone)]
pub struct CleanParams {
    /// Distance below which vertices are merged. `None` skips welding.
    pub weld_epsilon: Option<f64>,
    /// Polygons with area below this are dropped.
    pub degenerate_area: f64,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            weld_epsilon: Some(1e-6),
            degenerate_area: 1e-12,
        }
    }
}

impl CleanParams {
    pub fn with_weld_epsilon(mut self, epsilon: Option<f64>) -> Self {
        self.weld_epsilon = epsilon;
        self
    }

    pub fn with_degenerate_area(mut self, area: f64) -> Self {
        self.degenerate_area = area;
        self
    }
}

/// Summary of what [`clean_mesh`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub vertices_welded: usize,
    pub polygons_collapsed: usize,
    pub polygons_removed: usize,
    pub duplicates_removed: usize,
    pub vertices_removed: usize,
}

/// Area of a polygon, summing its triangle split.
fn polygon_area(mesh: &Mesh, poly: &Polygon) -> f64 {
    poly.triangles()
        .map(|[a, b, c]| {
            Triangle::new(
                mesh.vertices[a as usize].position,
                mesh.vertices[b as usize].position,
                mesh.vertices[c as usize].position,
            )
            .area()
        })
        .sum()
}

/// Turn quads with one repeated corner into triangles.
///
/// Returns the number of quads collapsed.
pub fn collapse_degenerate_quads(mesh: &mut Mesh) -> usize {
    let mut collapsed = 0;
    for poly in &mut mesh.polygons {
        if let Polygon::Quad(q) = *poly {
            let repeated = (0..4).find(|&i| q[i] == q[(i + 1) % 4]);
            if let Some(i) = repeated {
                let kept: Vec<u32> = (0..4).filter(|&k| k != i).map(|k| q[k]).collect();
                *poly = Polygon::Triangle([kept[0], kept[1], kept[2]]);
                collapsed += 1;
            }
        }
    }
    collapsed
}

/// Remove polygons with repeated corners or area below threshold.
///
/// Returns the number of polygons removed.
pub fn remove_degenerate_polygons(mesh: &mut Mesh, area_threshold: f64) -> usize {
    let original_count = mesh.polygons.len();

    let polygons = std::mem::take(&mut mesh.polygons);
    mesh.polygons = polygons
        .into_iter()
        .filter(|poly| !poly.has_repeated_index() && polygon_area(mesh, poly) >= area_threshold)
        .collect();

    let removed = original_count - mesh.polygons.len();
    if removed > 0 {
        info!(
            "Removed {} degenerate polygons (area < {:.3e})",
            removed, area_threshold
        );
    }
    removed
}

/// Weld vertices that are within epsilon distance of each other.
///
/// Uses spatial hashing. Returns the number of vertices merged. Polygon
/// indices are remapped; the vertex array keeps its length until
/// [`remove_unreferenced_vertices`] compacts it.
pub fn weld_vertices(mesh: &mut Mesh, epsilon: f64) -> usize {
    let original_count = mesh.vertices.len();
    if original_count == 0 || epsilon <= 0.0 {
        return 0;
    }

    let cell_size = epsilon * 2.0;

    let mut spatial_hash: HashMap<(i64, i64, i64), Vec<u32>> = HashMap::new();
    for (idx, vertex) in mesh.vertices.iter().enumerate() {
        let cell = pos_to_cell(&vertex.position, cell_size);
        spatial_hash.entry(cell).or_default().push(idx as u32);
    }

    // Canonical representative is the smallest index in the cluster.
    let mut vertex_remap: Vec<u32> = (0..original_count as u32).collect();
    let mut merged_count = 0;

    for (idx, vertex) in mesh.vertices.iter().enumerate() {
        let idx = idx as u32;
        if vertex_remap[idx as usize] != idx {
            continue;
        }

        let cell = pos_to_cell(&vertex.position, cell_size);

        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let neighbor_cell = (cell.0 + dx, cell.1 + dy, cell.2 + dz);
                    let Some(candidates) = spatial_hash.get(&neighbor_cell) else {
                        continue;
                    };
                    for &other_idx in candidates {
                        if other_idx <= idx || vertex_remap[other_idx as usize] != other_idx {
                            continue;
                        }
                        let other_pos = &mesh.vertices[other_idx as usize].position;
                        if (vertex.position - other_pos).norm() < epsilon {
                            vertex_remap[other_idx as usize] = idx;
                            merged_count += 1;
                        }
                    }
                }
            }
        }
    }

    if merged_count == 0 {
        return 0;
    }

    for poly in &mut mesh.polygons {
        for i in poly.indices_mut() {
            *i = vertex_remap[*i as usize];
        }
    }

    info!(
        "Welded {} vertices (epsilon = {:.3e}): {} → {}",
        merged_count,
        epsilon,
        original_count,
        original_count - merged_count
    );

    merged_count
}

/// Remove polygons that use the same vertex set as an earlier polygon.
///
/// Returns the number of duplicates removed.
pub fn remove_duplicate_polygons(mesh: &mut Mesh) -> usize {
    let original_count = mesh.polygons.len();
    let mut seen: HashSet<Vec<u32>> = HashSet::new();

    mesh.polygons.retain(|poly| {
        let mut key = poly.indices().to_vec();
        key.sort_unstable();
        seen.insert(key)
    });

    let removed = original_count - mesh.polygons.len();
    if removed > 0 {
        info!("Removed {} duplicate polygons", removed);
    }
    removed
}

/// Remove unreferenced vertices and compact the vertex array.
///
/// Returns the number of vertices removed.
pub fn remove_unreferenced_vertices(mesh: &mut Mesh) -> usize {
    let original_count = mesh.vertices.len();

    let mut referenced = vec![false; original_count];
    for poly in &mesh.polygons {
        for &i in poly.indices() {
            referenced[i as usize] = true;
        }
    }

    if referenced.iter().all(|&r| r) {
        return 0;
    }

    let mut remap = vec![u32::MAX; original_count];
    let mut new_vertices = Vec::with_capacity(original_count);
    for (old_idx, vertex) in mesh.vertices.iter().enumerate() {
        if referenced[old_idx] {
            remap[old_idx] = new_vertices.len() as u32;
            new_vertices.push(vertex.clone());
        }
    }

    for poly in &mut mesh.polygons {
        for i in poly.indices_mut() {
            *i = remap[*i as usize];
        }
    }

    let removed = original_count - new_vertices.len();
    mesh.vertices = new_vertices;

    if removed > 0 {
        debug!("Removed {} unreferenced vertices", removed);
    }

    removed
}

/// Weld, collapse, drop degenerate and duplicate polygons, then compact.
pub fn clean_mesh(mesh: &mut Mesh, params: &CleanParams) -> CleanReport {
    let initial_verts = mesh.vertex_count();
    let initial_polys = mesh.polygon_count();

    let mut report = CleanReport::default();
    if let Some(epsilon) = params.weld_epsilon {
        report.vertices_welded = weld_vertices(mesh, epsilon);
    }
    report.polygons_collapsed = collapse_degenerate_quads(mesh);
    report.polygons_removed = remove_degenerate_polygons(mesh, params.degenerate_area);
    report.duplicates_removed = remove_duplicate_polygons(mesh);
    report.vertices_removed = remove_unreferenced_vertices(mesh);

    debug!(
        "Clean: {} verts → {}, {} polygons → {}",
        initial_verts,
        mesh.vertex_count(),
        initial_polys,
        mesh.polygon_count()
    );

    report
}

/// Compute vertex normals as area-weighted average of adjacent polygon normals.
pub fn compute_vertex_normals(mesh: &mut Mesh) {
    let mut normal_accum: Vec<Vector3<f64>> = vec![Vector3::zeros(); mesh.vertices.len()];

    for poly in &mesh.polygons {
        for [a, b, c] in poly.triangles() {
            let tri = Triangle::new(
                mesh.vertices[a as usize].position,
                mesh.vertices[b as usize].position,
                mesh.vertices[c as usize].position,
            );
            // Unnormalized normal has length 2*area, so this is area weighting.
            let weighted_normal = tri.normal_unnormalized();
            normal_accum[a as usize] += weighted_normal;
            normal_accum[b as usize] += weighted_normal;
            normal_accum[c as usize] += weighted_normal;
        }
    }

    for (vertex, accum) in mesh.vertices.iter_mut().zip(normal_accum) {
        let len_sq = accum.norm_squared();
        vertex.normal = (len_sq > f64::EPSILON).then(|| accum / len_sq.sqrt());
    }

    debug!("Computed vertex normals for {} vertices", mesh.vertices.len());
}

fn pos_to_cell(pos: &Point3<f64>, cell_size: f64) -> (i64, i64, i64) {
    (
        (pos.x / cell_size).floor() as i64,
        (pos.y / cell_size).floor() as i64,
        (pos.z / cell_size).floor() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;
    use approx::assert_relative_eq;

    fn simple_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(10.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 10.0, 0.0));
        mesh.polygons.push(Polygon::Triangle([0, 1, 2]));
        mesh
    }

    /// Cube with every face carrying its own four vertices, as STL stores it.
    fn unshared_cube() -> Mesh {
        let shared = Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let mut mesh = Mesh::new();
        for poly in &shared.polygons {
            let mut q = [0u32; 4];
            for (k, &i) in poly.indices().iter().enumerate() {
                q[k] = mesh.push_vertex(shared.vertices[i as usize].position);
            }
            mesh.polygons.push(Polygon::Quad(q));
        }
        mesh
    }

    #[test]
    fn test_remove_degenerate_polygons() {
        let mut mesh = simple_mesh();
        mesh.vertices.push(Vertex::from_coords(5.0, 0.0, 0.0));
        mesh.polygons.push(Polygon::Triangle([0, 1, 3])); // collinear
        mesh.polygons.push(Polygon::Triangle([0, 0, 2])); // repeated index

        let removed = remove_degenerate_polygons(&mut mesh, 1e-4);
        assert_eq!(removed, 2);
        assert_eq!(mesh.polygon_count(), 1);
    }

    #[test]
    fn test_weld_vertices() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0)); // 0
        mesh.vertices.push(Vertex::from_coords(10.0, 0.0, 0.0)); // 1
        mesh.vertices.push(Vertex::from_coords(0.0, 10.0, 0.0)); // 2
        mesh.vertices.push(Vertex::from_coords(10.001, 0.0, 0.0)); // 3, near 1
        mesh.vertices.push(Vertex::from_coords(10.0, 10.0, 0.0)); // 4

        mesh.polygons.push(Polygon::Triangle([0, 1, 2]));
        mesh.polygons.push(Polygon::Triangle([3, 4, 2]));

        let merged = weld_vertices(&mut mesh, 0.01);
        assert_eq!(merged, 1);
        assert_eq!(mesh.polygons[1], Polygon::Triangle([1, 4, 2]));
    }

    #[test]
    fn test_clean_welds_unshared_cube_into_closed_mesh() {
        let mut mesh = unshared_cube();
        assert_eq!(mesh.vertex_count(), 24);

        let report = clean_mesh(&mut mesh, &CleanParams::default());
        assert_eq!(report.vertices_welded, 16);
        assert_eq!(report.vertices_removed, 16);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.polygon_count(), 6);
        assert!(crate::validate_mesh(&mesh).is_closed());
    }

    #[test]
    fn test_collapse_quad_with_repeated_corner() {
        let mut mesh = simple_mesh();
        mesh.polygons = vec![Polygon::Quad([0, 1, 1, 2])];
        assert_eq!(collapse_degenerate_quads(&mut mesh), 1);
        assert_eq!(mesh.polygons[0], Polygon::Triangle([0, 1, 2]));
    }

    #[test]
    fn test_remove_duplicate_polygons() {
        let mut mesh = simple_mesh();
        mesh.polygons.push(Polygon::Triangle([2, 1, 0]));
        assert_eq!(remove_duplicate_polygons(&mut mesh), 1);
    }

    #[test]
    fn test_remove_unreferenced() {
        let mut mesh = simple_mesh();
        mesh.vertices.insert(0, Vertex::from_coords(100.0, 100.0, 100.0));
        mesh.polygons[0] = Polygon::Triangle([1, 2, 3]);

        let removed = remove_unreferenced_vertices(&mut mesh);
        assert_eq!(removed, 1);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.polygons[0], Polygon::Triangle([0, 1, 2]));
    }

    #[test]
    fn test_compute_vertex_normals() {
        let mut mesh = simple_mesh();
        compute_vertex_normals(&mut mesh);

        for v in &mesh.vertices {
            let n = v.normal.expect("should have normal");
            assert_relative_eq!(n.x, 0.0, epsilon = 1e-10);
            assert_relative_eq!(n.y, 0.0, epsilon = 1e-10);
            assert_relative_eq!(n.z, 1.0, epsilon = 1e-10);
        }
    }
}
