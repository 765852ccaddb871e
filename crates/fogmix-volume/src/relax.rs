//! Taubin λ/μ surface relaxation.
//!
//! Alternating a shrinking Laplacian step (λ > 0) with an inflating one
//! (μ < −λ) removes the lattice staircase without the volume loss of plain
//! Laplacian smoothing. Only positions move.

use fogmix_mesh::Mesh;
use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

/// Shrinking step factor.
pub const TAUBIN_LAMBDA: f64 = 0.33;

/// Inflating step factor.
pub const TAUBIN_MU: f64 = -0.34;

/// Number of λ/μ iterations for an adaptivity value.
pub fn iterations_for(adaptivity: f64) -> usize {
    if adaptivity > 0.0 {
        (adaptivity * 10.0).ceil() as usize
    } else {
        0
    }
}

/// Run `iterations` λ/μ iteration pairs over the mesh's edge graph.
pub fn taubin_smooth(mesh: &mut Mesh, iterations: usize, lambda: f64, mu: f64) {
    if iterations == 0 || mesh.vertices.is_empty() {
        return;
    }

    let neighbors = edge_neighbors(mesh);
    let mut positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();

    for _ in 0..iterations {
        positions = laplacian_step(&positions, &neighbors, lambda);
        positions = laplacian_step(&positions, &neighbors, mu);
    }

    for (vertex, p) in mesh.vertices.iter_mut().zip(positions) {
        vertex.position = p;
        vertex.normal = None;
    }
    debug!(
        "Relaxed {} vertices with {} Taubin iterations (λ={}, μ={})",
        mesh.vertices.len(),
        iterations,
        lambda,
        mu
    );
}

fn edge_neighbors(mesh: &Mesh) -> Vec<Vec<u32>> {
    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); mesh.vertices.len()];
    for poly in &mesh.polygons {
        for (a, b) in poly.edges() {
            neighbors[a as usize].push(b);
            neighbors[b as usize].push(a);
        }
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }
    neighbors
}

fn laplacian_step(positions: &[Point3<f64>], neighbors: &[Vec<u32>], factor: f64) -> Vec<Point3<f64>> {
    positions
        .par_iter()
        .zip(neighbors.par_iter())
        .map(|(p, ring)| {
            if ring.is_empty() {
                return *p;
            }
            let sum = ring
                .iter()
                .fold(nalgebra::Vector3::zeros(), |acc, &n| acc + positions[n as usize].coords);
            let centroid = Point3::from(sum / ring.len() as f64);
            p + (centroid - p) * factor
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fogmix_mesh::Polygon;

    #[test]
    fn test_iteration_count() {
        assert_eq!(iterations_for(0.0), 0);
        assert_eq!(iterations_for(0.05), 1);
        assert_eq!(iterations_for(0.1), 1);
        assert_eq!(iterations_for(0.25), 3);
        assert_eq!(iterations_for(-1.0), 0);
    }

    #[test]
    fn test_topology_is_unchanged() {
        let mut mesh = Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let polygons = mesh.polygons.clone();
        taubin_smooth(&mut mesh, 5, TAUBIN_LAMBDA, TAUBIN_MU);
        assert_eq!(mesh.polygons, polygons);
        assert_eq!(mesh.vertex_count(), 8);
        assert!(mesh.volume() > 0.0);
    }

    #[test]
    fn test_planar_grid_stays_planar() {
        let mut mesh = Mesh::new();
        for y in 0..4 {
            for x in 0..4 {
                mesh.push_vertex(Point3::new(x as f64, y as f64, 2.0));
            }
        }
        for y in 0..3u32 {
            for x in 0..3u32 {
                let i = y * 4 + x;
                mesh.polygons.push(Polygon::Quad([i, i + 1, i + 5, i + 4]));
            }
        }
        taubin_smooth(&mut mesh, 10, TAUBIN_LAMBDA, TAUBIN_MU);
        for v in &mesh.vertices {
            assert_relative_eq!(v.position.z, 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_spike_is_damped() {
        let mut mesh = Mesh::new();
        let center = mesh.push_vertex(Point3::new(0.0, 0.0, 1.0));
        let ring: Vec<u32> = (0..6)
            .map(|k| {
                let a = k as f64 * std::f64::consts::PI / 3.0;
                mesh.push_vertex(Point3::new(a.cos(), a.sin(), 0.0))
            })
            .collect();
        for k in 0..6 {
            mesh.polygons
                .push(Polygon::Triangle([center, ring[k], ring[(k + 1) % 6]]));
        }
        taubin_smooth(&mut mesh, 3, TAUBIN_LAMBDA, TAUBIN_MU);
        assert!(mesh.vertices[center as usize].position.z < 1.0);
    }
}
