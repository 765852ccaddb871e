//! Mesh validation and reporting.

use nalgebra::Point3;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::Mesh;

/// Validation report for a mesh.
#[derive(Debug, Clone, Serialize)]
pub struct MeshReport {
    /// Whether the mesh has no boundary edges.
    pub is_watertight: bool,

    /// Whether all edges have at most 2 adjacent polygons.
    pub is_manifold: bool,

    /// Whether every shared edge is traversed in opposite directions.
    pub is_consistently_oriented: bool,

    /// Number of distinct undirected edges.
    pub edge_count: usize,

    /// Number of boundary edges (edges with 1 adjacent polygon).
    pub boundary_edge_count: usize,

    /// Number of non-manifold edges (edges with >2 adjacent polygons).
    pub non_manifold_edge_count: usize,

    pub vertex_count: usize,
    pub triangle_count: usize,
    pub quad_count: usize,

    /// Bounding box as ([min x, y, z], [max x, y, z]).
    #[serde(serialize_with = "serialize_bounds")]
    pub bounds: Option<(Point3<f64>, Point3<f64>)>,

    /// Dimensions (x, y, z).
    pub dimensions: Option<(f64, f64, f64)>,

    /// Signed enclosed volume. Only meaningful for watertight meshes.
    pub volume: f64,

    pub surface_area: f64,
}

fn serialize_bounds<S>(
    bounds: &Option<(Point3<f64>, Point3<f64>)>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    bounds
        .map(|(min, max)| ([min.x, min.y, min.z], [max.x, max.y, max.z]))
        .serialize(serializer)
}

impl MeshReport {
    pub fn polygon_count(&self) -> usize {
        self.triangle_count + self.quad_count
    }

    /// Fraction of edges that are boundary or non-manifold, in [0, 1].
    pub fn defect_fraction(&self) -> f64 {
        if self.edge_count == 0 {
            return 0.0;
        }
        (self.boundary_edge_count + self.non_manifold_edge_count) as f64 / self.edge_count as f64
    }

    /// Closed, manifold and consistently oriented, so inside/outside is defined.
    pub fn is_closed(&self) -> bool {
        self.is_watertight && self.is_manifold && self.is_consistently_oriented
    }
}

impl std::fmt::Display for MeshReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Mesh Report:")?;
        writeln!(f, "  Vertices: {}", self.vertex_count)?;
        writeln!(
            f,
            "  Polygons: {} ({} triangles, {} quads)",
            self.polygon_count(),
            self.triangle_count,
            self.quad_count
        )?;

        if let Some((min, max)) = &self.bounds {
            writeln!(
                f,
                "  Bounds: [{:.3}, {:.3}, {:.3}] to [{:.3}, {:.3}, {:.3}]",
                min.x, min.y, min.z, max.x, max.y, max.z
            )?;
        }

        if let Some((dx, dy, dz)) = &self.dimensions {
            writeln!(f, "  Dimensions: {:.3} x {:.3} x {:.3}", dx, dy, dz)?;
        }

        writeln!(
            f,
            "  Watertight: {} (boundary edges: {})",
            if self.is_watertight { "yes" } else { "NO" },
            self.boundary_edge_count
        )?;

        writeln!(
            f,
            "  Manifold: {} (non-manifold edges: {})",
            if self.is_manifold { "yes" } else { "NO" },
            self.non_manifold_edge_count
        )?;

        writeln!(
            f,
            "  Oriented: {}",
            if self.is_consistently_oriented { "yes" } else { "NO" }
        )?;

        writeln!(f, "  Volume: {:.6}", self.volume)?;
        writeln!(f, "  Surface area: {:.6}", self.surface_area)?;

        Ok(())
    }
}

/// Validate a mesh and return a report.
///
/// The mesh must have all indices in range; see [`Mesh::check_indices`].
pub fn validate_mesh(mesh: &Mesh) -> MeshReport {
    let adjacency = MeshAdjacency::build(&mesh.polygons);

    let boundary_edge_count = adjacency.boundary_edge_count();
    let non_manifold_edge_count = adjacency.non_manifold_edge_count();

    let bounds = mesh.bounds();
    let dimensions = bounds.map(|(min, max)| (max.x - min.x, max.y - min.y, max.z - min.z));
    let quad_count = mesh.polygons.iter().filter(|p| p.is_quad()).count();

    let report = MeshReport {
        is_watertight: boundary_edge_count == 0,
        is_manifold: non_manifold_edge_count == 0,
        is_consistently_oriented: adjacency.is_consistently_oriented(),
        edge_count: adjacency.edge_count(),
        boundary_edge_count,
        non_manifold_edge_count,
        vertex_count: mesh.vertex_count(),
        triangle_count: mesh.polygon_count() - quad_count,
        quad_count,
        bounds,
        dimensions,
        volume: mesh.volume(),
        surface_area: mesh.surface_area(),
    };

    if !report.is_watertight {
        warn!(
            "Mesh is not watertight: {} boundary edges",
            boundary_edge_count
        );
    }

    if !report.is_manifold {
        warn!(
            "Mesh is not manifold: {} non-manifold edges",
            non_manifold_edge_count
        );
    }

    debug!("{}", report);

    report
}

/// Log a summary of mesh validation.
pub fn log_validation(name: &str, report: &MeshReport) {
    let dims = report.dimensions.unwrap_or_default();
    info!(
        "{}: {} verts, {} polygons, {:.3}x{:.3}x{:.3}",
        name,
        report.vertex_count,
        report.polygon_count(),
        dims.0,
        dims.1,
        dims.2,
    );

    if !report.is_closed() {
        warn!(
            "{}: not closed ({} boundary, {} non-manifold edges)",
            name, report.boundary_edge_count, report.non_manifold_edge_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Polygon, Vertex};
    use approx::assert_relative_eq;

    fn single_triangle() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.polygons.push(Polygon::Triangle([0, 1, 2]));
        mesh
    }

    #[test]
    fn test_validate_quad_cube() {
        let mesh = Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let report = validate_mesh(&mesh);

        assert!(report.vertex_count > 0 && report.polygon_count() > 0);
        assert!(report.is_closed());
        assert_eq!(report.quad_count, 6);
        assert_eq!(report.triangle_count, 0);
        assert_eq!(report.edge_count, 12);
        assert_relative_eq!(report.volume, 1.0, epsilon = 1e-12);
        assert_relative_eq!(report.surface_area, 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_validate_open_mesh() {
        let report = validate_mesh(&single_triangle());

        assert!(report.vertex_count > 0 && report.polygon_count() > 0);
        assert!(!report.is_watertight);
        assert!(report.is_manifold);
        assert!(!report.is_closed());
        assert_eq!(report.boundary_edge_count, 3);
        assert!((report.defect_fraction() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_report_display() {
        let mesh = Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let output = format!("{}", validate_mesh(&mesh));

        assert!(output.contains("Vertices: 8"));
        assert!(output.contains("6 quads"));
        assert!(output.contains("Watertight: yes"));
    }

    #[test]
    fn test_report_serializes_bounds_as_arrays() {
        let mesh = Mesh::cuboid(Point3::origin(), Point3::new(2.0, 1.0, 1.0));
        let json = serde_json::to_value(validate_mesh(&mesh)).unwrap();
        assert_eq!(json["bounds"][1][0], 2.0);
        assert_eq!(json["quad_count"], 6);
    }
}
