//! Mesh ingestion: load a source, sanity-check it and place it in world space.
//!
//! A [`MeshSource`] yields a [`SourceMesh`], a mesh in local coordinates
//! paired with its 4×4 world matrix. [`ingest`] turns that into an
//! [`IngestedMesh`] whose points are already in world space and whose
//! topology has been checked closely enough for inside/outside queries.

use std::path::{Path, PathBuf};

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::io::{load_mesh, MeshFormat};
use crate::repair::{clean_mesh, CleanParams, CleanReport};
use crate::validate::{log_validation, validate_mesh, MeshReport};
use crate::Mesh;

/// A named mesh in local coordinates plus its world matrix.
#[derive(Debug, Clone)]
pub struct SourceMesh {
    pub name: String,
    pub mesh: Mesh,
    pub world: Matrix4<f64>,
    /// The storage format repeats vertices per polygon.
    pub unshared_vertices: bool,
}

/// Anything that can produce a [`SourceMesh`].
pub trait MeshSource: Send + Sync {
    /// Human-readable label used in logs and error messages.
    fn name(&self) -> &str;

    fn load(&self) -> MeshResult<SourceMesh>;
}

/// A mesh file on disk with a world matrix.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    world: Matrix4<f64>,
}

impl FileSource {
    /// Source with an identity world matrix, named after the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            world: Matrix4::identity(),
        }
    }

    pub fn with_world(mut self, world: Matrix4<f64>) -> Self {
        self.world = world;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MeshSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> MeshResult<SourceMesh> {
        let mesh = load_mesh(&self.path)?;
        let unshared_vertices = MeshFormat::from_path(&self.path)
            .map(|f| f.has_unshared_vertices())
            .unwrap_or(false);
        Ok(SourceMesh {
            name: self.name.clone(),
            mesh,
            world: self.world,
            unshared_vertices,
        })
    }
}

/// A mesh already in memory with a world matrix.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    name: String,
    mesh: Mesh,
    world: Matrix4<f64>,
}

impl InMemorySource {
    pub fn new(name: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            name: name.into(),
            mesh,
            world: Matrix4::identity(),
        }
    }

    pub fn with_world(mut self, world: Matrix4<f64>) -> Self {
        self.world = world;
        self
    }
}

impl MeshSource for InMemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> MeshResult<SourceMesh> {
        Ok(SourceMesh {
            name: self.name.clone(),
            mesh: self.mesh.clone(),
            world: self.world,
            unshared_vertices: false,
        })
    }
}

/// When to weld near-coincident vertices during ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeldPolicy {
    /// Weld only sources whose format stores vertices per polygon (STL).
    #[default]
    Auto,
    Always,
    Never,
}

/// Parameters for [`ingest`].
#[derive(Debug, Clone)]
pub struct IngestParams {
    pub weld: WeldPolicy,

    /// Merge distance for welding, in local units.
    pub weld_epsilon: f64,

    /// Polygons with a smaller area are dropped.
    pub degenerate_area: f64,

    /// Largest allowed fraction of boundary plus non-manifold edges.
    pub manifold_tolerance: f64,
}

impl Default for IngestParams {
    fn default() -> Self {
        Self {
            weld: WeldPolicy::Auto,
            weld_epsilon: 1e-6,
            degenerate_area: 1e-12,
            manifold_tolerance: 0.0,
        }
    }
}

impl IngestParams {
    pub fn with_weld(mut self, weld: WeldPolicy) -> Self {
        self.weld = weld;
        self
    }

    pub fn with_manifold_tolerance(mut self, tolerance: f64) -> Self {
        self.manifold_tolerance = tolerance;
        self
    }
}

/// A world-space mesh ready for voxelization.
#[derive(Debug, Clone)]
pub struct IngestedMesh {
    pub name: String,
    /// Points already multiplied by `world`.
    pub mesh: Mesh,
    pub world: Matrix4<f64>,
    pub report: MeshReport,
    pub clean: CleanReport,
}

/// Load `source`, check and clean it, and move it into world space.
pub fn ingest(source: &dyn MeshSource, params: &IngestParams) -> MeshResult<IngestedMesh> {
    let SourceMesh {
        name,
        mut mesh,
        world,
        unshared_vertices,
    } = source.load()?;

    if mesh.is_empty() {
        return Err(MeshError::EmptyMesh {
            details: format!("'{}' has no vertices or polygons", name),
        });
    }
    mesh.check_indices()?;

    if let Some(i) = mesh
        .vertices
        .iter()
        .position(|v| !v.position.coords.iter().all(|c| c.is_finite()))
    {
        return Err(MeshError::InvalidTopology {
            details: format!("'{}' vertex {} has a non-finite coordinate", name, i),
        });
    }

    if !world.iter().all(|c| c.is_finite())
        || world.fixed_view::<3, 3>(0, 0).determinant().abs() < 1e-12
    {
        return Err(MeshError::InvalidTopology {
            details: format!("'{}' world matrix is singular or non-finite", name),
        });
    }

    let weld = match params.weld {
        WeldPolicy::Auto => unshared_vertices,
        WeldPolicy::Always => true,
        WeldPolicy::Never => false,
    };
    let clean = clean_mesh(
        &mut mesh,
        &CleanParams::default()
            .with_weld_epsilon(weld.then_some(params.weld_epsilon))
            .with_degenerate_area(params.degenerate_area),
    );

    if mesh.is_empty() {
        return Err(MeshError::EmptyMesh {
            details: format!("'{}' has no polygons with non-zero area", name),
        });
    }

    mesh.transform(&world);

    let report = validate_mesh(&mesh);
    log_validation(&name, &report);

    if report.defect_fraction() > params.manifold_tolerance {
        return Err(MeshError::InvalidTopology {
            details: format!(
                "'{}' is not closed: {} boundary and {} non-manifold of {} edges (tolerance {})",
                name,
                report.boundary_edge_count,
                report.non_manifold_edge_count,
                report.edge_count,
                params.manifold_tolerance
            ),
        });
    }
    if !report.is_consistently_oriented {
        warn!("'{}' has inconsistent polygon winding", name);
    }
    if report.volume < 0.0 {
        warn!("'{}' encloses negative volume; normals may point inward", name);
    }

    debug!(
        "'{}' cleanup: {} welded, {} removed",
        name, clean.vertices_welded, clean.polygons_removed
    );
    info!(
        "Ingested '{}': {} vertices, {} polygons",
        name,
        mesh.vertex_count(),
        mesh.polygon_count()
    );

    Ok(IngestedMesh {
        name,
        mesh,
        world,
        report,
        clean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Polygon, Vertex};
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    fn unit_cube() -> Mesh {
        Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_world_matrix_is_applied() {
        let world = Matrix4::new_translation(&Vector3::new(2.0, 0.0, -1.0));
        let source = InMemorySource::new("cube", unit_cube()).with_world(world);

        let ingested = ingest(&source, &IngestParams::default()).unwrap();
        let (min, max) = ingested.mesh.bounds().unwrap();
        assert_relative_eq!(min.x, 2.0);
        assert_relative_eq!(max.z, 0.0);
        assert!(ingested.report.is_closed());
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let source = InMemorySource::new("empty", Mesh::new());
        let err = ingest(&source, &IngestParams::default()).unwrap_err();
        assert!(matches!(err, MeshError::EmptyMesh { .. }));
    }

    #[test]
    fn test_index_out_of_range_is_rejected() {
        let mut mesh = unit_cube();
        mesh.polygons.push(Polygon::Triangle([0, 1, 42]));
        let err = ingest(&InMemorySource::new("bad", mesh), &IngestParams::default()).unwrap_err();
        assert!(matches!(err, MeshError::IndexOutOfRange { index: 42, .. }));
    }

    #[test]
    fn test_nan_coordinate_is_rejected() {
        let mut mesh = unit_cube();
        mesh.vertices[3] = Vertex::from_coords(f64::NAN, 0.0, 0.0);
        let err = ingest(&InMemorySource::new("nan", mesh), &IngestParams::default()).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTopology { .. }));
    }

    #[test]
    fn test_open_mesh_respects_tolerance() {
        let mut mesh = unit_cube();
        mesh.polygons.pop();

        let strict = ingest(&InMemorySource::new("open", mesh.clone()), &IngestParams::default());
        assert!(matches!(strict, Err(MeshError::InvalidTopology { .. })));

        // 4 of 12 edges are on the hole boundary.
        let lenient = IngestParams::default().with_manifold_tolerance(0.5);
        assert!(ingest(&InMemorySource::new("open", mesh), &lenient).is_ok());
    }

    #[test]
    fn test_all_degenerate_is_empty() {
        let mut mesh = Mesh::new();
        mesh.push_vertex(Point3::origin());
        mesh.push_vertex(Point3::new(1.0, 0.0, 0.0));
        mesh.push_vertex(Point3::new(2.0, 0.0, 0.0));
        mesh.polygons.push(Polygon::Triangle([0, 1, 2]));
        let err = ingest(&InMemorySource::new("flat", mesh), &IngestParams::default()).unwrap_err();
        assert!(matches!(err, MeshError::EmptyMesh { .. }));
    }

    #[test]
    fn test_singular_world_matrix_is_rejected() {
        let world = Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 0.0, 1.0));
        let source = InMemorySource::new("squashed", unit_cube()).with_world(world);
        assert!(ingest(&source, &IngestParams::default()).is_err());
    }

    #[test]
    fn test_file_source_welds_stl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.stl");
        crate::io::save_stl(&unit_cube(), &path).unwrap();

        let source = FileSource::new(&path);
        assert_eq!(source.name(), "cube.stl");
        let ingested = ingest(&source, &IngestParams::default()).unwrap();
        assert_eq!(ingested.mesh.vertex_count(), 8);
        assert!(ingested.report.is_closed());
        assert_relative_eq!(ingested.report.volume, 1.0, epsilon = 1e-6);
    }
}
