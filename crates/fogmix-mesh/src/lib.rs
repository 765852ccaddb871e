//! Polygon mesh model, ingestion and file I/O for the fogmix pipeline.
//!
//! This crate covers everything that happens before a mesh becomes a volume
//! and after a volume becomes a mesh again:
//!
//! - **Model**: indexed vertices plus triangle and quad polygons
//! - **Loading/Saving**: STL, OBJ, PLY and 3MF formats
//! - **Validation**: watertightness, manifoldness, orientation, volume
//! - **Ingestion**: world-matrix placement and topology checks through [`MeshSource`]
//!
//! # Example
//!
//! ```no_run
//! use fogmix_mesh::{ingest, FileSource, IngestParams};
//! use nalgebra::{Matrix4, Vector3};
//!
//! let source = FileSource::new("part.obj")
//!     .with_world(Matrix4::new_translation(&Vector3::new(0.5, 0.0, 0.0)));
//! let ingested = ingest(&source, &IngestParams::default()).unwrap();
//! println!("{}", ingested.report);
//! ```

mod error;
mod types;

pub mod adjacency;
pub mod ingest;
pub mod io;
pub mod repair;
pub mod validate;

pub use error::{MeshError, MeshResult};
pub use types::{Mesh, Polygon, Triangle, Vertex};

pub use adjacency::MeshAdjacency;

pub use ingest::{
    ingest, FileSource, InMemorySource, IngestParams, IngestedMesh, MeshSource, SourceMesh,
    WeldPolicy,
};
pub use io::{load_mesh, save_mesh, MeshFormat};
pub use repair::{clean_mesh, compute_vertex_normals, CleanParams, CleanReport};
pub use validate::{validate_mesh, MeshReport};

// Convenience methods on Mesh
impl Mesh {
    /// Load a mesh from a file, auto-detecting format from extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> MeshResult<Self> {
        io::load_mesh(path.as_ref())
    }

    /// Save the mesh to a file, auto-detecting format from extension.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> MeshResult<()> {
        io::save_mesh(self, path.as_ref())
    }

    /// Validate the mesh and return a report.
    pub fn validate(&self) -> MeshReport {
        validate::validate_mesh(self)
    }
}
