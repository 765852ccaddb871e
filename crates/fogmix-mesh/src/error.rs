//! Error types for mesh operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors that can occur while loading, saving or ingesting meshes.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Error reading from a file.
    #[error("failed to read mesh from {path}: {source}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write mesh to {path}: {source}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing mesh file format.
    #[error("failed to parse mesh from {path}: {details}")]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported mesh format: {extension:?}")]
    UnsupportedFormat { extension: Option<String> },

    /// Empty mesh (no vertices or polygons).
    #[error("mesh is empty: {details}")]
    EmptyMesh { details: String },

    /// A polygon references a vertex that does not exist.
    #[error("polygon {polygon} references vertex {index}, but the mesh has {vertex_count} vertices")]
    IndexOutOfRange {
        polygon: usize,
        index: u32,
        vertex_count: usize,
    },

    /// Invalid mesh topology.
    #[error("invalid mesh topology: {details}")]
    InvalidTopology { details: String },
}

impl MeshError {
    /// True for errors raised by the filesystem or a file parser.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            MeshError::IoRead { .. }
                | MeshError::IoWrite { .. }
                | MeshError::ParseError { .. }
                | MeshError::UnsupportedFormat { .. }
        )
    }
}
