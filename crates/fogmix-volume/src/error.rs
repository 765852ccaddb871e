//! Error types for volume operations.

use std::fmt;
use std::path::PathBuf;

use fogmix_mesh::MeshError;
use thiserror::Error;

/// Result type alias for volume operations.
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Errors that can occur while voxelizing, mixing or extracting volumes.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// The input mesh cannot be voxelized.
    #[error("invalid input mesh: {details}")]
    InvalidMesh { details: String },

    /// A mix operator name that does not exist.
    #[error("unsupported mix operator {name:?} (expected multiply, add, subtract, min or max)")]
    UnsupportedOperator { name: String },

    /// The operation produced nothing.
    #[error("empty result: {details}")]
    EmptyResult { details: String },

    /// A parameter outside its valid range.
    #[error("invalid {name}: {details}")]
    InvalidParameter { name: &'static str, details: String },

    /// The dense index box of a grid would be too large.
    #[error("grid too large: {dims:?} = {total} voxels exceeds limit of {max}")]
    GridTooLarge { dims: [u64; 3], total: u64, max: u64 },

    /// A configuration file could not be read or parsed.
    #[error("bad configuration{}: {details}", .path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Config {
        path: Option<PathBuf>,
        details: String,
    },

    /// Mesh loading, saving or ingestion failed.
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

impl VolumeError {
    pub(crate) fn invalid(name: &'static str, details: impl Into<String>) -> Self {
        VolumeError::InvalidParameter {
            name,
            details: details.into(),
        }
    }

    /// Coarse classification used for reporting and exit codes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VolumeError::InvalidMesh { .. } => ErrorKind::InvalidMesh,
            VolumeError::UnsupportedOperator { .. } => ErrorKind::UnsupportedOperator,
            VolumeError::EmptyResult { .. } => ErrorKind::EmptyResult,
            VolumeError::InvalidParameter { .. }
            | VolumeError::GridTooLarge { .. }
            | VolumeError::Config { .. } => ErrorKind::InvalidParameter,
            VolumeError::Mesh(e) if e.is_io() => ErrorKind::Io,
            VolumeError::Mesh(_) => ErrorKind::InvalidMesh,
        }
    }
}

/// Error categories shared by the library and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidMesh,
    UnsupportedOperator,
    EmptyResult,
    InvalidParameter,
    Io,
}

impl ErrorKind {
    /// Process exit code for this category.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::InvalidMesh => 1,
            ErrorKind::EmptyResult => 2,
            ErrorKind::Io => 3,
            ErrorKind::UnsupportedOperator | ErrorKind::InvalidParameter => 4,
        }
    }
}

/// Which of the two mix inputs a stage was working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    A,
    B,
}

/// Pipeline stage where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Voxelize,
    Fog,
    Combine,
    Extract,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Ingest => "ingest",
            Stage::Voxelize => "voxelize",
            Stage::Fog => "sdf-to-fog",
            Stage::Combine => "combine",
            Stage::Extract => "extract",
            Stage::Output => "output",
        })
    }
}

/// A [`VolumeError`] tagged with the stage and input that raised it.
#[derive(Debug, Error)]
#[error("{stage}{}: {source}", .input.map(|i| format!(" (input {:?})", i)).unwrap_or_default())]
pub struct PipelineError {
    pub stage: Stage,
    pub input: Option<Input>,
    #[source]
    pub source: VolumeError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<VolumeError>) -> Self {
        Self {
            stage,
            input: None,
            source: source.into(),
        }
    }

    pub fn for_input(stage: Stage, input: Input, source: impl Into<VolumeError>) -> Self {
        Self {
            stage,
            input: Some(input),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

/// Attach a stage to a fallible result.
pub(crate) trait StageExt<T> {
    fn stage(self, stage: Stage, input: Option<Input>) -> Result<T, PipelineError>;
}

impl<T, E: Into<VolumeError>> StageExt<T> for Result<T, E> {
    fn stage(self, stage: Stage, input: Option<Input>) -> Result<T, PipelineError> {
        self.map_err(|e| match input {
            Some(input) => PipelineError::for_input(stage, input, e),
            None => PipelineError::new(stage, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let empty = PipelineError::new(
            Stage::Extract,
            VolumeError::EmptyResult {
                details: "no crossing".into(),
            },
        );
        assert_eq!(empty.exit_code(), 2);

        let op = VolumeError::UnsupportedOperator {
            name: "divide".into(),
        };
        assert_eq!(op.kind().exit_code(), 4);

        let io = VolumeError::from(MeshError::UnsupportedFormat {
            extension: Some("fbx".into()),
        });
        assert_eq!(io.kind(), ErrorKind::Io);
        assert_eq!(io.kind().exit_code(), 3);

        let bad = VolumeError::from(MeshError::EmptyMesh {
            details: "nothing".into(),
        });
        assert_eq!(bad.kind().exit_code(), 1);
    }

    #[test]
    fn test_display_names_stage_and_input() {
        let err = PipelineError::for_input(
            Stage::Voxelize,
            Input::B,
            VolumeError::InvalidMesh {
                details: "no area".into(),
            },
        );
        let text = err.to_string();
        assert!(text.starts_with("voxelize (input B)"), "{}", text);
        assert!(text.contains("no area"));
    }
}
