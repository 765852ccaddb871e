//! Sparse volumes for mixing meshes as fog.
//!
//! Two closed meshes are each turned into a narrow-band signed distance
//! field, softened into a fog density, combined cell by cell and turned back
//! into a polygon mesh:
//!
//! - **Grid**: 8×8×8 brick storage with tiles for uniform regions ([`SparseGrid`])
//! - **Voxelize**: exact narrow-band distance with ray-parity sign ([`voxelize()`])
//! - **Fog**: distance to density with a linear or smoothstep ramp ([`sdf_to_fog`])
//! - **Combine**: multiply, add, subtract, min or max of two fogs ([`combine()`])
//! - **Extract**: closed iso-surface by marching tetrahedra ([`extract_surface`])
//! - **Pipeline**: the whole run on a configured thread pool ([`MixContext`])
//!
//! # Example
//!
//! ```no_run
//! use fogmix_mesh::FileSource;
//! use fogmix_volume::{run_mix, MixConfig, MixContext};
//!
//! let mut config = MixConfig::default();
//! config.voxelize.voxel_size = 0.05;
//! let ctx = MixContext::new(config).unwrap();
//!
//! let out = run_mix(
//!     &ctx,
//!     &FileSource::new("a.stl"),
//!     &FileSource::new("b.stl"),
//!     "mixed.stl".as_ref(),
//! )
//! .unwrap();
//! println!("{} polygons", out.stats.polygons);
//! ```

mod error;

pub mod combine;
pub mod config;
pub mod extract;
pub mod fog;
pub mod grid;
pub mod pipeline;
pub mod relax;
pub mod resample;
pub mod voxelize;

pub use error::{ErrorKind, Input, PipelineError, Stage, VolumeError, VolumeResult};

pub use combine::{combine, MixOperator};
pub use config::MixConfig;
pub use extract::{extract_surface, ExtractParams};
pub use fog::{sdf_to_fog, FalloffCurve};
pub use grid::{BrickCoord, Coord, GridClass, GridStats, GridTransform, Node, SparseGrid};
pub use pipeline::{
    mesh_to_fog, mix_sources, remesh_source, run_mix, run_remesh, FogVolume, InputStats,
    MixContext, MixOutput, MixStats,
};
pub use resample::{resample_onto, ResamplePolicy};
pub use voxelize::{voxelize, VoxelizeParams};
