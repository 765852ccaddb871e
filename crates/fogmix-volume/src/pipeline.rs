//! End-to-end runs: ingest → voxelize → fog → combine → extract → write.
//!
//! A [`MixContext`] owns the configuration and the worker pool; every stage
//! runs on that pool. Errors come back as [`PipelineError`]s naming the stage
//! and, for two-input runs, the input that failed.

use std::path::Path;
use std::time::Instant;

use fogmix_mesh::{ingest, save_mesh, Mesh, MeshResult, MeshSource, SourceMesh};
use nalgebra::Matrix4;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{info, info_span};

use crate::combine::{combine, MixOperator, TRANSFORM_TOLERANCE};
use crate::config::MixConfig;
use crate::error::{Input, PipelineError, Stage, StageExt, VolumeError, VolumeResult};
use crate::extract::extract_surface;
use crate::fog::sdf_to_fog;
use crate::grid::{GridStats, GridTransform, SparseGrid};
use crate::voxelize::voxelize;

/// Configuration plus the thread pool every stage runs on.
pub struct MixContext {
    config: MixConfig,
    pool: ThreadPool,
}

impl MixContext {
    /// Validate `config` and start a pool of `config.threads` workers (0 = all cores).
    pub fn new(config: MixConfig) -> VolumeResult<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("fogmix-{}", i))
            .build()
            .map_err(|e| VolumeError::invalid("threads", e.to_string()))?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &MixConfig {
        &self.config
    }

    /// Number of worker threads in the pool.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` on this context's pool.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

/// Counts and timings for one input mesh.
#[derive(Debug, Clone, Serialize)]
pub struct InputStats {
    pub name: String,
    pub vertices: usize,
    pub polygons: usize,
    pub level_set: GridStats,
    pub fog: GridStats,
    pub ingest_ms: f64,
    pub voxelize_ms: f64,
    pub fog_ms: f64,
}

/// Counts and timings for a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MixStats {
    pub threads: usize,
    pub inputs: Vec<InputStats>,
    pub operator: Option<MixOperator>,
    /// The second input was resampled onto the first input's lattice.
    pub resampled: bool,
    pub combined: Option<GridStats>,
    pub combine_ms: f64,
    pub vertices: usize,
    pub polygons: usize,
    pub extract_ms: f64,
    pub total_ms: f64,
}

/// A fog volume built from one mesh.
#[derive(Debug, Clone)]
pub struct FogVolume {
    pub grid: SparseGrid,
    pub stats: InputStats,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct MixOutput {
    pub mesh: Mesh,
    pub stats: MixStats,
}

/// A source whose world matrix is pre-multiplied by an extra offset.
struct Offset<'a> {
    inner: &'a dyn MeshSource,
    offset: Matrix4<f64>,
}

impl MeshSource for Offset<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn load(&self) -> MeshResult<SourceMesh> {
        let mut source = self.inner.load()?;
        source.world = self.offset * source.world;
        Ok(source)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Ingest, voxelize and convert one mesh to fog.
pub fn mesh_to_fog(ctx: &MixContext, source: &dyn MeshSource) -> Result<FogVolume, PipelineError> {
    ctx.install(|| build_fog(ctx.config(), source, None))
}

fn build_fog(
    config: &MixConfig,
    source: &dyn MeshSource,
    input: Option<Input>,
) -> Result<FogVolume, PipelineError> {
    let _span = info_span!("mesh_to_fog", source = source.name()).entered();

    let start = Instant::now();
    let ingested = ingest(source, &config.ingest_params()).stage(Stage::Ingest, input)?;
    let ingest_ms = elapsed_ms(start);

    let start = Instant::now();
    let transform = GridTransform::from_matrix(&ingested.world, config.voxelize.voxel_size)
        .stage(Stage::Voxelize, input)?;
    let mut grid = voxelize(&ingested.mesh, &transform, &config.voxelize_params())
        .stage(Stage::Voxelize, input)?;
    let level_set = grid.stats();
    let voxelize_ms = elapsed_ms(start);

    let start = Instant::now();
    sdf_to_fog(&mut grid, config.fog.falloff, config.fog.curve).stage(Stage::Fog, input)?;
    let fog_ms = elapsed_ms(start);

    if grid.is_empty() {
        return Err(VolumeError::EmptyResult {
            details: format!(
                "'{}' has no density at voxel size {}",
                ingested.name, config.voxelize.voxel_size
            ),
        })
        .stage(Stage::Fog, input);
    }

    let stats = InputStats {
        name: ingested.name,
        vertices: ingested.mesh.vertex_count(),
        polygons: ingested.mesh.polygon_count(),
        level_set,
        fog: grid.stats(),
        ingest_ms,
        voxelize_ms,
        fog_ms,
    };
    Ok(FogVolume { grid, stats })
}

/// Mix two meshes and return the extracted surface.
pub fn mix_sources(
    ctx: &MixContext,
    a: &dyn MeshSource,
    b: &dyn MeshSource,
) -> Result<MixOutput, PipelineError> {
    let config = ctx.config();
    let total = Instant::now();

    ctx.install(|| {
        let source_a = Offset {
            inner: a,
            offset: config.offset_a(),
        };
        let source_b = Offset {
            inner: b,
            offset: config.offset_b(),
        };
        let fog_a = build_fog(config, &source_a, Some(Input::A))?;
        let fog_b = build_fog(config, &source_b, Some(Input::B))?;

        let op = config.combine.operator;
        let start = Instant::now();
        let resampled = !fog_a
            .grid
            .transform()
            .approx_eq(fog_b.grid.transform(), TRANSFORM_TOLERANCE);
        let combined = {
            let _span = info_span!("combine", operator = %op).entered();
            combine(&fog_a.grid, &fog_b.grid, op, config.combine.resample)
                .stage(Stage::Combine, None)?
        };
        let combine_ms = elapsed_ms(start);

        if combined.is_empty() {
            return Err(PipelineError::new(
                Stage::Combine,
                VolumeError::EmptyResult {
                    details: format!(
                        "'{}' {} '{}' leaves no density",
                        fog_a.stats.name, op, fog_b.stats.name
                    ),
                },
            ));
        }

        let start = Instant::now();
        let mesh = {
            let _span = info_span!("extract").entered();
            extract_surface(&combined, &config.extract_params()).stage(Stage::Extract, None)?
        };
        let extract_ms = elapsed_ms(start);

        let stats = MixStats {
            threads: ctx.threads(),
            inputs: vec![fog_a.stats, fog_b.stats],
            operator: Some(op),
            resampled,
            combined: Some(combined.stats()),
            combine_ms,
            vertices: mesh.vertex_count(),
            polygons: mesh.polygon_count(),
            extract_ms,
            total_ms: elapsed_ms(total),
        };
        info!(
            "Mixed '{}' {} '{}': {} vertices, {} polygons in {:.1} ms",
            stats.inputs[0].name, op, stats.inputs[1].name, stats.vertices, stats.polygons, stats.total_ms
        );
        Ok(MixOutput { mesh, stats })
    })
}

/// Mix two meshes and write the result to `output`.
///
/// Nothing is written unless every stage succeeds.
pub fn run_mix(
    ctx: &MixContext,
    a: &dyn MeshSource,
    b: &dyn MeshSource,
    output: &Path,
) -> Result<MixOutput, PipelineError> {
    let out = mix_sources(ctx, a, b)?;
    save_mesh(&out.mesh, output).stage(Stage::Output, None)?;
    info!("Wrote {}", output.display());
    Ok(out)
}

/// Run one mesh through voxelize → fog → extract.
pub fn remesh_source(ctx: &MixContext, source: &dyn MeshSource) -> Result<MixOutput, PipelineError> {
    let config = ctx.config();
    let total = Instant::now();

    ctx.install(|| {
        let fog = build_fog(config, source, None)?;

        let start = Instant::now();
        let mesh = extract_surface(&fog.grid, &config.extract_params()).stage(Stage::Extract, None)?;
        let extract_ms = elapsed_ms(start);

        let stats = MixStats {
            threads: ctx.threads(),
            vertices: mesh.vertex_count(),
            polygons: mesh.polygon_count(),
            inputs: vec![fog.stats],
            extract_ms,
            total_ms: elapsed_ms(total),
            ..MixStats::default()
        };
        info!(
            "Remeshed '{}': {} vertices, {} polygons in {:.1} ms",
            stats.inputs[0].name, stats.vertices, stats.polygons, stats.total_ms
        );
        Ok(MixOutput { mesh, stats })
    })
}

/// Run one mesh through voxelize → fog → extract and write the result.
pub fn run_remesh(
    ctx: &MixContext,
    source: &dyn MeshSource,
    output: &Path,
) -> Result<MixOutput, PipelineError> {
    let out = remesh_source(ctx, source)?;
    save_mesh(&out.mesh, output).stage(Stage::Output, None)?;
    info!("Wrote {}", output.display());
    Ok(out)
}
