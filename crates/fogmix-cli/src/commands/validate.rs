//! Validate command: run ingestion alone and report whether a mesh can be mixed.

use std::path::PathBuf;

use clap::Args;
use fogmix_mesh::{ingest, CleanReport, FileSource, MeshReport};
use serde::Serialize;

use crate::{output, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Mesh file to check
    pub input: PathBuf,

    /// TOML file whose [ingest] section is applied
    #[arg(short, long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Allowed fraction of open or non-manifold edges
    #[arg(long, value_name = "FRACTION")]
    pub manifold_tolerance: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ValidateOutput {
    path: String,
    valid: bool,
    report: MeshReport,
    clean: CleanReport,
}

pub fn run(args: ValidateArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let mut config = super::VolumeArgs {
        config: args.config.clone(),
        ..super::VolumeArgs::default()
    }
    .resolve()?;
    if let Some(tolerance) = args.manifold_tolerance {
        config.ingest.manifold_tolerance = tolerance;
    }
    config.validate()?;

    let ingested = ingest(&FileSource::new(&args.input), &config.ingest_params())?;

    output::info(&ingested.report.to_string(), format, quiet);
    let clean = ingested.clean;
    if clean != CleanReport::default() {
        output::info(
            &format!(
                "Cleanup: {} welded, {} degenerate, {} duplicate polygons",
                clean.vertices_welded,
                clean.polygons_collapsed + clean.polygons_removed,
                clean.duplicates_removed
            ),
            format,
            quiet,
        );
    }
    output::success(
        &format!("{} can be mixed", args.input.display()),
        format,
        quiet,
    );
    output::print(
        &ValidateOutput {
            path: args.input.display().to_string(),
            valid: true,
            report: ingested.report,
            clean,
        },
        format,
        quiet,
    );
    Ok(())
}
