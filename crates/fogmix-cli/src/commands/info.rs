//! Info command: load a mesh and describe it.

use std::path::PathBuf;

use clap::Args;
use fogmix_mesh::{validate_mesh, Mesh, MeshFormat, MeshReport};
use serde::Serialize;

use crate::{output, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Mesh file to inspect
    pub input: PathBuf,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    format: String,
    report: MeshReport,
}

pub fn run(args: InfoArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let mesh = Mesh::load(&args.input)?;
    let report = validate_mesh(&mesh);
    let mesh_format = MeshFormat::from_path(&args.input)
        .map(|f| format!("{:?}", f))
        .unwrap_or_default();

    output::info(
        &format!("{} ({})", args.input.display(), mesh_format),
        format,
        quiet,
    );
    output::info(&report.to_string(), format, quiet);
    if !report.is_closed() {
        output::warning("mesh is not closed; mixing it will fail", format, quiet);
    }
    output::print(
        &InfoOutput {
            path: args.input.display().to_string(),
            format: mesh_format,
            report,
        },
        format,
        quiet,
    );
    Ok(())
}
