//! Mix command: two meshes in, one re-meshed fog combination out.

use std::path::PathBuf;

use clap::Args;
use fogmix_mesh::FileSource;
use fogmix_volume::{run_mix, MixContext, MixStats};

use super::{CombineArgs, VolumeArgs};
use crate::{output, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct MixArgs {
    /// First input mesh
    pub a: PathBuf,

    /// Second input mesh
    pub b: PathBuf,

    /// Output mesh (format from the extension)
    #[arg(short, long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub volume: VolumeArgs,

    #[command(flatten)]
    pub combine: CombineArgs,
}

pub fn run(args: MixArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let mut config = args.volume.resolve()?;
    args.combine.apply(&mut config);

    let ctx = MixContext::new(config)?;
    let out = run_mix(
        &ctx,
        &FileSource::new(&args.a),
        &FileSource::new(&args.b),
        &args.output,
    )?;

    output::success(
        &format!(
            "Mixed {} and {} into {}",
            args.a.display(),
            args.b.display(),
            args.output.display()
        ),
        format,
        quiet,
    );
    output::rows(&summary_rows(&out.stats), format, quiet);
    output::print(&out.stats, format, quiet);
    Ok(())
}

pub(crate) fn summary_rows(stats: &MixStats) -> Vec<(&'static str, String)> {
    let mut rows = Vec::new();
    for input in &stats.inputs {
        rows.push((
            "input",
            format!(
                "{}: {} polygons, {} leaves, {} tiles",
                input.name, input.polygons, input.fog.leaves, input.fog.tiles
            ),
        ));
    }
    if let Some(op) = stats.operator {
        let resampled = if stats.resampled { " (resampled)" } else { "" };
        rows.push(("operator", format!("{}{}", op, resampled)));
    }
    if let Some(combined) = &stats.combined {
        rows.push((
            "combined",
            format!("{} leaves, {} tiles", combined.leaves, combined.tiles),
        ));
    }
    rows.push((
        "surface",
        format!("{} vertices, {} polygons", stats.vertices, stats.polygons),
    ));
    rows.push(("threads", stats.threads.to_string()));
    rows.push(("time", format!("{:.1} ms", stats.total_ms)));
    rows
}
