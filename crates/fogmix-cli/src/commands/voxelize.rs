//! Voxelize command: re-mesh a single input through its fog volume.

use std::path::PathBuf;

use clap::Args;
use fogmix_mesh::FileSource;
use fogmix_volume::{run_remesh, MixContext};

use super::VolumeArgs;
use crate::{output, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct VoxelizeArgs {
    /// Input mesh
    pub input: PathBuf,

    /// Output mesh (format from the extension)
    #[arg(short, long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub volume: VolumeArgs,
}

pub fn run(args: VoxelizeArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let ctx = MixContext::new(args.volume.resolve()?)?;
    let out = run_remesh(&ctx, &FileSource::new(&args.input), &args.output)?;

    output::success(
        &format!("Remeshed {} into {}", args.input.display(), args.output.display()),
        format,
        quiet,
    );
    output::rows(&super::mix::summary_rows(&out.stats), format, quiet);
    output::print(&out.stats, format, quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fogmix_mesh::Mesh;
    use fogmix_volume::{ErrorKind, PipelineError, Stage};
    use nalgebra::Point3;

    #[test]
    fn test_remeshes_a_cube() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cube.ply");
        let output = dir.path().join("cube.stl");
        Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0))
            .save(&input)
            .unwrap();

        let args = VoxelizeArgs {
            input,
            output: output.clone(),
            volume: VolumeArgs {
                voxel_size: Some(0.125),
                band_interior: Some(2.0),
                band_exterior: Some(2.0),
                falloff: Some(0.125),
                ..VolumeArgs::default()
            },
        };
        run(args, OutputFormat::Text, true).unwrap();

        let mesh = Mesh::load(&output).unwrap();
        assert!((mesh.volume() - 1.0).abs() < 0.05, "volume {}", mesh.volume());
    }

    #[test]
    fn test_unsupported_output_format_is_reported_at_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cube.obj");
        Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0))
            .save(&input)
            .unwrap();

        let args = VoxelizeArgs {
            input,
            output: dir.path().join("cube.xyz"),
            volume: VolumeArgs {
                voxel_size: Some(0.25),
                ..VolumeArgs::default()
            },
        };
        let err = run(args, OutputFormat::Text, true).unwrap_err();
        let pipeline = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(pipeline.stage, Stage::Output);
        assert_eq!(pipeline.kind(), ErrorKind::Io);
    }
}
