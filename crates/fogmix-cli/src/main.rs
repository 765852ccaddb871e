//! `fogmix`: mix two meshes as fog volumes and re-mesh the result.

use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fogmix_mesh::MeshError;
use fogmix_volume::{PipelineError, VolumeError};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

/// Exit code for usage and configuration errors.
const USAGE_EXIT: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "fogmix", version, about = "Mix meshes as fog volumes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Output format for results
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Voxelize two meshes, combine them as fog and write the iso-surface
    Mix(commands::mix::MixArgs),

    /// Run one mesh through voxelize, fog and extract
    Voxelize(commands::voxelize::VoxelizeArgs),

    /// Print statistics about a mesh file
    Info(commands::info::InfoArgs),

    /// Check that a mesh is closed enough to be mixed
    Validate(commands::validate::ValidateArgs),

    /// Print the effective configuration
    Config(commands::config::ConfigArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Some("error"),
        (false, 0) => None,
        (false, 1) => Some("info"),
        (false, 2) => Some("debug"),
        (false, _) => Some("trace"),
    };
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Map an error chain to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<PipelineError>() {
            return e.exit_code() as u8;
        }
        if let Some(e) = cause.downcast_ref::<VolumeError>() {
            return e.kind().exit_code() as u8;
        }
        if let Some(e) = cause.downcast_ref::<MeshError>() {
            return if e.is_io() { 3 } else { 1 };
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return 3;
        }
    }
    USAGE_EXIT
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        command,
        format,
        quiet,
        ..
    } = cli;
    match command {
        Commands::Mix(args) => commands::mix::run(args, format, quiet),
        Commands::Voxelize(args) => commands::voxelize::run(args, format, quiet),
        Commands::Info(args) => commands::info::run(args, format, quiet),
        Commands::Validate(args) => commands::validate::run(args, format, quiet),
        Commands::Config(args) => commands::config::run(args, format, quiet),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { USAGE_EXIT } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::error(&err);
            ExitCode::from(exit_code(&err))
        }
    }
}
