//! Config command: print the effective settings after layering.

use clap::Args;

use super::{CombineArgs, VolumeArgs};
use crate::OutputFormat;

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub volume: VolumeArgs,

    #[command(flatten)]
    pub combine: CombineArgs,
}

/// TOML for text output, JSON otherwise.
pub fn render(args: &ConfigArgs, format: OutputFormat) -> anyhow::Result<String> {
    let mut config = args.volume.resolve()?;
    args.combine.apply(&mut config);
    config.validate()?;
    let text = match format {
        OutputFormat::Text => config.to_toml()?,
        OutputFormat::Json => config.to_json()?,
    };
    Ok(text)
}

pub fn run(args: ConfigArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let text = render(&args, format)?;
    if !quiet {
        println!("{}", text.trim_end());
    }
    Ok(())
}
