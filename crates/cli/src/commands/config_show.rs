// `huddle config-show`: print the resolved engine configuration.

use anyhow::{Context, Result};
use clap::Args;

use huddle_engine::EngineConfig;

use crate::output::{print_output, OutputFormat};

#[derive(Args)]
pub struct ConfigShowArgs {
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ConfigShowArgs) -> Result<()> {
    let config = EngineConfig::load();
    let format = OutputFormat::detect(args.json);
    print_output(format, &config, |config| {
        toml::to_string_pretty(config).unwrap_or_else(|_| format!("{config:#?}"))
    })
    .context("failed to write config")?;
    Ok(())
}
