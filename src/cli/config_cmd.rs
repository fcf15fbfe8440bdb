use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use crate::config;

use super::commands::{resolve_config, CliArgs};

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration with API keys masked
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file if none exists
    Init,
}

pub fn handle_config(action: &ConfigAction, args: &CliArgs) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let effective = resolve_config(args)?;
            let rendered =
                toml::to_string_pretty(&effective.redacted()).context("Failed to serialize configuration")?;
            println!("{}", rendered);
        }
        ConfigAction::Path => {
            let path = config::get_config_path_or_default(args.config.as_deref())?;
            println!("{}", path.display());
        }
        ConfigAction::Init => {
            let (path, created) = config::init_config(args.config.as_deref())?;
            if created {
                println!("{} {}", "Created".green(), path.display());
            } else {
                println!("{} already exists", path.display());
            }
        }
    }
    Ok(())
}
