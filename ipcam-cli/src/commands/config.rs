//! Config command - manage configuration files

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use ipcam_core::config::{sample_config, ConfigFile};
use ipcam_core::ServiceConfig;

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the current configuration
    Show,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            let path = ConfigFile::default_path();
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist)");
            }
        }
        ConfigCommand::Show => {
            let path = ConfigFile::default_path();
            if !path.exists() {
                println!("No configuration file found at: {}", path.display());
                println!();
                println!("Using default settings. Create a config file with:");
                println!("  ipcam config init");
                return Ok(());
            }

            let file = ConfigFile::load_from(path.clone())
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let service = ServiceConfig::from_file(&file);

            println!("Configuration file: {}\n", path.display());
            println!("  Device:    {}", service.device);
            println!("  Database:  {}", service.database.display());
            println!("  HTTP:      {}:{}", service.http_bind, service.http_port);
            println!("  Extended:  {}", service.extended_header);
            println!("  Socket:    {}", service.socket_path.display());

            let warnings = service.validate();
            if !warnings.is_empty() {
                println!();
                for warning in warnings {
                    println!("Warning: {}", warning);
                }
            }
        }
        ConfigCommand::Init { force } => {
            let path = ConfigFile::default_path();

            if force {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create config directory")?;
                }
                std::fs::write(&path, sample_config()).context("Failed to write config file")?;
            } else if !ConfigFile::create_default_if_missing()
                .context("Failed to create config file")?
            {
                println!("Configuration file already exists: {}", path.display());
                println!();
                println!("Use --force to overwrite, or edit the existing file.");
                return Ok(());
            }

            println!("Created configuration file: {}", path.display());
            println!();
            println!("Edit this file to point ipcam at your camera.");
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
