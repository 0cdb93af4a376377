//! Settings command - show or change the settings of the open device

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use ipcam_core::{ControlDescriptor, ControlValue};
use std::path::PathBuf;

/// Arguments for the settings command
#[derive(Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(Subcommand)]
pub enum SettingsCommand {
    /// Show frame size, rate, supported formats and controls
    Show {
        /// Print the raw settings entry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change the frame size (capture restarts)
    Size { width: u32, height: u32 },

    /// Change the framerate, e.g. `30` or `30000/1001`
    Framerate { rate: String },

    /// Write a control value (integer, or true/false)
    Control { id: u32, value: String },

    /// Persist the settings of every known device
    Save,
}

/// Run settings subcommand
pub async fn settings(args: SettingsArgs, socket: Option<PathBuf>) -> Result<()> {
    let mut client = super::connect(socket).await?;

    match args.command {
        SettingsCommand::Show { json } => {
            let entry = client.config().await.context("Failed to query settings")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
                return Ok(());
            }

            println!("Frame size: {}x{}", entry.image_width, entry.image_height);
            println!("Framerate:  {} ({:.2} fps)", entry.framerate, entry.framerate.fps());
            println!();
            println!("Supported formats:");
            for cap in &entry.capabilities {
                let rates: Vec<String> = cap.rate.iter().map(|r| r.to_string()).collect();
                println!("  {:>5}x{:<5} {}", cap.width, cap.height, rates.join(", "));
            }
            println!();
            println!("Controls:");
            for ctl in &entry.controls {
                println!("  {:>10}  {:<32} {}", ctl.id(), ctl.name(), describe(ctl));
            }
        }
        SettingsCommand::Size { width, height } => {
            client
                .set_image_size(width, height)
                .await
                .context("Failed to change the frame size")?;
            println!("Frame size set to {}x{}", width, height);
        }
        SettingsCommand::Framerate { rate } => {
            let (num, deno) = parse_rate(&rate)?;
            client
                .set_framerate(num, deno)
                .await
                .context("Failed to change the framerate")?;
            println!("Framerate set to {}/{}", num, deno);
        }
        SettingsCommand::Control { id, value } => {
            let value: ControlValue = value.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            client
                .set_control(id, value)
                .await
                .with_context(|| format!("Failed to set control {}", id))?;
            println!("Control {} set to {}", id, value);
        }
        SettingsCommand::Save => {
            client.save_config().await.context("Failed to save settings")?;
            println!("Settings saved.");
        }
    }

    Ok(())
}

/// Parse `N` or `N/D`
fn parse_rate(rate: &str) -> Result<(u32, u32)> {
    let (num, deno) = match rate.split_once('/') {
        Some((num, deno)) => (num.trim(), deno.trim()),
        None => (rate.trim(), "1"),
    };
    let num: u32 = num
        .parse()
        .with_context(|| format!("Invalid framerate '{}'", rate))?;
    let deno: u32 = deno
        .parse()
        .with_context(|| format!("Invalid framerate '{}'", rate))?;
    if num == 0 || deno == 0 {
        anyhow::bail!("Invalid framerate '{}': must be non-zero", rate);
    }
    Ok((num, deno))
}

fn describe(ctl: &ControlDescriptor) -> String {
    match ctl {
        ControlDescriptor::Integer {
            value,
            min,
            max,
            step,
            ..
        } => format!("{} (range {}..={}, step {})", value, min, max, step),
        ControlDescriptor::Boolean { value, .. } => value.to_string(),
        ControlDescriptor::Menu { value, items, .. } => {
            let current = items
                .iter()
                .find(|(_, index)| *index == value)
                .map(|(name, _)| name.as_str())
                .unwrap_or("?");
            format!("{} ({})", value, current)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30").unwrap(), (30, 1));
        assert_eq!(parse_rate("30000/1001").unwrap(), (30000, 1001));
        assert!(parse_rate("30/0").is_err());
        assert!(parse_rate("fast").is_err());
    }
}
