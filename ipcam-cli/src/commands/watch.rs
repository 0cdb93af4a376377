//! Watch command - print notifications from a running service

use anyhow::{Context, Result};
use clap::Args;
use ipcam_core::Notification;
use std::path::PathBuf;
use tokio::signal;

/// Arguments for the watch command
#[derive(Args)]
pub struct WatchArgs {
    /// Events to watch (default: every event except update_image)
    events: Vec<String>,

    /// Print each notification as a JSON line
    #[arg(long)]
    json: bool,

    /// Exit after this many notifications
    #[arg(short = 'n', long)]
    count: Option<usize>,
}

/// Print notifications until interrupted
pub async fn watch(args: WatchArgs, socket: Option<PathBuf>) -> Result<()> {
    let events = if args.events.is_empty() {
        Notification::NAMES
            .iter()
            .filter(|name| **name != "update_image")
            .map(|name| name.to_string())
            .collect()
    } else {
        for name in &args.events {
            if name != "*" && !Notification::NAMES.contains(&name.as_str()) {
                anyhow::bail!(
                    "Unknown event '{}'. Valid events: *, {}",
                    name,
                    Notification::NAMES.join(", ")
                );
            }
        }
        args.events.clone()
    };

    let mut client = super::connect(socket).await?;
    client
        .add_notify_request(events)
        .await
        .context("Failed to subscribe to notifications")?;

    let mut seen = 0;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            event = client.next_notification() => {
                let Some(event) = event.context("Lost connection to the daemon")? else {
                    println!("Daemon closed the connection.");
                    break;
                };

                if args.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    println!("{}", describe(&event));
                }

                seen += 1;
                if args.count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn describe(event: &Notification) -> String {
    match event {
        Notification::UpdateImage { mime, data } => {
            format!("update_image       {} ({} bytes)", mime, data.len())
        }
        Notification::UpdateImageSize { width, height } => {
            format!("update_image_size  {}x{}", width, height)
        }
        Notification::UpdateFramerate { num, deno } => {
            format!("update_framerate   {}/{}", num, deno)
        }
        Notification::UpdateControl { id, value } => {
            format!("update_control     {} = {}", id, value)
        }
        Notification::ChangeState { state } => format!("change_state       {}", state),
        Notification::SaveComplete => "save_complete".to_string(),
    }
}
