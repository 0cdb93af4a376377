//! Status command - show the camera state of a running service

use anyhow::{Context, Result};
use ipcam_core::{CameraState, IpcamError};
use std::path::PathBuf;

/// Show the camera state of a running service
pub async fn status(socket: Option<PathBuf>) -> Result<()> {
    println!("ipcam - Status\n");

    let mut client = match super::connect(socket).await {
        Ok(client) => client,
        Err(e) if is_not_running(&e) => {
            println!("  Daemon:  not running");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let info = client
        .camera_info()
        .await
        .context("Failed to query camera info")?;

    println!("  Daemon:  running");
    println!("  Device:  {}", info.device);
    println!("  State:   {}", info.state);
    if let (Some(name), Some(bus)) = (&info.name, &info.bus) {
        println!("  Camera:  {}", name);
        println!("  Bus:     {}", bus);
    }

    if info.state == CameraState::Alive {
        let entry = client.config().await.context("Failed to query settings")?;
        println!(
            "  Format:  {}x{} @ {} fps",
            entry.image_width,
            entry.image_height,
            entry.framerate.fps()
        );
    } else if info.state == CameraState::Abort {
        println!();
        println!("The capture loop failed. Run `ipcam start` to recover.");
    }

    Ok(())
}

fn is_not_running(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<IpcamError>(),
            Some(IpcamError::DaemonNotRunning)
        )
    })
}
