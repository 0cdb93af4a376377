//! Start/stop commands - drive the camera of a running service

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Open the device and start capturing
pub async fn start(socket: Option<PathBuf>) -> Result<()> {
    let mut client = super::connect(socket).await?;
    let state = client
        .start_camera()
        .await
        .context("Failed to start the camera")?;

    println!("Camera state: {}", state);
    Ok(())
}

/// Stop capturing and close the device
pub async fn stop(socket: Option<PathBuf>) -> Result<()> {
    let mut client = super::connect(socket).await?;
    let state = client
        .stop_camera()
        .await
        .context("Failed to stop the camera")?;

    println!("Camera state: {}", state);
    Ok(())
}
