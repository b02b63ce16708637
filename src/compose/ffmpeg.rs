//! FFmpeg binary resolution and command setup.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{CompositeError, CompositeResult};

/// Create a Command configured to hide the console window on Windows.
/// This prevents FFmpeg from popping up a black console window during execution.
pub fn create_hidden_command(program: &Path) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd
}

/// Find a working ffmpeg binary.
///
/// Order: explicit configured path, ffmpeg-sidecar's resolved path, system PATH.
/// Each candidate must succeed at `-version` to be accepted.
pub fn find_ffmpeg(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if test_ffmpeg_binary(path) {
            log::debug!("[FFMPEG] Using configured path: {}", path.display());
            return Some(path.to_path_buf());
        }
        log::warn!(
            "[FFMPEG] Configured path {} is not a working ffmpeg, falling back",
            path.display()
        );
    }

    let sidecar_path = ffmpeg_sidecar::paths::ffmpeg_path();
    if test_ffmpeg_binary(&sidecar_path) {
        log::debug!("[FFMPEG] Using sidecar path: {}", sidecar_path.display());
        return Some(sidecar_path);
    }

    log::debug!(
        "[FFMPEG] Sidecar path failed ({}), trying system PATH",
        sidecar_path.display()
    );

    let binary_name = if cfg!(windows) {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    };

    if let Some(path) = find_in_system_path(binary_name) {
        if test_ffmpeg_binary(&path) {
            log::debug!("[FFMPEG] Using system PATH: {}", path.display());
            return Some(path);
        }
    }

    log::warn!("[FFMPEG] No working ffmpeg found");
    None
}

/// Run `find_ffmpeg` on the blocking pool; its probes spawn and wait on processes.
pub async fn resolve_ffmpeg(configured: Option<PathBuf>) -> CompositeResult<Option<PathBuf>> {
    tokio::task::spawn_blocking(move || find_ffmpeg(configured.as_deref()))
        .await
        .map_err(|e| CompositeError::Other(format!("Renderer lookup task failed: {}", e)))
}

/// Test if an ffmpeg binary works by running -version
fn test_ffmpeg_binary(path: &Path) -> bool {
    std::process::Command::new(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Find an executable in system PATH
fn find_in_system_path(name: &str) -> Option<PathBuf> {
    let cmd = if cfg!(windows) { "where" } else { "which" };

    std::process::Command::new(cmd)
        .arg(name)
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                let path_str = String::from_utf8_lossy(&output.stdout);
                let first_line = path_str.lines().next()?.trim();
                if !first_line.is_empty() {
                    return Some(PathBuf::from(first_line));
                }
            }
            None
        })
}
