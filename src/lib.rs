//! pngcomp: composite a background and a transparent overlay into a PNG with
//! ffmpeg and stream the encoded bytes to HTTP clients as they are produced.

pub mod compose;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;

pub use config::ServerConfig;
pub use error::{CompositeError, CompositeResult};
pub use server::{start_server, AppState, ServerHandle};

/// Resolve the renderer, start the server and run until Ctrl-C.
pub async fn run(config: ServerConfig) -> CompositeResult<()> {
    let renderer = compose::resolve_ffmpeg(config.ffmpeg_path.clone()).await?;
    match &renderer {
        Some(path) => log::info!("[SERVER] Renderer: {}", path.display()),
        None => log::warn!("[SERVER] No renderer available; composite requests will fail"),
    }

    let handle = start_server(AppState::new(config, renderer)).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("[SERVER] Failed to listen for Ctrl-C: {}", e);
    }

    handle.stop().await;
    Ok(())
}
