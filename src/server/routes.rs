//! HTTP handlers.
//!
//! Both composite routes run the same pipeline and differ only in the
//! background source and the default preset. Errors before the renderer
//! starts become JSON responses; once a 200 is sent, failures can only abort
//! the body.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::state::AppState;
use crate::compose::provision::load_inline_payload;
use crate::compose::{
    build_renderer_args, BackgroundSource, CleanupCoordinator, CompositionPreset,
    CompositionRequest, OutputStream, RenderCommand, StreamBridge,
};
use crate::error::{CompositeError, CompositeResult};

#[derive(Debug, Default, Deserialize)]
pub struct ConvertQuery {
    /// Optional preset override (`cover` or `fixed`).
    mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    status: &'static str,
    renderer: bool,
}

/// `GET /convert`: inline background from the payload file.
pub async fn convert(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<ConvertQuery>,
) -> Response {
    log::info!("[SERVER] GET /convert from {}", peer);
    let cleanup = CleanupCoordinator::new();
    let result = start_inline(&state, &query, &cleanup).await;
    respond(result, cleanup).await
}

/// `GET /convert/fixed`: fixed on-disk background.
pub async fn convert_fixed(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    log::info!("[SERVER] GET /convert/fixed from {}", peer);
    let cleanup = CleanupCoordinator::new();
    let background = BackgroundSource::File(state.config().fixed_background_path());
    let result = start_render(&state, CompositionPreset::Fixed, background, &cleanup).await;
    respond(result, cleanup).await
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        renderer: state.renderer().is_some(),
    })
}

async fn start_inline(
    state: &AppState,
    query: &ConvertQuery,
    cleanup: &CleanupCoordinator,
) -> CompositeResult<OutputStream> {
    let preset = match query.mode.as_deref() {
        Some(mode) => mode.parse::<CompositionPreset>().map_err(CompositeError::BadRequest)?,
        None => CompositionPreset::Cover,
    };

    let image = load_inline_payload(&state.config().payload_file).await?;
    start_render(state, preset, BackgroundSource::Inline(image), cleanup).await
}

/// Provision inputs, build the argv and hand the renderer to a bridge.
async fn start_render(
    state: &AppState,
    preset: CompositionPreset,
    background: BackgroundSource,
    cleanup: &CleanupCoordinator,
) -> CompositeResult<OutputStream> {
    let config = state.config();
    let program = state
        .renderer()
        .ok_or(CompositeError::RendererNotFound)?
        .to_path_buf();

    let request = CompositionRequest {
        background,
        overlay: config.overlay_path(),
    };
    let inputs = state.provisioner().provision(&request, cleanup).await?;

    let mode = config.mode(preset);
    let command = RenderCommand {
        program,
        args: build_renderer_args(&inputs.background, &inputs.overlay, &mode),
    };
    log::info!(
        "[SERVER] Rendering {:?} (temporary background: {})",
        mode,
        inputs.owns_background
    );
    log::debug!("[SERVER] ffmpeg {}", command.args.join(" "));

    let (bridge, output) = StreamBridge::new(config.channel_capacity, cleanup.clone());
    // The relay task runs detached; it owns termination and cleanup from here
    bridge.launch(&command, config.chunk_size).await?;
    Ok(output)
}

async fn respond(result: CompositeResult<OutputStream>, cleanup: CleanupCoordinator) -> Response {
    match result {
        Ok(output) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            output.into_body(),
        )
            .into_response(),
        Err(err) => {
            cleanup.run().await;
            log::warn!("[SERVER] Request failed before streaming: {}", err);
            err.into_response()
        },
    }
}
