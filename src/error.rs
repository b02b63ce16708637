//! Central error types for pngcomp.
//!
//! Every failure a composite request can hit maps onto one `CompositeError`
//! variant. Errors raised before the response stream starts become a JSON
//! body (`{ "error": ... }`); errors raised mid-stream abort the body instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Main error type for pngcomp operations.
#[derive(Error, Debug)]
pub enum CompositeError {
    /// Required inline image data is absent
    #[error("{0}")]
    InputMissing(String),

    /// Inline image data could not be decoded into a raster image
    #[error("Invalid image data: {0}")]
    InputInvalid(String),

    /// A request parameter has an unsupported value
    #[error("{0}")]
    BadRequest(String),

    /// A fixed asset (overlay or background) is missing on disk
    #[error("{asset} file not found")]
    AssetNotFound { asset: String },

    /// The OS could not launch the renderer
    #[error("Failed to start renderer: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Renderer stdout could not be read to the end
    #[error("Failed to read renderer output: {0}")]
    OutputReadFailed(#[source] std::io::Error),

    /// The renderer exited with a non-zero code
    #[error("renderer failed with code {code}: {stderr}")]
    RendererFailed { code: i32, stderr: String },

    /// No usable renderer binary was resolved at startup
    #[error("FFmpeg not found. Please ensure FFmpeg is installed or configured.")]
    RendererNotFound,

    /// Filesystem operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl CompositeError {
    /// HTTP status used when this error is reported before streaming starts.
    pub fn status(&self) -> StatusCode {
        match self {
            CompositeError::InputMissing(_)
            | CompositeError::InputInvalid(_)
            | CompositeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error payload returned to clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for CompositeError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Extension trait for adding context to Results.
///
/// Similar to anyhow's `Context` trait, this allows chaining context
/// information onto errors for better debugging.
///
/// # Example
/// ```ignore
/// use crate::error::{CompositeResult, ResultExt};
///
/// fn read_payload(path: &Path) -> CompositeResult<String> {
///     std::fs::read_to_string(path).context("failed to read payload")
/// }
/// ```
pub trait ResultExt<T> {
    /// Add context to an error, converting it to CompositeError::Other.
    fn context(self, msg: &str) -> CompositeResult<T>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> CompositeResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &str) -> CompositeResult<T> {
        self.map_err(|e| CompositeError::Other(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> CompositeResult<T> {
        self.map_err(|e| CompositeError::Other(format!("{}: {}", f(), e)))
    }
}

/// Extension trait for adding context to Option types.
pub trait OptionExt<T> {
    /// Convert None to CompositeError::Other with the given message.
    fn context(self, msg: &str) -> CompositeResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn context(self, msg: &str) -> CompositeResult<T> {
        self.ok_or_else(|| CompositeError::Other(msg.to_string()))
    }
}

/// Type alias for Results using CompositeError.
pub type CompositeResult<T> = Result<T, CompositeError>;
