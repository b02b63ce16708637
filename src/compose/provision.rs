//! Input image resolution.
//!
//! Produces the two filesystem paths the renderer reads: the fixed overlay
//! asset and the background. Inline backgrounds are decoded and written to a
//! uniquely named temporary file that is registered with the request's
//! `CleanupCoordinator`.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use image::ImageFormat;
use rand::Rng;
use serde::Deserialize;

use super::cleanup::{CleanupCoordinator, TemporaryAsset};
use crate::error::{CompositeError, CompositeResult, OptionExt};

/// Message returned when the payload carries no image.
pub const MISSING_IMAGE_MESSAGE: &str = "Missing 'image' field in request body";

/// Standard alphabet, tolerant of missing `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Where the background image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundSource {
    /// Base64 text, optionally prefixed with `data:image/<type>;base64,`.
    Inline(String),
    /// Existing file on disk. Never deleted by the service.
    File(PathBuf),
}

/// One composite job, fixed at construction.
#[derive(Debug, Clone)]
pub struct CompositionRequest {
    pub background: BackgroundSource,
    pub overlay: PathBuf,
}

/// Resolved renderer inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedInputs {
    pub background: PathBuf,
    pub overlay: PathBuf,
    /// Whether `background` is a temporary file owned by this request.
    pub owns_background: bool,
}

/// Shape of the inline payload file.
#[derive(Debug, Deserialize)]
struct InlinePayload {
    image: Option<String>,
}

/// Resolves and materializes renderer inputs.
#[derive(Debug, Clone)]
pub struct Provisioner {
    temp_dir: PathBuf,
}

impl Provisioner {
    pub fn new(temp_dir: PathBuf) -> Self {
        Self { temp_dir }
    }

    /// Validate the overlay and materialize the background.
    ///
    /// The overlay is checked first so a missing asset never leaves a
    /// temporary file behind.
    pub async fn provision(
        &self,
        request: &CompositionRequest,
        cleanup: &CleanupCoordinator,
    ) -> CompositeResult<ProvisionedInputs> {
        let overlay = require_asset(&request.overlay, "Overlay").await?;

        let (background, owns_background) = match &request.background {
            BackgroundSource::Inline(data) => {
                let (bytes, format) = decode_inline_image(data)?;
                let asset = self.materialize(&bytes, format, cleanup).await?;
                (asset, true)
            },
            BackgroundSource::File(path) => (require_asset(path, "Background").await?, false),
        };

        Ok(ProvisionedInputs {
            background,
            overlay,
            owns_background,
        })
    }

    /// Write decoded bytes to a fresh temp file tracked by `cleanup`.
    async fn materialize(
        &self,
        bytes: &[u8],
        format: ImageFormat,
        cleanup: &CleanupCoordinator,
    ) -> CompositeResult<PathBuf> {
        let extension = format
            .extensions_str()
            .first()
            .copied()
            .context("Image format has no file extension")?;
        let path = temp_asset_path(&self.temp_dir, extension);

        // Registered before writing so a partial write is still removed
        cleanup.register(TemporaryAsset::new(path.clone()));
        tokio::fs::write(&path, bytes).await?;

        log::debug!(
            "[PROVISION] Wrote {} byte {:?} background to {}",
            bytes.len(),
            format,
            path.display()
        );
        Ok(path)
    }
}

/// Read the `{ "image": ... }` payload file.
///
/// A missing file or an absent/empty `image` field is `InputMissing`.
pub async fn load_inline_payload(path: &Path) -> CompositeResult<String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("[PROVISION] Payload file {} not found", path.display());
            return Err(CompositeError::InputMissing(MISSING_IMAGE_MESSAGE.to_string()));
        },
        Err(e) => return Err(e.into()),
    };

    let payload: InlinePayload = serde_json::from_str(&content)?;
    match payload.image {
        Some(image) if !image.trim().is_empty() => Ok(image),
        _ => Err(CompositeError::InputMissing(MISSING_IMAGE_MESSAGE.to_string())),
    }
}

/// Strip a leading `data:image/<word>;base64,` declaration if present.
pub fn strip_data_url_prefix(data: &str) -> &str {
    let Some(rest) = data.strip_prefix("data:image/") else {
        return data;
    };
    let Some(idx) = rest.find(";base64,") else {
        return data;
    };

    let subtype = &rest[..idx];
    if !subtype.is_empty()
        && subtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        &rest[idx + ";base64,".len()..]
    } else {
        data
    }
}

/// Decode inline base64 into image bytes and sniff their format.
pub fn decode_inline_image(data: &str) -> CompositeResult<(Vec<u8>, ImageFormat)> {
    let encoded: String = strip_data_url_prefix(data.trim())
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = LENIENT_BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| CompositeError::InputInvalid(format!("base64 decode failed: {}", e)))?;

    if bytes.is_empty() {
        return Err(CompositeError::InputMissing(MISSING_IMAGE_MESSAGE.to_string()));
    }

    let format = image::guess_format(&bytes)
        .map_err(|_| CompositeError::InputInvalid("unrecognized image format".to_string()))?;

    Ok((bytes, format))
}

/// Ensure a fixed asset exists as a regular file.
async fn require_asset(path: &Path, asset: &str) -> CompositeResult<PathBuf> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(path.to_path_buf()),
        _ => {
            log::warn!("[PROVISION] {} asset missing: {}", asset, path.display());
            Err(CompositeError::AssetNotFound {
                asset: asset.to_string(),
            })
        },
    }
}

/// Build a temp path unique across concurrent requests in the same clock tick.
pub fn temp_asset_path(dir: &Path, extension: &str) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0))
        .as_millis();
    let random: u32 = rand::thread_rng().gen();
    dir.join(format!(
        "bg-{:x}{:06x}-{}.{}",
        millis,
        random & 0xFFFFFF,
        uuid::Uuid::new_v4().simple(),
        extension
    ))
}
