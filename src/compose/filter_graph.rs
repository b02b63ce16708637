//! Renderer argument construction.
//!
//! Turns a composition mode into the ffmpeg argv. Input 0 is always the
//! background, input 1 the overlay; the single output frame is a PNG written
//! to stdout.

use std::path::Path;
use std::str::FromStr;

/// Named composition preset selectable per request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompositionPreset {
    /// Background covers the frame, overlay at the origin.
    #[default]
    Cover,
    /// Overlay stretched, bottom-trimmed and centered at a fixed top offset.
    Fixed,
}

impl FromStr for CompositionPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cover" => Ok(CompositionPreset::Cover),
            "fixed" => Ok(CompositionPreset::Fixed),
            other => Err(format!("Unknown composition mode: {}", other)),
        }
    }
}

/// Concrete composition geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionMode {
    /// Overlay scaled to `width` keeping aspect ratio; background scaled to
    /// `height` then center-cropped to `width`x`height`; overlay at 0:0.
    CoverCrop { width: u32, height: u32 },
    /// Overlay scaled to exactly `width`x`height`, `crop_bottom` rows removed,
    /// then placed horizontally centered `top` pixels from the top.
    FixedOffset {
        width: u32,
        height: u32,
        crop_bottom: u32,
        top: u32,
    },
}

impl CompositionMode {
    /// Build the `-filter_complex` expression for this mode.
    pub fn filter_expression(&self) -> String {
        match *self {
            CompositionMode::CoverCrop { width, height } => format!(
                "[1:v]scale={w}:-1[ov];[0:v]scale=-1:{h},crop={w}:{h}:(iw-{w})/2:(ih-{h})/2[bg];[bg][ov]overlay=0:0",
                w = width,
                h = height
            ),
            CompositionMode::FixedOffset {
                width,
                height,
                crop_bottom,
                top,
            } => format!(
                "[1:v]scale={w}:{h},crop=iw:ih-{b}:0:0[ov];[0:v][ov]overlay=(W-w)/2:{top}",
                w = width,
                h = height,
                b = crop_bottom,
                top = top
            ),
        }
    }
}

/// Build the full renderer argv for one still frame on stdout.
pub fn build_renderer_args(
    background: &Path,
    overlay: &Path,
    mode: &CompositionMode,
) -> Vec<String> {
    vec![
        "-i".to_string(),
        background.to_string_lossy().to_string(),
        "-i".to_string(),
        overlay.to_string_lossy().to_string(),
        "-filter_complex".to_string(),
        mode.filter_expression(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-vcodec".to_string(),
        "png".to_string(),
        // Output to stdout
        "-".to_string(),
    ]
}
