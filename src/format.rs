//! # Image Meta Probe
//!
//! Byte-level format sniffing, independent of file extension. This module
//! never raises on malformed input: a file that isn't a recognized image
//! yields `None`, and a file whose magic bytes are right but whose header is
//! truncated or otherwise broken logs one warning and also yields `None`, so
//! the engine can skip it rather than hand a broken file to a worker binary.

use std::path::Path;
use tracing::warn;

/// A recognized raster image container, detected by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Svg,
    Webp,
}

impl Format {
    /// All formats the engine knows how to dispatch workers for.
    pub const ALL: [Format; 5] = [
        Format::Jpeg,
        Format::Png,
        Format::Gif,
        Format::Svg,
        Format::Webp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Jpeg => "jpeg",
            Format::Png => "png",
            Format::Gif => "gif",
            Format::Svg => "svg",
            Format::Webp => "webp",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const GIF87_MAGIC: &[u8] = b"GIF87a";
const GIF89_MAGIC: &[u8] = b"GIF89a";
const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF";
const JPEG_SOI: &[u8] = b"\xFF\xD8";
const WEBP_RIFF: &[u8] = b"RIFF";
const WEBP_TAG: &[u8] = b"WEBP";

/// Minimum number of header bytes we need on hand before we can tell a
/// complete-but-minimal image apart from a truncated one.
const PNG_MIN_HEADER: usize = 8 + 8; // signature + first (length,type) chunk header
const WEBP_MIN_HEADER: usize = 12; // RIFF size(4) WEBP

/// Classify a byte buffer's format. Never panics; returns `None` for anything
/// not recognized or whose header looks truncated (after warning once).
pub fn format_of_bytes(bytes: &[u8]) -> Option<Format> {
    if bytes.starts_with(JPEG_MAGIC) {
        return Some(Format::Jpeg);
    }
    if bytes.starts_with(JPEG_SOI) {
        warn!("broken JPEG magic: header truncated at {} bytes", bytes.len());
        return None;
    }
    if bytes.starts_with(PNG_MAGIC) {
        if bytes.len() < PNG_MIN_HEADER {
            warn!("broken PNG magic: header truncated at {} bytes", bytes.len());
            return None;
        }
        return Some(Format::Png);
    }
    if bytes.starts_with(GIF87_MAGIC) || bytes.starts_with(GIF89_MAGIC) {
        return Some(Format::Gif);
    }
    if bytes.starts_with(WEBP_RIFF) {
        if bytes.len() < WEBP_MIN_HEADER {
            warn!("broken WebP magic: header truncated at {} bytes", bytes.len());
            return None;
        }
        if &bytes[8..12] != WEBP_TAG {
            return None;
        }
        return Some(Format::Webp);
    }
    if looks_like_svg(bytes) {
        return Some(Format::Svg);
    }
    None
}

/// SVG has no magic bytes; it's detected by sniffing for an `<svg` tag within
/// the leading text of the file, tolerating an XML prolog/doctype/BOM.
fn looks_like_svg(bytes: &[u8]) -> bool {
    const SNIFF_WINDOW: usize = 4096;
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    let text = match std::str::from_utf8(window) {
        Ok(t) => t,
        Err(_) => return false,
    };
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.is_empty() {
        return false;
    }
    // Reject anything that isn't XML-ish before the <svg tag appears.
    trimmed.contains("<svg") && (trimmed.starts_with('<'))
}

/// Classify a file on disk by reading only its leading bytes.
pub async fn format_of(path: &Path) -> Option<Format> {
    match tokio::fs::read(path).await {
        Ok(bytes) => format_of_bytes(&bytes),
        Err(e) => {
            warn!("could not read {} for format probe: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jpeg() {
        assert_eq!(format_of_bytes(b"\xFF\xD8\xFF\xE0rest"), Some(Format::Jpeg));
    }

    #[test]
    fn detects_full_png() {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 13]); // IHDR length
        bytes.extend_from_slice(b"IHDR");
        assert_eq!(format_of_bytes(&bytes), Some(Format::Png));
    }

    #[test]
    fn broken_png_magic_returns_none() {
        assert_eq!(format_of_bytes(PNG_MAGIC), None);
    }

    #[test]
    fn detects_gif() {
        assert_eq!(format_of_bytes(b"GIF89arest"), Some(Format::Gif));
    }

    #[test]
    fn detects_svg_with_prolog() {
        let svg = b"<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>";
        assert_eq!(format_of_bytes(svg), Some(Format::Svg));
    }

    #[test]
    fn detects_webp() {
        let mut bytes = WEBP_RIFF.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(WEBP_TAG);
        assert_eq!(format_of_bytes(&bytes), Some(Format::Webp));
    }

    #[test]
    fn random_bytes_are_none() {
        assert_eq!(format_of_bytes(b"not an image, just text"), None);
    }

    #[test]
    fn broken_jpeg_magic_returns_none() {
        assert_eq!(format_of_bytes(b"\xFF\xD8"), None);
    }
}
