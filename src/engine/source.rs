// src/engine/source.rs
//
// SourceImage: the uploaded, still-encoded bytes plus the MIME type the caller
// declared for them.

use image::ImageFormat;
use std::sync::Arc;

/// Input formats the decoder accepts.
pub const SUPPORTED_INPUT_FORMATS: [&str; 3] = ["jpeg", "png", "webp"];

/// Encoded input image, shared and immutable.
///
/// Cloning is cheap; the bytes live behind an `Arc` so the orchestrator can
/// hand them to a blocking worker without copying.
#[derive(Clone, Debug)]
pub struct SourceImage {
    bytes: Arc<Vec<u8>>,
    declared_mime: Option<String>,
}

impl SourceImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            declared_mime: None,
        }
    }

    pub fn from_shared(bytes: Arc<Vec<u8>>) -> Self {
        Self {
            bytes,
            declared_mime: None,
        }
    }

    /// Attach the MIME type reported by the file picker. Advisory only.
    pub fn with_declared_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime = Some(mime.into());
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn declared_mime(&self) -> Option<&str> {
        self.declared_mime.as_deref()
    }

    /// Format sniffed from magic bytes. The declared MIME type plays no part.
    pub fn detect_format(&self) -> Option<ImageFormat> {
        detect_format(self.as_bytes())
    }

    /// True when the caller declared a MIME type that disagrees with the content.
    pub fn declared_mime_mismatch(&self) -> bool {
        match (self.declared_mime(), self.detect_format()) {
            (Some(declared), Some(detected)) => {
                !declared.eq_ignore_ascii_case(detected.to_mime_type())
                    && !(declared.eq_ignore_ascii_case("image/jpg") && detected == ImageFormat::Jpeg)
            }
            _ => false,
        }
    }
}

impl From<Vec<u8>> for SourceImage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Short lowercase name for a detected format.
pub fn format_name(fmt: ImageFormat) -> &'static str {
    match fmt {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Avif => "avif",
        ImageFormat::Ico => "ico",
        other => other.to_mime_type(),
    }
}

/// Whether the decoder accepts this format.
pub fn is_supported_input(fmt: ImageFormat) -> bool {
    matches!(fmt, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn detects_by_content() {
        let src = SourceImage::new(PNG_MAGIC.to_vec()).with_declared_mime("image/jpeg");
        assert_eq!(src.detect_format(), Some(ImageFormat::Png));
        assert!(src.declared_mime_mismatch());
    }

    #[test]
    fn matching_declaration_is_not_a_mismatch() {
        let src = SourceImage::new(PNG_MAGIC.to_vec()).with_declared_mime("IMAGE/PNG");
        assert!(!src.declared_mime_mismatch());
        let undeclared = SourceImage::new(PNG_MAGIC.to_vec());
        assert!(!undeclared.declared_mime_mismatch());
    }

    #[test]
    fn jpg_alias_is_accepted() {
        let src = SourceImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0]).with_declared_mime("image/jpg");
        assert_eq!(src.detect_format(), Some(ImageFormat::Jpeg));
        assert!(!src.declared_mime_mismatch());
    }

    #[test]
    fn clones_share_bytes() {
        let src = SourceImage::new(vec![1, 2, 3]);
        let other = src.clone();
        assert_eq!(src.as_bytes().as_ptr(), other.as_bytes().as_ptr());
        assert_eq!(other.len(), 3);
        assert!(!other.is_empty());
    }

    #[test]
    fn unknown_bytes_have_no_format() {
        assert_eq!(detect_format(b"hello world"), None);
        assert!(is_supported_input(ImageFormat::WebP));
        assert!(!is_supported_input(ImageFormat::Gif));
        assert_eq!(format_name(ImageFormat::Jpeg), "jpeg");
    }
}
