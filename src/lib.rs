// lib.rs
//
// pixelgate: the raster pipeline behind the Image Enhancer, Background Remover
// and Image Compressor tools.
//
// Design goals:
// - One tier policy value per run, read by every stage
// - Owned pixel buffers passed stage to stage, no shared canvas
// - Typed failures instead of silent fallbacks
// - Non-blocking async API

pub mod engine;
pub mod error;
pub mod ops;

pub use engine::{
    process_batch, BatchJob, PipelineOrchestrator, PipelineStage, PixelBuffer, ProcessTask,
    ProcessingResult, ProgressEvent, ProgressSink, SourceImage, StageBudget, Tier, TierPolicy,
};
pub use error::{ErrorCategory, PixelGateError, Result};
pub use ops::{OutputFormat, ToolKind, ToolRequest};

/// Width, height and detected format of an encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

/// Read dimensions and format from the header without decoding pixels.
pub fn inspect_header_from_bytes(data: &[u8]) -> Result<InspectMetadata> {
    let header = engine::inspect_header(data)?;
    Ok(InspectMetadata {
        width: header.width,
        height: header.height,
        format: Some(engine::format_name(header.format).to_string()),
    })
}

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Input formats the decoder accepts.
pub fn supported_input_formats() -> Vec<String> {
    engine::SUPPORTED_INPUT_FORMATS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Output formats the encoder produces.
pub fn supported_output_formats() -> Vec<String> {
    [OutputFormat::Jpeg, OutputFormat::Png]
        .iter()
        .map(|f| f.as_str().to_string())
        .collect()
}

/// Schema version of `ProcessingMetrics`.
pub const PROCESSING_METRICS_VERSION: &str = "1.0.0";

/// Processing metrics for performance monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingMetrics {
    /// Schema version for compatibility negotiation
    pub version: String,
    /// Decode stage duration in milliseconds
    pub decode_ms: f64,
    /// Resample stage duration in milliseconds
    pub resample_ms: f64,
    /// Transform stage duration in milliseconds
    pub transform_ms: f64,
    /// Encode stage duration in milliseconds
    pub encode_ms: f64,
    /// Total wall-clock duration in milliseconds
    pub total_ms: f64,
    /// Source payload size in bytes
    pub bytes_in: u64,
    /// Artifact size in bytes
    pub bytes_out: u64,
    /// Compression ratio (bytes_out / bytes_in)
    pub compression_ratio: f64,
    /// Detected input format (lowercase: jpeg, png, webp)
    pub format_in: Option<String>,
    /// Output format
    pub format_out: String,
}

impl Default for ProcessingMetrics {
    fn default() -> Self {
        Self {
            version: PROCESSING_METRICS_VERSION.to_string(),
            decode_ms: 0.0,
            resample_ms: 0.0,
            transform_ms: 0.0,
            encode_ms: 0.0,
            total_ms: 0.0,
            bytes_in: 0,
            bytes_out: 0,
            compression_ratio: 0.0,
            format_in: None,
            format_out: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    #[test]
    fn inspect_reports_format_and_size() {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(9, 4))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        let meta = inspect_header_from_bytes(&buf).unwrap();
        assert_eq!(meta.width, 9);
        assert_eq!(meta.height, 4);
        assert_eq!(meta.format.as_deref(), Some("jpeg"));
    }

    #[test]
    fn supported_formats() {
        assert_eq!(supported_input_formats(), vec!["jpeg", "png", "webp"]);
        assert_eq!(supported_output_formats(), vec!["jpeg", "png"]);
        assert!(!version().is_empty());
    }

    #[test]
    fn default_metrics_carry_schema_version() {
        let m = ProcessingMetrics::default();
        assert_eq!(m.version, PROCESSING_METRICS_VERSION);
        assert_eq!(m.bytes_in, 0);
    }
}
