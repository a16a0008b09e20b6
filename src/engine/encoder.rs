// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg) and PNG (image + oxipng).

use crate::engine::buffer::PixelBuffer;
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::MAX_DIMENSION;
use crate::error::PixelGateError;
use crate::ops::OutputFormat;
use image::{ImageFormat, RgbaImage};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::io::Cursor;

/// JPEG quality derived from a normalized quality factor.
///
/// The factor is the tier-clamped value in (0, 1]; the encoder works in 1-100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySettings {
    quality: f32,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100) as f32,
        }
    }

    /// `round(factor * 100)`, clamped to 1..=100. Non-finite factors map to 100.
    pub fn from_factor(factor: f32) -> Self {
        let percent = if factor.is_finite() {
            (factor * 100.0).round().clamp(1.0, 100.0)
        } else {
            100.0
        };
        Self { quality: percent }
    }

    pub fn quality(&self) -> u8 {
        self.quality as u8
    }

    /// mozjpeg input smoothing; low qualities hide blocking artifacts with more.
    pub fn smoothing_factor(&self) -> u8 {
        if self.quality >= 90.0 {
            0
        } else if self.quality >= 70.0 {
            5
        } else if self.quality >= 60.0 {
            10
        } else {
            18
        }
    }
}

/// Encode a buffer into `format`. `quality_factor` is ignored for PNG.
pub fn encode(
    buffer: &PixelBuffer,
    format: OutputFormat,
    quality_factor: f32,
) -> EngineResult<Vec<u8>> {
    buffer.validate()?;
    let bytes = match format {
        OutputFormat::Jpeg => encode_jpeg(buffer, QualitySettings::from_factor(quality_factor))?,
        OutputFormat::Png => encode_png(buffer)?,
    };
    if bytes.is_empty() {
        return Err(PixelGateError::encode_failure(
            format.as_str(),
            "encoder produced no output",
        ));
    }
    Ok(bytes)
}

/// Composite RGBA onto black and drop alpha, as a canvas JPEG export does.
pub fn flatten_onto_black(buffer: &PixelBuffer) -> Vec<u8> {
    let (w, h) = buffer.dimensions();
    let mut rgb = Vec::with_capacity(w as usize * h as usize * 3);
    for px in buffer.pixels() {
        let a = px[3] as u16;
        if a == 255 {
            rgb.extend_from_slice(&px[..3]);
        } else {
            for &c in &px[..3] {
                rgb.push(((c as u16 * a + 127) / 255) as u8);
            }
        }
    }
    rgb
}

/// Encode to JPEG with mozjpeg: progressive, 4:2:0, optimized scans.
pub fn encode_jpeg(buffer: &PixelBuffer, settings: QualitySettings) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let (w, h) = buffer.dimensions();
        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(PixelGateError::dimension_exceeds_limit(w.max(h), MAX_DIMENSION));
        }

        let pixels = flatten_onto_black(buffer);
        let expected_len = w as usize * h as usize * 3;
        if pixels.len() != expected_len {
            return Err(PixelGateError::corrupt_buffer(expected_len, pixels.len()));
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality);
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.smoothing_factor());

        let estimated_size = (expected_len / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);
        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                PixelGateError::encode_failure("jpeg", format!("mozjpeg: failed to start compress: {e:?}"))
            })?;

            for row in pixels.chunks(w as usize * 3) {
                writer.write_scanlines(row).map_err(|e| {
                    PixelGateError::encode_failure(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                PixelGateError::encode_failure("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }
        Ok(output)
    })
}

/// Encode to lossless RGBA PNG, then re-compress with oxipng. Ancillary chunks
/// are left alone.
pub fn encode_png(buffer: &PixelBuffer) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let (w, h) = buffer.dimensions();
        let img = RgbaImage::from_raw(w, h, buffer.as_raw().to_vec())
            .ok_or_else(|| PixelGateError::corrupt_buffer(w as usize * h as usize * 4, buffer.as_raw().len()))?;

        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| PixelGateError::encode_failure("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(4);
        options.strip = oxipng::StripChunks::None;

        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            PixelGateError::encode_failure("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Size change as a whole percentage: `round((source - output) / source * 100)`.
/// Negative when the artifact grew. Zero when the source was empty.
pub fn reduction_percent(source_bytes: u64, output_bytes: u64) -> i64 {
    if source_bytes == 0 {
        return 0;
    }
    let delta = source_bytes as f64 - output_bytes as f64;
    (delta / source_bytes as f64 * 100.0).round() as i64
}
