// src/engine/resample.rs
//
// Target-dimension policy and Lanczos3 resampling of RGBA buffers.
// fast_image_resize does the work; image::imageops is the fallback.

use crate::engine::buffer::{PixelBuffer, CHANNELS};
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::error::PixelGateError;
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::imageops::FilterType;
use image::RgbaImage;

/// Upper bound on the enhancement upscale factor (reached at 100% enhancement).
pub const ENHANCE_MAX_SCALE: f64 = 2.5;

/// Fit `(width, height)` inside a square of `max_dimension`, never upscaling.
///
/// Each axis is rounded independently, so the aspect ratio may drift by a
/// fraction of a pixel.
pub fn calc_capped_dimensions(
    width: u32,
    height: u32,
    max_dimension: u32,
) -> EngineResult<(u32, u32)> {
    validate_dimensions(width, height, max_dimension)?;
    let long = width.max(height);
    if long <= max_dimension {
        return Ok((width, height));
    }
    let scale = max_dimension as f64 / long as f64;
    Ok((scaled(width, scale), scaled(height, scale)))
}

/// Target dimensions for the enhancer.
///
/// `scale = min(max_dimension / long_edge, ENHANCE_MAX_SCALE * factor)`. Low
/// factors can scale below 1, which shrinks the image.
pub fn enhance_dimensions(
    width: u32,
    height: u32,
    max_dimension: u32,
    factor: f32,
) -> EngineResult<(u32, u32)> {
    validate_dimensions(width, height, max_dimension)?;
    if !factor.is_finite() || factor <= 0.0 {
        return Err(PixelGateError::invalid_argument(
            "enhancement_factor",
            factor.to_string(),
            "must be a positive finite number",
        ));
    }
    let long = width.max(height) as f64;
    let scale = (max_dimension as f64 / long).min(ENHANCE_MAX_SCALE * factor as f64);
    let (w, h) = (scaled(width, scale), scaled(height, scale));
    // Rounding can tip the long edge one pixel past the cap.
    Ok((w.min(max_dimension), h.min(max_dimension)))
}

fn validate_dimensions(width: u32, height: u32, max_dimension: u32) -> EngineResult<()> {
    if width == 0 || height == 0 {
        return Err(PixelGateError::invalid_dimensions(width, height));
    }
    if max_dimension == 0 {
        return Err(PixelGateError::invalid_dimensions(max_dimension, max_dimension));
    }
    Ok(())
}

#[inline]
fn scaled(len: u32, scale: f64) -> u32 {
    ((len as f64 * scale).round() as u32).max(1)
}

/// Downscale so the long edge fits `max_dimension`. Smaller images pass through
/// untouched.
pub fn resample(buffer: PixelBuffer, max_dimension: u32) -> EngineResult<PixelBuffer> {
    let (w, h) = buffer.dimensions();
    let (dst_w, dst_h) = calc_capped_dimensions(w, h, max_dimension)?;
    resize_to(buffer, dst_w, dst_h)
}

/// Rescale toward the enhancer's target resolution.
pub fn resample_for_enhancement(
    buffer: PixelBuffer,
    max_dimension: u32,
    factor: f32,
) -> EngineResult<PixelBuffer> {
    let (w, h) = buffer.dimensions();
    let (dst_w, dst_h) = enhance_dimensions(w, h, max_dimension, factor)?;
    resize_to(buffer, dst_w, dst_h)
}

/// Resize to exact dimensions with Lanczos3. Same-size requests return the
/// buffer as is.
pub fn resize_to(buffer: PixelBuffer, dst_width: u32, dst_height: u32) -> EngineResult<PixelBuffer> {
    buffer.validate()?;
    if dst_width == 0 || dst_height == 0 {
        return Err(PixelGateError::invalid_dimensions(dst_width, dst_height));
    }
    let (src_width, src_height) = buffer.dimensions();
    if (src_width, src_height) == (dst_width, dst_height) {
        return Ok(buffer);
    }

    // Opaque sources skip premultiplication and stay exactly opaque.
    let opaque = buffer.is_opaque();
    let pixels = buffer.into_raw();
    let resized = run_with_panic_policy("resample:lanczos3", || {
        fast_resize(src_width, src_height, pixels, opaque, dst_width, dst_height).map_err(|msg| {
            PixelGateError::resize_failed((src_width, src_height), (dst_width, dst_height), msg)
        })
    })?;
    let mut out = PixelBuffer::from_raw(dst_width, dst_height, resized)?;
    if opaque {
        for px in out.pixels_mut() {
            px[3] = 255;
        }
    }
    Ok(out)
}

fn default_resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
}

fn fast_resize(
    src_width: u32,
    src_height: u32,
    mut src_pixels: Vec<u8>,
    opaque: bool,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<Vec<u8>, String> {
    let required_bytes = src_width as usize * src_height as usize * CHANNELS;

    let primary = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        PixelType::U8x4,
    ) {
        Ok(src_image) => resize_with_source_image(&src_image, opaque, dst_width, dst_height),
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let aligned = copy_pixels_to_aligned_image(src_width, src_height, &src_pixels, required_bytes)?;
            resize_with_source_image(&aligned, opaque, dst_width, dst_height)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    match primary {
        Ok(pixels) => Ok(pixels),
        Err(err) => {
            tracing::debug!(target: "pixelgate::pipeline", error = %err, "fast resize failed, using image crate");
            resize_with_image_crate_fallback(src_pixels, src_width, src_height, dst_width, dst_height)
                .map_err(|fallback_err| format!("{err}; image crate fallback failed: {fallback_err}"))
        }
    }
}

fn copy_pixels_to_aligned_image(
    width: u32,
    height: u32,
    src_pixels: &[u8],
    required_bytes: usize,
) -> std::result::Result<fir::images::Image<'static>, String> {
    let mut aligned = fir::images::Image::new(width, height, PixelType::U8x4);
    let buffer = aligned.buffer_mut();
    if buffer.len() != required_bytes || src_pixels.len() < required_bytes {
        return Err(format!(
            "fir alignment fallback buffer mismatch. expected {required_bytes} bytes, got {} bytes",
            buffer.len()
        ));
    }
    buffer.copy_from_slice(&src_pixels[..required_bytes]);
    Ok(aligned)
}

fn resize_with_source_image(
    src_image: &fir::images::Image<'_>,
    opaque: bool,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<Vec<u8>, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, PixelType::U8x4);
    let mut resizer = fir::Resizer::new();

    if opaque {
        resizer
            .resize(src_image, &mut dst_image, &default_resize_options())
            .map_err(|e| format!("fir resize error: {e:?}"))?;
        return Ok(dst_image.into_vec());
    }

    // Premultiply into scratch space; the source keeps straight alpha for the
    // image crate fallback.
    let mul_div = MulDiv::default();
    let mut premultiplied =
        fir::images::Image::new(src_image.width(), src_image.height(), PixelType::U8x4);
    mul_div
        .multiply_alpha(src_image, &mut premultiplied)
        .map_err(|e| format!("failed to premultiply alpha: {e}"))?;

    resizer
        .resize(&premultiplied, &mut dst_image, &default_resize_options())
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    mul_div
        .divide_alpha_inplace(&mut dst_image)
        .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;

    Ok(dst_image.into_vec())
}

fn resize_with_image_crate_fallback(
    src_pixels: Vec<u8>,
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<Vec<u8>, String> {
    let rgba = RgbaImage::from_raw(src_width, src_height, src_pixels)
        .ok_or_else(|| "failed to build rgba image for fallback resize".to_string())?;
    Ok(image::imageops::resize(&rgba, dst_width, dst_height, FilterType::Lanczos3).into_raw())
}
