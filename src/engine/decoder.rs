// src/engine/decoder.rs
//
// Decoder operations: size gate, header guard, then JPEG (mozjpeg), PNG (zune-png)
// or WebP (libwebp) into an RGBA PixelBuffer.

use crate::engine::buffer::PixelBuffer;
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::source::{detect_format, format_name, is_supported_input, SourceImage};
use crate::engine::tier::TierPolicy;
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::PixelGateError;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

/// Width, height and format read from the container header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

/// Decode `source` under `policy`, returning the raster and the sniffed format.
///
/// Order matters: the byte-size gate runs before any header parsing, and the
/// header dimension guard runs before any pixel allocation.
pub fn decode_source(
    source: &SourceImage,
    policy: &TierPolicy,
) -> EngineResult<(PixelBuffer, ImageFormat)> {
    policy.enforce_source_len(source.len())?;

    let bytes = source.as_bytes();
    let format = match detect_format(bytes) {
        Some(fmt) if is_supported_input(fmt) => fmt,
        Some(fmt) => return Err(PixelGateError::unsupported_format(format_name(fmt))),
        None => return Err(PixelGateError::unsupported_format("unknown")),
    };

    if source.declared_mime_mismatch() {
        tracing::debug!(
            target: "pixelgate::pipeline",
            declared = source.declared_mime().unwrap_or_default(),
            detected = format_name(format),
            "declared MIME type disagrees with content; using content"
        );
    }

    ensure_dimensions_safe(bytes)?;

    let img = match format {
        ImageFormat::Jpeg => decode_jpeg_mozjpeg(bytes)?,
        ImageFormat::Png => decode_png_zune(bytes)?,
        _ => decode_webp_libwebp(bytes)?,
    };

    let img = match detect_exif_orientation(bytes) {
        Some(orientation) => apply_orientation(img, orientation),
        None => img,
    };

    let buffer = PixelBuffer::from_rgba_image(img.into_rgba8())?;
    Ok((buffer, format))
}

/// Decode `source` into an RGBA raster.
pub fn decode(source: &SourceImage, policy: &TierPolicy) -> EngineResult<PixelBuffer> {
    decode_source(source, policy).map(|(buffer, _)| buffer)
}

fn corrupt(format: &'static str, detail: impl std::fmt::Display) -> PixelGateError {
    PixelGateError::unsupported_format(format!("{format} (undecodable: {detail})"))
}

/// JPEG through mozjpeg, always converted to RGB.
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(corrupt("jpeg", "missing EOI marker"));
        }

        let decompress =
            Decompress::new_mem(data).map_err(|e| corrupt("jpeg", format!("init: {e:?}")))?;
        let mut decompress = decompress
            .rgb()
            .map_err(|e| corrupt("jpeg", format!("rgb conversion: {e:?}")))?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DIMENSION as usize || height > MAX_DIMENSION as usize {
            return Err(PixelGateError::dimension_exceeds_limit(
                width.max(height).min(u32::MAX as usize) as u32,
                MAX_DIMENSION,
            ));
        }
        let width_u32 = width as u32;
        let height_u32 = height as u32;
        check_dimensions(width_u32, height_u32)?;

        let pixels: Vec<[u8; 3]> = decompress
            .read_scanlines()
            .map_err(|e| corrupt("jpeg", format!("scanlines: {e:?}")))?;
        let flat: Vec<u8> = pixels.into_iter().flatten().collect();

        RgbImage::from_raw(width_u32, height_u32, flat)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| corrupt("jpeg", "short scanline data"))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder.decode().map_err(|e| corrupt("png", format!("{e:?}")))?;

        let (width, height) = decoder
            .dimensions()
            .ok_or_else(|| corrupt("png", "missing header info"))?;
        let (width, height) = (width as u32, height as u32);
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => return Err(corrupt("png", "unexpected non-U8 pixel buffer")),
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| corrupt("png", "missing colorspace"))?;

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
            ColorSpace::RGBA => {
                RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
            }
            ColorSpace::Luma => {
                GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
            }
            ColorSpace::LumaA => {
                GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
            }
            other => return Err(corrupt("png", format!("colorspace {other:?}"))),
        };
        img.ok_or_else(|| corrupt("png", "pixel data does not match header"))
    })
}

/// Decode WebP using libwebp. Animated WebP falls back to the image crate,
/// which yields the first frame.
pub fn decode_webp_libwebp(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        let features = BitstreamFeatures::new(data)
            .ok_or_else(|| corrupt("webp", "unreadable bitstream features"))?;

        if features.has_animation() {
            return image::load_from_memory_with_format(data, ImageFormat::WebP)
                .map_err(|e| corrupt("webp", e));
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| corrupt("webp", "libwebp decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Reject zero-sized rasters and anything past `MAX_DIMENSION` / `MAX_PIXELS`.
pub fn check_dimensions(width: u32, height: u32) -> EngineResult<()> {
    if width == 0 || height == 0 {
        return Err(PixelGateError::invalid_dimensions(width, height));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PixelGateError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(PixelGateError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}

/// Header-only dimension guard, run before any pixel allocation.
/// Headers the reader cannot parse are left for the full decoder to reject.
pub fn ensure_dimensions_safe(bytes: &[u8]) -> EngineResult<()> {
    let cursor = Cursor::new(bytes);
    if let Ok(reader) = ImageReader::new(cursor).with_guessed_format() {
        if let Ok((width, height)) = reader.into_dimensions() {
            return check_dimensions(width, height);
        }
    }
    Ok(())
}

/// Read width, height and format from the header without decoding pixels.
pub fn inspect_header(bytes: &[u8]) -> EngineResult<ImageHeader> {
    let format = match detect_format(bytes) {
        Some(fmt) if is_supported_input(fmt) => fmt,
        Some(fmt) => return Err(PixelGateError::unsupported_format(format_name(fmt))),
        None => return Err(PixelGateError::unsupported_format("unknown")),
    };
    let reader = ImageReader::with_format(Cursor::new(bytes), format);
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| corrupt(format_name(format), e))?;
    Ok(ImageHeader {
        width,
        height,
        format,
    })
}

/// EXIF Orientation (1-8) from the primary IFD, if present and sane.
pub fn detect_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    (1..=8).contains(&orientation).then_some(orientation)
}

/// Rotate/flip so the raster matches how a browser draws the photo.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
