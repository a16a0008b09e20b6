// src/engine/buffer.rs
//
// PixelBuffer: the RGBA8 raster that flows stage to stage by ownership.

use crate::error::PixelGateError;
use image::RgbaImage;

type BufferResult<T> = std::result::Result<T, PixelGateError>;

/// Bytes per pixel (R, G, B, A at one byte each).
pub const CHANNELS: usize = 4;

/// Owned RGBA8 raster with explicit dimensions.
///
/// The backing storage is always exactly `width * height * 4` bytes. Fields are
/// private and mutable access only hands out fixed-length slices, so the length
/// cannot drift; anything that changes dimensions builds a new buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a fully transparent black buffer.
    pub fn new(width: u32, height: u32) -> BufferResult<Self> {
        let len = byte_len(width, height)?;
        Ok(Self {
            width,
            height,
            data: vec![0; len],
        })
    }

    /// Allocate a buffer filled with one RGBA value.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> BufferResult<Self> {
        let len = byte_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..(len / CHANNELS) {
            data.extend_from_slice(&rgba);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Take ownership of raw RGBA bytes, validating the length invariant.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> BufferResult<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(PixelGateError::corrupt_buffer(expected, data.len()));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build from a pixel generator, row-major.
    pub fn from_fn(
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> [u8; 4],
    ) -> BufferResult<Self> {
        let len = byte_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Zero-copy conversion from an `image` RGBA buffer.
    pub fn from_rgba_image(img: RgbaImage) -> BufferResult<Self> {
        let (width, height) = img.dimensions();
        Self::from_raw(width, height, img.into_raw())
    }

    /// Zero-copy conversion into an `image` RGBA buffer.
    pub fn into_rgba_image(self) -> BufferResult<RgbaImage> {
        let (width, height) = (self.width, self.height);
        let actual = self.data.len();
        RgbaImage::from_raw(width, height, self.data)
            .ok_or_else(|| PixelGateError::corrupt_buffer(width as usize * height as usize * CHANNELS, actual))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Longest edge in pixels.
    pub fn long_edge(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// RGBA value at (x, y). Panics when out of bounds, like slice indexing.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = self.index_of(x, y);
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }

    /// Overwrite the pixel at (x, y) if it is inside the buffer.
    pub fn put_pixel_clipped(&mut self, x: i64, y: i64, rgba: [u8; 4]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let idx = self.index_of(x as u32, y as u32);
        self.data[idx..idx + CHANNELS].copy_from_slice(&rgba);
    }

    /// Iterate pixels as mutable 4-byte chunks.
    pub fn pixels_mut(&mut self) -> std::slice::ChunksExactMut<'_, u8> {
        self.data.chunks_exact_mut(CHANNELS)
    }

    /// Iterate pixels as 4-byte chunks.
    pub fn pixels(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(CHANNELS)
    }

    /// True when every alpha value is 255.
    pub fn is_opaque(&self) -> bool {
        self.data.iter().skip(3).step_by(CHANNELS).all(|&a| a == 255)
    }

    /// Re-check the invariant. Steps call this before touching pixels.
    pub fn validate(&self) -> BufferResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PixelGateError::invalid_dimensions(self.width, self.height));
        }
        let expected = byte_len(self.width, self.height)?;
        if self.data.len() != expected {
            return Err(PixelGateError::corrupt_buffer(expected, self.data.len()));
        }
        Ok(())
    }

    fn index_of(&self, x: u32, y: u32) -> usize {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }
}

fn byte_len(width: u32, height: u32) -> BufferResult<usize> {
    if width == 0 || height == 0 {
        return Err(PixelGateError::invalid_dimensions(width, height));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(CHANNELS))
        .ok_or_else(|| PixelGateError::invalid_dimensions(width, height))
}
