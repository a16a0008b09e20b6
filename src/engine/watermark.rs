// src/engine/watermark.rs
//
// Basic-tier watermark: fixed text rendered with the font8x8 bitmap font in the
// bottom-left corner. Glyph pixels are written fully opaque, so the mark
// survives background masking.

use crate::engine::buffer::PixelBuffer;
use crate::engine::common::EngineResult;
use font8x8::{UnicodeFonts, BASIC_FONTS};

pub const WATERMARK_TEXT: &str = "PixelGate Free";
pub const WATERMARK_COLOR: [u8; 4] = [64, 64, 64, 255];
/// Distance from the left and bottom edges, in pixels.
pub const WATERMARK_MARGIN: i64 = 10;
const GLYPH_SIZE: i64 = 8;

/// Pixel rectangle the watermark occupies before clipping: `(x, y, w, h)`.
pub fn watermark_region(height: u32) -> (i64, i64, i64, i64) {
    let width = WATERMARK_TEXT.chars().count() as i64 * GLYPH_SIZE;
    let top = height as i64 - WATERMARK_MARGIN - GLYPH_SIZE;
    (WATERMARK_MARGIN, top, width, GLYPH_SIZE)
}

/// Stamp the watermark in place. Glyphs that fall outside the buffer are
/// clipped.
pub fn stamp(buffer: &mut PixelBuffer) -> EngineResult<()> {
    buffer.validate()?;
    let (origin_x, origin_y, _, _) = watermark_region(buffer.height());
    draw_text(buffer, WATERMARK_TEXT, origin_x, origin_y, WATERMARK_COLOR);
    Ok(())
}

fn draw_text(buffer: &mut PixelBuffer, text: &str, x: i64, y: i64, color: [u8; 4]) {
    let mut cursor_x = x;
    for ch in text.chars() {
        if let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) {
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..8 {
                    if (bits >> col) & 1 == 0 {
                        continue;
                    }
                    buffer.put_pixel_clipped(cursor_x + col as i64, y + row as i64, color);
                }
            }
        }
        cursor_x += GLYPH_SIZE;
    }
}
