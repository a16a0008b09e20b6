// tests/integration_tests.rs
//
// End-to-end scenarios through the async PipelineOrchestrator.

use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage, RgbaImage};
use pixelgate::engine::{watermark_region, NoProgress, ProgressEvent};
use pixelgate::{
    PipelineOrchestrator, PixelGateError, ProcessingResult, SourceImage, StageBudget, ToolRequest,
};
use std::io::Cursor;

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

/// Opaque horizontal white-to-black gradient.
fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| {
        let v = 255 - (x as u64 * 255 / (width as u64 - 1)) as u8;
        image::Rgb([v, v, v])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}

fn white_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}

fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9E37_79B9;
    let img = RgbaImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let b = state.to_le_bytes();
        image::Rgba([b[0], b[1], b[2], 255])
    });
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

fn orchestrator() -> PipelineOrchestrator {
    PipelineOrchestrator::with_budget(StageBudget::relaxed())
}

async fn run(source: Vec<u8>, request: ToolRequest, unlocked: bool) -> ProcessingResult {
    orchestrator()
        .run_unlocked_flag(SourceImage::new(source), request, unlocked, &mut NoProgress)
        .await
        .unwrap()
}

fn in_watermark_region(x: u32, y: u32, height: u32) -> bool {
    let (wx, wy, ww, wh) = watermark_region(height);
    let (x, y) = (x as i64, y as i64);
    x >= wx && x < wx + ww && y >= wy && y < wy + wh
}

#[tokio::test(flavor = "multi_thread")]
async fn gradient_through_basic_background_removal() {
    let result = run(gradient_png(2000, 1000), ToolRequest::RemoveBackground, false).await;
    assert_eq!(result.mime_type, "image/png");
    assert_eq!((result.width_px, result.height_px), (512, 256));

    let out = image::load_from_memory(&result.artifact).unwrap().to_rgba8();
    assert_eq!(out.dimensions(), (512, 256));

    let mut watermark_pixels = 0;
    for (x, y, px) in out.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        if in_watermark_region(x, y, 256) {
            if a == 255 && [r, g, b] == [64, 64, 64] {
                watermark_pixels += 1;
            }
            continue;
        }
        let sum = r as u16 + g as u16 + b as u16;
        let expected = if sum > 660 { 0 } else { 255 };
        assert_eq!(a, expected, "pixel ({x}, {y}) rgb=({r}, {g}, {b})");
    }
    assert!(watermark_pixels > 0, "watermark glyphs missing");
}

#[tokio::test]
async fn oversized_payload_rejected_before_decode() {
    let mut payload = jpeg(64, 64);
    payload.resize(12 * 1024 * 1024, 0);
    let mut events = 0;
    let err = orchestrator()
        .run_unlocked_flag(
            SourceImage::new(payload).with_declared_mime("image/jpeg"),
            ToolRequest::RemoveBackground,
            false,
            &mut |_e: ProgressEvent| events += 1,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PixelGateError::PayloadTooLarge { .. }));
    assert_eq!(events, 0);
}

#[tokio::test]
async fn unlocked_enhancement_upscales_by_two_and_a_half() {
    let result = run(
        jpeg(800, 600),
        ToolRequest::Enhance {
            enhancement_level: 100,
        },
        true,
    )
    .await;
    assert_eq!(result.mime_type, "image/jpeg");
    assert_eq!((result.width_px, result.height_px), (2000, 1500));
    let decoded = image::load_from_memory(&result.artifact).unwrap();
    assert_eq!(decoded.dimensions(), (2000, 1500));
}

#[tokio::test]
async fn basic_enhancement_shares_the_4k_bound() {
    let request = ToolRequest::Enhance {
        enhancement_level: 100,
    };
    let basic = run(jpeg(800, 600), request, false).await;
    let unlocked = run(jpeg(800, 600), request, true).await;
    assert_eq!((basic.width_px, basic.height_px), (2000, 1500));
    assert_eq!((unlocked.width_px, unlocked.height_px), (2000, 1500));
    // Basic differs only in the quality cap (0.8 vs 0.95).
    assert!(basic.output_bytes < unlocked.output_bytes);
}

#[tokio::test]
async fn compression_quality_is_monotonic() {
    let source = noisy_png(128, 128);
    let mut sizes = Vec::new();
    for quality_percent in [10u8, 50, 90, 100] {
        let result = run(source.clone(), ToolRequest::Compress { quality_percent }, true).await;
        sizes.push(result.output_bytes);
    }
    assert!(
        sizes.windows(2).all(|w| w[0] <= w[1]),
        "sizes not monotonic: {sizes:?}"
    );
}

#[tokio::test]
async fn basic_tier_caps_compression_quality() {
    let source = noisy_png(96, 96);
    let basic = run(source.clone(), ToolRequest::Compress { quality_percent: 100 }, false).await;
    let basic_80 = run(source.clone(), ToolRequest::Compress { quality_percent: 80 }, false).await;
    let unlocked = run(source, ToolRequest::Compress { quality_percent: 100 }, true).await;
    assert_eq!(basic.artifact, basic_80.artifact);
    assert!(basic.output_bytes < unlocked.output_bytes);
}

#[tokio::test]
async fn tier_isolation_for_background_removal() {
    let source = white_png(1000, 1000);
    let basic = run(source.clone(), ToolRequest::RemoveBackground, false).await;
    let unlocked = run(source, ToolRequest::RemoveBackground, true).await;

    assert!(basic.width_px.max(basic.height_px) <= unlocked.width_px.max(unlocked.height_px));
    assert_eq!((basic.width_px, basic.height_px), (512, 512));
    assert_eq!((unlocked.width_px, unlocked.height_px), (1000, 1000));

    let basic_px = image::load_from_memory(&basic.artifact).unwrap().to_rgba8();
    let unlocked_px = image::load_from_memory(&unlocked.artifact).unwrap().to_rgba8();
    assert!(basic_px.pixels().any(|p| p.0[3] == 255), "basic output lacks watermark");
    assert!(unlocked_px.pixels().all(|p| p.0[3] == 0), "unlocked output is watermarked");
}

#[tokio::test]
async fn compression_never_upscales() {
    let result = run(jpeg(300, 120), ToolRequest::Compress { quality_percent: 70 }, false).await;
    assert_eq!((result.width_px, result.height_px), (300, 120));
    assert_eq!(result.source_bytes, jpeg(300, 120).len() as u64);
}

#[tokio::test]
async fn webp_input_is_accepted() {
    let rgb: Vec<u8> = std::iter::repeat([30u8, 60, 90]).take(50 * 40).flatten().collect();
    let webp = webp::Encoder::from_rgb(&rgb, 50, 40).encode(80.0).to_vec();
    let result = run(webp, ToolRequest::Compress { quality_percent: 60 }, true).await;
    assert_eq!(result.metrics.format_in.as_deref(), Some("webp"));
    assert_eq!((result.width_px, result.height_px), (50, 40));
}

#[tokio::test]
async fn reduction_percent_reflects_sizes() {
    let result = run(noisy_png(64, 64), ToolRequest::Compress { quality_percent: 30 }, true).await;
    let expected = ((result.source_bytes as f64 - result.output_bytes as f64)
        / result.source_bytes as f64
        * 100.0)
        .round() as i64;
    assert_eq!(result.reduction_percent(), expected);
    assert!(result.reduction_percent() > 0);
}
