#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pixelgate::engine::{calc_capped_dimensions, enhance_dimensions};
use pixelgate::{TierPolicy, ToolKind};

#[derive(Arbitrary, Debug)]
struct Input {
    is_unlocked: bool,
    tool: u8,
    width: u32,
    height: u32,
    size_bytes: usize,
    requested_quality: f32,
    enhancement_level: u8,
}

fuzz_target!(|data: Input| {
    let tool = match data.tool % 3 {
        0 => ToolKind::RemoveBackground,
        1 => ToolKind::Enhance,
        _ => ToolKind::Compress,
    };
    let policy = TierPolicy::resolve(data.is_unlocked, tool);
    let width = data.width.min(50_000);
    let height = data.height.min(50_000);

    if let Some(limit) = policy.max_source_bytes {
        let accepted = policy.enforce_source_len(data.size_bytes).is_ok();
        assert_eq!(accepted, data.size_bytes as u64 <= limit);
    }

    let q = policy.clamp_quality(data.requested_quality);
    assert!(q > 0.0 && q <= policy.quality_factor);

    let cap = policy.max_dimension_px;
    if let Ok((w, h)) = calc_capped_dimensions(width, height, cap) {
        assert!(w <= cap && h <= cap);
    }
    let factor = (data.enhancement_level % 71 + 30) as f32 / 100.0;
    if let Ok((w, h)) = enhance_dimensions(width, height, cap, factor) {
        assert!(w <= cap && h <= cap);
    }
});
