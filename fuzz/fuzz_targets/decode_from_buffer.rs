#![no_main]

use libfuzzer_sys::fuzz_target;
use pixelgate::engine::decode_source;
use pixelgate::{SourceImage, TierPolicy, ToolKind};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let policy = TierPolicy::resolve(true, ToolKind::RemoveBackground);
    let _ = decode_source(&SourceImage::new(data.to_vec()), &policy);
});
