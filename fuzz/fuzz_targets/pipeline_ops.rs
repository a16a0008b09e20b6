#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pixelgate::engine::TransformPlan;
use pixelgate::ops::{MaskVariant, OutputFormat, TransformStep};
use pixelgate::PixelBuffer;

#[derive(Arbitrary, Debug)]
struct StepSeed {
    kind: u8,
    level: u8,
}

fn build_buffer(data: &[u8]) -> Option<PixelBuffer> {
    let width = data.first().copied().unwrap_or(0) as u32 % 64 + 1;
    let height = data.get(1).copied().unwrap_or(0) as u32 % 64 + 1;
    PixelBuffer::from_fn(width, height, |x, y| {
        let i = (y * width + x) as usize * 4;
        let byte = |k: usize| data.get((i + k) % data.len()).copied().unwrap_or(0);
        [byte(0), byte(1), byte(2), byte(3)]
    })
    .ok()
}

fn seeds_to_steps(seeds: Vec<StepSeed>) -> Vec<TransformStep> {
    seeds
        .into_iter()
        .take(8)
        .map(|seed| match seed.kind % 4 {
            0 => TransformStep::MaskByLuminance {
                variant: MaskVariant::Basic,
            },
            1 => TransformStep::MaskByLuminance {
                variant: MaskVariant::HighFidelity,
            },
            2 => TransformStep::SharpenContrast {
                factor: seed.level as f32 / 200.0,
            },
            _ => TransformStep::StampWatermark,
        })
        .collect()
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let mut unstructured = Unstructured::new(data);
    let seeds: Vec<StepSeed> = match Vec::arbitrary(&mut unstructured) {
        Ok(v) => v,
        Err(_) => return,
    };
    let Some(buffer) = build_buffer(data) else {
        return;
    };
    let dimensions = buffer.dimensions();

    let plan = TransformPlan::new(seeds_to_steps(seeds));
    if plan.validate(OutputFormat::Png).is_err() {
        return;
    }
    // Steps never change dimensions.
    if let Ok(out) = plan.apply(buffer) {
        assert_eq!(out.dimensions(), dimensions);
    }
});
