// src/engine/transform.rs
//
// Pixel transform steps and the plan that orders them per tool.

use crate::engine::buffer::PixelBuffer;
use crate::engine::common::EngineResult;
use crate::engine::tier::TierPolicy;
use crate::engine::watermark;
use crate::error::PixelGateError;
use crate::ops::{
    MaskVariant, OutputFormat, StepEffect, StepRequirement, ToolRequest, TransformStep,
};

// High-fidelity mask thresholds. Brightness is compared in f64 so exact
// boundaries like gray 180 stay on the strict side.
const HF_CLEAR_BRIGHTNESS: f64 = 240.0;
const HF_NEUTRAL_BRIGHTNESS: f64 = 200.0;
const HF_NEUTRAL_SATURATION: u8 = 30;
const HF_PARTIAL_BRIGHTNESS: f64 = 180.0;
const HF_PARTIAL_SATURATION: u8 = 50;
const HF_PARTIAL_ALPHA: f64 = 0.3;

/// Basic mask: mean channel value above 220, i.e. R+G+B above 660.
const BASIC_CLEAR_SUM: u16 = 220 * 3;

// Enhancement coefficients, each scaled by the enhancement factor
const CONTRAST_GAIN: f32 = 0.2;
const BRIGHTNESS_GAIN: f32 = 0.1;
const SATURATION_GAIN: f32 = 0.15;
const BLUR_BASE_SIGMA: f32 = 0.5;
const CHANNEL_BOOST: f32 = 0.3;
const BOOST_PIVOT: f32 = 128.0;

/// Ordered list of steps for one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformPlan {
    steps: Vec<TransformStep>,
}

impl TransformPlan {
    pub fn new(steps: Vec<TransformStep>) -> Self {
        Self { steps }
    }

    /// Steps for a tool under a resolved tier policy.
    pub fn for_tool(request: &ToolRequest, policy: &TierPolicy) -> Self {
        let steps = match request {
            ToolRequest::RemoveBackground => {
                let variant = if policy.allow_high_fidelity_segmentation {
                    MaskVariant::HighFidelity
                } else {
                    MaskVariant::Basic
                };
                let mut steps = vec![TransformStep::MaskByLuminance { variant }];
                if policy.watermark {
                    steps.push(TransformStep::StampWatermark);
                }
                steps
            }
            ToolRequest::Enhance { .. } => vec![TransformStep::SharpenContrast {
                factor: request.enhancement_factor(),
            }],
            ToolRequest::Compress { .. } => Vec::new(),
        };
        Self { steps }
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check step contracts against each other and the output format.
    pub fn validate(&self, output: OutputFormat) -> EngineResult<()> {
        let last = self.steps.len().saturating_sub(1);
        for (idx, step) in self.steps.iter().enumerate() {
            let contract = step.contract();
            if contract.requires.contains(StepRequirement::TERMINAL) && idx != last {
                return Err(PixelGateError::invalid_argument(
                    "transform_plan",
                    contract.name,
                    "step must be the last in the plan",
                ));
            }
            if contract.effects.contains(StepEffect::MODIFIES_ALPHA) && !output.preserves_alpha() {
                return Err(PixelGateError::invalid_argument(
                    "transform_plan",
                    contract.name,
                    format!("alpha changes would be lost when encoding {}", output.as_str()),
                ));
            }
            if let TransformStep::SharpenContrast { factor } = step {
                if !factor.is_finite() || !(0.0..=1.0).contains(factor) {
                    return Err(PixelGateError::invalid_argument(
                        "enhancement_factor",
                        factor.to_string(),
                        "must be within [0, 1]",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Run every step in order. The buffer moves through each step.
    pub fn apply(&self, buffer: PixelBuffer) -> EngineResult<PixelBuffer> {
        self.steps
            .iter()
            .try_fold(buffer, |buf, step| apply_step(step, buf))
    }
}

/// Apply a single step.
pub fn apply_step(step: &TransformStep, mut buffer: PixelBuffer) -> EngineResult<PixelBuffer> {
    match step {
        TransformStep::MaskByLuminance { variant } => {
            mask_by_luminance(&mut buffer, *variant)?;
            Ok(buffer)
        }
        TransformStep::SharpenContrast { factor } => sharpen_contrast(buffer, *factor),
        TransformStep::StampWatermark => {
            watermark::stamp(&mut buffer)?;
            Ok(buffer)
        }
    }
}

/// Heuristic background segmentation. Only alpha changes.
pub fn mask_by_luminance(buffer: &mut PixelBuffer, variant: MaskVariant) -> EngineResult<()> {
    buffer.validate()?;
    match variant {
        MaskVariant::Basic => {
            for px in buffer.pixels_mut() {
                let sum = px[0] as u16 + px[1] as u16 + px[2] as u16;
                if sum > BASIC_CLEAR_SUM {
                    px[3] = 0;
                }
            }
        }
        MaskVariant::HighFidelity => {
            for px in buffer.pixels_mut() {
                px[3] = high_fidelity_alpha(px[0], px[1], px[2], px[3]);
            }
        }
    }
    Ok(())
}

#[inline]
fn high_fidelity_alpha(r: u8, g: u8, b: u8, a: u8) -> u8 {
    let brightness = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
    let saturation = r.max(g).max(b) - r.min(g).min(b);
    if brightness > HF_CLEAR_BRIGHTNESS
        || (brightness > HF_NEUTRAL_BRIGHTNESS && saturation < HF_NEUTRAL_SATURATION)
    {
        0
    } else if brightness > HF_PARTIAL_BRIGHTNESS && saturation < HF_PARTIAL_SATURATION {
        (a as f64 * HF_PARTIAL_ALPHA).round() as u8
    } else {
        a
    }
}

/// Enhancement: contrast, brightness and saturation filters, an optional
/// softening blur, then a per-channel contrast boost. Alpha is untouched.
pub fn sharpen_contrast(mut buffer: PixelBuffer, factor: f32) -> EngineResult<PixelBuffer> {
    buffer.validate()?;
    let contrast = 1.0 + CONTRAST_GAIN * factor;
    let brightness = 1.0 + BRIGHTNESS_GAIN * factor;
    let saturation = saturate_matrix(1.0 + SATURATION_GAIN * factor);

    for px in buffer.pixels_mut() {
        let mut rgb = [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
        ];
        for c in rgb.iter_mut() {
            *c = ((*c - 0.5) * contrast + 0.5).clamp(0.0, 1.0);
        }
        for c in rgb.iter_mut() {
            *c = (*c * brightness).clamp(0.0, 1.0);
        }
        let [r, g, b] = rgb;
        for (channel, row) in px.iter_mut().zip(saturation.iter()) {
            let v = (row[0] * r + row[1] * g + row[2] * b).clamp(0.0, 1.0);
            *channel = (v * 255.0).round() as u8;
        }
    }

    let sigma = (BLUR_BASE_SIGMA - BLUR_BASE_SIGMA * factor).max(0.0);
    if sigma > 0.0 {
        buffer = blur_rgb(buffer, sigma)?;
    }

    let boost = CHANNEL_BOOST * factor;
    for px in buffer.pixels_mut() {
        for c in px.iter_mut().take(3) {
            let v = *c as f32;
            *c = (v + (v - BOOST_PIVOT) * boost).round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(buffer)
}

/// Filter Effects `saturate` matrix.
fn saturate_matrix(s: f32) -> [[f32; 3]; 3] {
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

/// Gaussian blur of the color channels; alpha is copied back unchanged.
fn blur_rgb(buffer: PixelBuffer, sigma: f32) -> EngineResult<PixelBuffer> {
    let img = buffer.into_rgba_image()?;
    let mut blurred = image::imageops::blur(&img, sigma);
    for (dst, src) in blurred.pixels_mut().zip(img.pixels()) {
        dst.0[3] = src.0[3];
    }
    PixelBuffer::from_rgba_image(blurred)
}
