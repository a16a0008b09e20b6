// src/ops.rs
//
// Tool requests, transform steps and output formats.
// These are cheap to create and store - the expensive work happens in the engine.

use crate::error::{PixelGateError, Result};
use bitflags::bitflags;

/// Smallest enhancement level the enhancer slider offers.
pub const MIN_ENHANCEMENT_LEVEL: u8 = 30;
/// Largest enhancement level (100%).
pub const MAX_ENHANCEMENT_LEVEL: u8 = 100;
/// Smallest quality the compressor slider offers.
pub const MIN_QUALITY_PERCENT: u8 = 10;
/// Largest quality (100%).
pub const MAX_QUALITY_PERCENT: u8 = 100;

/// The three tools that share the raster pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Enhance,
    RemoveBackground,
    Compress,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Enhance => "enhance",
            ToolKind::RemoveBackground => "remove_background",
            ToolKind::Compress => "compress",
        }
    }

    /// Output format each tool exports.
    pub fn output_format(&self) -> OutputFormat {
        match self {
            ToolKind::RemoveBackground => OutputFormat::Png,
            ToolKind::Enhance | ToolKind::Compress => OutputFormat::Jpeg,
        }
    }
}

/// A tool invocation together with its user-tunable knob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolRequest {
    /// Enhancement level in percent (30-100)
    Enhance { enhancement_level: u8 },
    /// Background removal has no knob beyond the tier
    RemoveBackground,
    /// Quality slider in percent (10-100)
    Compress { quality_percent: u8 },
}

impl ToolRequest {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolRequest::Enhance { .. } => ToolKind::Enhance,
            ToolRequest::RemoveBackground => ToolKind::RemoveBackground,
            ToolRequest::Compress { .. } => ToolKind::Compress,
        }
    }

    /// Reject knob values outside the ranges the UI exposes.
    pub fn validate(&self) -> Result<()> {
        match *self {
            ToolRequest::Enhance { enhancement_level } => {
                if !(MIN_ENHANCEMENT_LEVEL..=MAX_ENHANCEMENT_LEVEL).contains(&enhancement_level) {
                    return Err(PixelGateError::invalid_argument(
                        "enhancement_level",
                        enhancement_level.to_string(),
                        format!(
                            "must be between {MIN_ENHANCEMENT_LEVEL} and {MAX_ENHANCEMENT_LEVEL}"
                        ),
                    ));
                }
            }
            ToolRequest::Compress { quality_percent } => {
                if !(MIN_QUALITY_PERCENT..=MAX_QUALITY_PERCENT).contains(&quality_percent) {
                    return Err(PixelGateError::invalid_argument(
                        "quality_percent",
                        quality_percent.to_string(),
                        format!("must be between {MIN_QUALITY_PERCENT} and {MAX_QUALITY_PERCENT}"),
                    ));
                }
            }
            ToolRequest::RemoveBackground => {}
        }
        Ok(())
    }

    /// Normalized enhancement factor in [0, 1]; zero for the other tools.
    pub fn enhancement_factor(&self) -> f32 {
        match *self {
            ToolRequest::Enhance { enhancement_level } => enhancement_level as f32 / 100.0,
            _ => 0.0,
        }
    }

    /// Quality factor the user asked for, before tier clamping.
    /// Enhancement always asks for full quality and lets the tier cap it.
    pub fn requested_quality(&self) -> f32 {
        match *self {
            ToolRequest::Compress { quality_percent } => quality_percent as f32 / 100.0,
            ToolRequest::Enhance { .. } | ToolRequest::RemoveBackground => 1.0,
        }
    }
}

/// Which background-segmentation heuristic MaskByLuminance runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskVariant {
    /// Average brightness threshold, no partial transparency
    Basic,
    /// Weighted luma + saturation with a partial-transparency band
    HighFidelity,
}

/// A single pixel transformation. Each step maps a buffer to a buffer of the
/// same dimensions.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformStep {
    /// Heuristic background removal: only alpha is modified
    MaskByLuminance { variant: MaskVariant },

    /// Color filter chain followed by a per-channel contrast boost
    SharpenContrast { factor: f32 },

    /// Fixed opaque text in the bottom-left corner
    StampWatermark,
}

bitflags! {
    /// State a step depends on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StepRequirement: u8 {
        /// The step must be the last one in a plan
        const TERMINAL = 0b0000_0001;
    }

    /// Channels a step may change.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StepEffect: u8 {
        const MODIFIES_COLOR = 0b0000_0001;
        const MODIFIES_ALPHA = 0b0000_0010;
    }
}

/// Static description of what a step needs and what it touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepContract {
    pub name: &'static str,
    pub requires: StepRequirement,
    pub effects: StepEffect,
}

impl TransformStep {
    pub fn contract(&self) -> StepContract {
        match self {
            TransformStep::MaskByLuminance { .. } => StepContract {
                name: "mask_by_luminance",
                requires: StepRequirement::empty(),
                effects: StepEffect::MODIFIES_ALPHA,
            },
            TransformStep::SharpenContrast { .. } => StepContract {
                name: "sharpen_contrast",
                requires: StepRequirement::empty(),
                effects: StepEffect::MODIFIES_COLOR,
            },
            TransformStep::StampWatermark => StepContract {
                name: "stamp_watermark",
                requires: StepRequirement::TERMINAL,
                effects: StepEffect::MODIFIES_COLOR | StepEffect::MODIFIES_ALPHA,
            },
        }
    }
}

/// Output format for encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    /// Whether the encoded artifact keeps the alpha channel.
    pub fn preserves_alpha(&self) -> bool {
        matches!(self, OutputFormat::Png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_slider_bounds() {
        assert!(ToolRequest::Enhance { enhancement_level: 30 }.validate().is_ok());
        assert!(ToolRequest::Enhance { enhancement_level: 100 }.validate().is_ok());
        assert!(ToolRequest::Compress { quality_percent: 10 }.validate().is_ok());
        assert!(ToolRequest::Compress { quality_percent: 100 }.validate().is_ok());
        assert!(ToolRequest::RemoveBackground.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_knobs() {
        let err = ToolRequest::Enhance { enhancement_level: 29 }
            .validate()
            .unwrap_err();
        assert!(matches!(err, PixelGateError::InvalidArgument { .. }));
        assert!(ToolRequest::Enhance { enhancement_level: 101 }.validate().is_err());
        assert!(ToolRequest::Compress { quality_percent: 9 }.validate().is_err());
        assert!(ToolRequest::Compress { quality_percent: 101 }.validate().is_err());
    }

    #[test]
    fn enhancement_factor_is_normalized() {
        let req = ToolRequest::Enhance { enhancement_level: 75 };
        assert!((req.enhancement_factor() - 0.75).abs() < f32::EPSILON);
        assert_eq!(ToolRequest::RemoveBackground.enhancement_factor(), 0.0);
    }

    #[test]
    fn requested_quality_follows_slider() {
        let req = ToolRequest::Compress { quality_percent: 40 };
        assert!((req.requested_quality() - 0.4).abs() < f32::EPSILON);
        assert_eq!(ToolRequest::Enhance { enhancement_level: 50 }.requested_quality(), 1.0);
    }

    #[test]
    fn tool_output_formats() {
        assert_eq!(ToolKind::RemoveBackground.output_format(), OutputFormat::Png);
        assert_eq!(ToolKind::Enhance.output_format(), OutputFormat::Jpeg);
        assert_eq!(ToolKind::Compress.output_format(), OutputFormat::Jpeg);
        assert!(OutputFormat::Png.preserves_alpha());
        assert!(!OutputFormat::Jpeg.preserves_alpha());
    }

    #[test]
    fn watermark_contract_is_terminal() {
        let contract = TransformStep::StampWatermark.contract();
        assert!(contract.requires.contains(StepRequirement::TERMINAL));
        assert!(contract.effects.contains(StepEffect::MODIFIES_ALPHA));

        let mask = TransformStep::MaskByLuminance {
            variant: MaskVariant::Basic,
        }
        .contract();
        assert_eq!(mask.effects, StepEffect::MODIFIES_ALPHA);
    }
}
