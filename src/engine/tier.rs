// src/engine/tier.rs
//
// Tier policy: the single table mapping (entitlement, tool) to numeric limits,
// plus the stage wall-clock budget.

use crate::error::PixelGateError;
use crate::ops::ToolKind;
use std::time::{Duration, Instant};

const MIB: u64 = 1024 * 1024;

/// Source size cap for every basic-tier tool.
pub const BASIC_MAX_SOURCE_BYTES: u64 = 5 * MIB;

const BG_BASIC_MAX_DIMENSION: u32 = 512;
const BG_UNLOCKED_MAX_DIMENSION: u32 = 2048;
/// 4K-class long edge the enhancer upscales toward, on both tiers.
pub const ENHANCE_MAX_DIMENSION: u32 = 3840;
const COMPRESS_BASIC_MAX_DIMENSION: u32 = 1024;
const COMPRESS_UNLOCKED_MAX_DIMENSION: u32 = 2048;

const BASIC_QUALITY_CAP: f32 = 0.8;
const ENHANCE_UNLOCKED_QUALITY_CAP: f32 = 0.95;
const FULL_QUALITY: f32 = 1.0;

/// Lowest quality factor the encoder accepts.
const MIN_QUALITY_FACTOR: f32 = 0.01;

const DEFAULT_STAGE_TIMEOUT_MS: u64 = 10_000;
const RELAXED_STAGE_TIMEOUT_MS: u64 = 60_000;

/// Environment override for the per-stage budget, in milliseconds.
pub const STAGE_TIMEOUT_ENV: &str = "PIXELGATE_STAGE_TIMEOUT_MS";

/// Capability tier derived from the entitlement flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Basic,
    Unlocked,
}

impl Tier {
    pub fn from_unlocked(is_unlocked: bool) -> Self {
        if is_unlocked {
            Tier::Unlocked
        } else {
            Tier::Basic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Unlocked => "unlocked",
        }
    }
}

/// Concrete limits for one run. Resolved once; every stage reads the same copy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TierPolicy {
    pub tier: Tier,
    pub max_dimension_px: u32,
    /// `None` means unbounded
    pub max_source_bytes: Option<u64>,
    pub quality_factor: f32,
    pub watermark: bool,
    pub allow_high_fidelity_segmentation: bool,
}

impl TierPolicy {
    /// Resolve the limits for `tool` under the given entitlement.
    pub fn resolve(is_unlocked: bool, tool: ToolKind) -> Self {
        let tier = Tier::from_unlocked(is_unlocked);
        match (tool, tier) {
            (ToolKind::RemoveBackground, Tier::Basic) => Self {
                tier,
                max_dimension_px: BG_BASIC_MAX_DIMENSION,
                max_source_bytes: Some(BASIC_MAX_SOURCE_BYTES),
                quality_factor: FULL_QUALITY,
                watermark: true,
                allow_high_fidelity_segmentation: false,
            },
            (ToolKind::RemoveBackground, Tier::Unlocked) => Self {
                tier,
                max_dimension_px: BG_UNLOCKED_MAX_DIMENSION,
                max_source_bytes: None,
                quality_factor: FULL_QUALITY,
                watermark: false,
                allow_high_fidelity_segmentation: true,
            },
            (ToolKind::Enhance, Tier::Basic) => Self {
                tier,
                max_dimension_px: ENHANCE_MAX_DIMENSION,
                max_source_bytes: Some(BASIC_MAX_SOURCE_BYTES),
                quality_factor: BASIC_QUALITY_CAP,
                watermark: false,
                allow_high_fidelity_segmentation: false,
            },
            (ToolKind::Enhance, Tier::Unlocked) => Self {
                tier,
                max_dimension_px: ENHANCE_MAX_DIMENSION,
                max_source_bytes: None,
                quality_factor: ENHANCE_UNLOCKED_QUALITY_CAP,
                watermark: false,
                allow_high_fidelity_segmentation: true,
            },
            (ToolKind::Compress, Tier::Basic) => Self {
                tier,
                max_dimension_px: COMPRESS_BASIC_MAX_DIMENSION,
                max_source_bytes: Some(BASIC_MAX_SOURCE_BYTES),
                quality_factor: BASIC_QUALITY_CAP,
                watermark: false,
                allow_high_fidelity_segmentation: false,
            },
            (ToolKind::Compress, Tier::Unlocked) => Self {
                tier,
                max_dimension_px: COMPRESS_UNLOCKED_MAX_DIMENSION,
                max_source_bytes: None,
                quality_factor: FULL_QUALITY,
                watermark: false,
                allow_high_fidelity_segmentation: true,
            },
        }
    }

    /// Reject payloads above the tier's byte cap. Runs before any decode work.
    pub fn enforce_source_len(&self, len: usize) -> Result<(), PixelGateError> {
        if let Some(limit) = self.max_source_bytes {
            let len_u64 = len as u64;
            if len_u64 > limit {
                return Err(PixelGateError::payload_too_large(len_u64, limit));
            }
        }
        Ok(())
    }

    /// Cap a requested quality factor at the tier maximum.
    pub fn clamp_quality(&self, requested: f32) -> f32 {
        let requested = if requested.is_finite() {
            requested
        } else {
            self.quality_factor
        };
        requested.clamp(MIN_QUALITY_FACTOR, self.quality_factor)
    }
}

/// Wall-clock budget for each pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageBudget {
    pub enabled: bool,
    pub decode_ms: u64,
    pub resample_ms: u64,
    pub transform_ms: u64,
    pub encode_ms: u64,
}

impl Default for StageBudget {
    fn default() -> Self {
        Self::uniform(DEFAULT_STAGE_TIMEOUT_MS)
    }
}

impl StageBudget {
    pub fn uniform(timeout_ms: u64) -> Self {
        Self {
            enabled: true,
            decode_ms: timeout_ms,
            resample_ms: timeout_ms,
            transform_ms: timeout_ms,
            encode_ms: timeout_ms,
        }
    }

    /// Generous budget for very large unlocked-tier inputs.
    pub fn relaxed() -> Self {
        Self::uniform(RELAXED_STAGE_TIMEOUT_MS)
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Default budget, overridden by `PIXELGATE_STAGE_TIMEOUT_MS` when it parses.
    pub fn from_env() -> Self {
        std::env::var(STAGE_TIMEOUT_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Self::uniform)
            .unwrap_or_default()
    }

    pub fn with_decode_ms(mut self, ms: u64) -> Self {
        self.decode_ms = ms;
        self
    }

    pub fn with_resample_ms(mut self, ms: u64) -> Self {
        self.resample_ms = ms;
        self
    }

    pub fn with_transform_ms(mut self, ms: u64) -> Self {
        self.transform_ms = ms;
        self
    }

    pub fn with_encode_ms(mut self, ms: u64) -> Self {
        self.encode_ms = ms;
        self
    }

    /// Budget for a stage by name; `None` when budgets are disabled.
    pub fn limit_for(&self, stage: &str) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let ms = match stage {
            "decode" => self.decode_ms,
            "resample" => self.resample_ms,
            "transform" => self.transform_ms,
            "encode" => self.encode_ms,
            _ => return None,
        };
        Some(Duration::from_millis(ms))
    }

    /// Fail when a stage that started at `started_at` overran its budget.
    pub fn enforce(&self, started_at: Instant, stage: &'static str) -> Result<(), PixelGateError> {
        let Some(limit) = self.limit_for(stage) else {
            return Ok(());
        };
        let elapsed = started_at.elapsed();
        if elapsed > limit {
            return Err(PixelGateError::processing_timeout(
                stage,
                limit.as_millis() as u64,
                elapsed.as_millis() as u64,
            ));
        }
        Ok(())
    }
}
