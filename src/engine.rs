// src/engine.rs
//
// The core of pixelgate. A staged raster pipeline that:
// 1. Decodes an upload into an owned RGBA buffer under tier limits
// 2. Resamples, transforms and re-encodes it, one stage at a time
// 3. Runs stages on tokio's blocking pool so callers can await them
//
// This file is a facade over the modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA. Beyond this is likely malicious.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod api;
mod buffer;
mod common;
mod decoder;
mod encoder;
mod pool;
mod resample;
mod source;
mod tasks;
mod tier;
mod transform;
mod watermark;

pub use api::{process_batch, BatchJob, PipelineOrchestrator};
pub use buffer::{PixelBuffer, CHANNELS};
pub use common::{run_with_panic_policy, EngineResult};
pub use decoder::{
    check_dimensions, decode, decode_source, detect_exif_orientation, ensure_dimensions_safe,
    inspect_header, ImageHeader,
};
pub use encoder::{encode, encode_jpeg, encode_png, flatten_onto_black, reduction_percent, QualitySettings};
pub use pool::{batch_thread_count, get_pool};
pub use resample::{
    calc_capped_dimensions, enhance_dimensions, resample, resample_for_enhancement, resize_to,
    ENHANCE_MAX_SCALE,
};
pub use source::{detect_format, format_name, SourceImage, SUPPORTED_INPUT_FORMATS};
pub use tasks::{
    MetricsRecorder, NoProgress, PipelineStage, ProcessTask, ProcessingResult, ProgressEvent,
    ProgressSink, ProgressTracker, RunPlan, StageMachine,
};
pub use tier::{StageBudget, Tier, TierPolicy, BASIC_MAX_SOURCE_BYTES, STAGE_TIMEOUT_ENV};
pub use transform::{apply_step, mask_by_luminance, sharpen_contrast, TransformPlan};
pub use watermark::{stamp as stamp_watermark, watermark_region, WATERMARK_COLOR, WATERMARK_TEXT};
