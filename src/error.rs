// src/error.rs
//
// Typed failures for a pipeline run. Every variant ends the run that raised it;
// nothing is retried and no partial artifact is produced.
//
// Variants group into four categories so the tool UI can pick a message:
// bad knobs and geometry, codec trouble, tier or safety limits, and bugs.

use std::borrow::Cow;
use thiserror::Error;

/// Coarse grouping of `PixelGateError` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Out-of-range knobs or zero-sized geometry
    UserError,
    /// The upload could not be decoded, resized or re-encoded
    CodecError,
    /// Payload size, header dimensions or a stage budget was exceeded
    ResourceLimit,
    /// A broken invariant inside the crate
    InternalBug,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }

    /// Stable `PIXELGATE_*` code, safe to log and match on.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "PIXELGATE_USER_ERROR",
            ErrorCategory::CodecError => "PIXELGATE_CODEC_ERROR",
            ErrorCategory::ResourceLimit => "PIXELGATE_RESOURCE_LIMIT",
            ErrorCategory::InternalBug => "PIXELGATE_INTERNAL_BUG",
        }
    }
}

/// pixelgate error types
///
/// Every variant is terminal for the run that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PixelGateError {
    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    // Size Limit Errors
    #[error("Source payload of {size} bytes exceeds the tier limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Stage '{stage}' exceeded its {limit_ms}ms budget (elapsed: {elapsed_ms}ms)")]
    ProcessingTimeout {
        stage: Cow<'static, str>,
        limit_ms: u64,
        elapsed_ms: u64,
    },

    // Buffer / geometry Errors
    #[error("Invalid dimensions: width={width}, height={height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Corrupt pixel buffer: expected {expected} bytes, found {actual}")]
    CorruptBuffer { expected: usize, actual: usize },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailure {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Configuration Errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

// Constructor Helpers
impl PixelGateError {
    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn payload_too_large(size: u64, limit: u64) -> Self {
        Self::PayloadTooLarge { size, limit }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn processing_timeout(
        stage: impl Into<Cow<'static, str>>,
        limit_ms: u64,
        elapsed_ms: u64,
    ) -> Self {
        Self::ProcessingTimeout {
            stage: stage.into(),
            limit_ms,
            elapsed_ms,
        }
    }

    pub fn invalid_dimensions(width: u32, height: u32) -> Self {
        Self::InvalidDimensions { width, height }
    }

    pub fn corrupt_buffer(expected: usize, actual: usize) -> Self {
        Self::CorruptBuffer { expected, actual }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failure(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailure {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// A fresh run with different input or an unlocked tier can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidDimensions { .. } => {
                ErrorCategory::UserError
            }

            Self::UnsupportedFormat { .. }
            | Self::EncodeFailure { .. }
            // ResizeFailed is a processing failure inside the interpolation
            // backend, which behaves like a codec failure for callers.
            | Self::ResizeFailed { .. } => ErrorCategory::CodecError,

            Self::PayloadTooLarge { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::ProcessingTimeout { .. } => ErrorCategory::ResourceLimit,

            Self::CorruptBuffer { .. } | Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, PixelGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PixelGateError::payload_too_large(12_000_000, 5_242_880);
        assert!(err.to_string().contains("12000000"));
        assert!(err.to_string().contains("5242880"));
    }

    #[test]
    fn test_error_recoverable() {
        assert!(PixelGateError::payload_too_large(2, 1).is_recoverable());
        assert!(PixelGateError::invalid_argument("quality_percent", "5", "too low").is_recoverable());
        assert!(PixelGateError::processing_timeout("decode", 10, 20).is_recoverable());
        assert!(!PixelGateError::unsupported_format("gif").is_recoverable());
        assert!(!PixelGateError::corrupt_buffer(16, 15).is_recoverable());
    }

    #[test]
    fn test_error_category_user_error() {
        assert_eq!(
            PixelGateError::invalid_argument("enhancement_level", "10", "below 30").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            PixelGateError::invalid_dimensions(0, 10).category(),
            ErrorCategory::UserError
        );
    }

    #[test]
    fn test_error_category_codec_error() {
        assert_eq!(
            PixelGateError::unsupported_format("gif").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            PixelGateError::encode_failure("jpeg", "empty output").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            PixelGateError::resize_failed((100, 100), (50, 50), "test").category(),
            ErrorCategory::CodecError
        );
    }

    #[test]
    fn test_error_category_resource_limit() {
        assert_eq!(
            PixelGateError::payload_too_large(2, 1).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            PixelGateError::dimension_exceeds_limit(40000, 32768).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            PixelGateError::pixel_count_exceeds_limit(200_000_000, 100_000_000).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            PixelGateError::processing_timeout("encode", 1, 2).category(),
            ErrorCategory::ResourceLimit
        );
    }

    #[test]
    fn test_error_category_internal_bug() {
        assert_eq!(
            PixelGateError::corrupt_buffer(4, 3).category(),
            ErrorCategory::InternalBug
        );
        assert_eq!(
            PixelGateError::internal_panic("test").category(),
            ErrorCategory::InternalBug
        );
    }

    #[test]
    fn test_error_category_codes() {
        assert_eq!(ErrorCategory::UserError.as_str(), "UserError");
        assert_eq!(ErrorCategory::ResourceLimit.code(), "PIXELGATE_RESOURCE_LIMIT");
        assert_eq!(ErrorCategory::InternalBug as u32, 3);
    }
}
