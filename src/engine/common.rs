// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Provides unified error handling and the panic policy for native codecs.

use crate::error::PixelGateError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Result type used by every engine stage.
pub type EngineResult<T> = std::result::Result<T, PixelGateError>;

/// Run a codec or pixel routine, converting a panic into `InternalPanic`.
///
/// mozjpeg and libwebp report some failures by unwinding; a run must end in a
/// typed error instead of tearing down the caller.
pub fn run_with_panic_policy<T>(
    label: &'static str,
    f: impl FnOnce() -> EngineResult<T>,
) -> EngineResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(target: "pixelgate::panic", %label, %message, "panic caught");
            Err(PixelGateError::internal_panic(format!("{label}: {message}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
