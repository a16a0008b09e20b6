// src/engine/api.rs
//
// PipelineOrchestrator: the async entry point. Each stage runs on tokio's
// blocking pool under a per-stage timeout; batch mode runs whole jobs on the
// shared rayon pool.

use crate::engine::common::EngineResult;
use crate::engine::pool;
use crate::engine::source::SourceImage;
use crate::engine::tasks::{
    build_result, decode_stage, encode_stage, resample_stage, transform_stage, MetricsRecorder,
    NoProgress, PipelineStage, ProcessTask, ProcessingResult, ProgressSink, ProgressTracker,
    RunPlan, StageMachine,
};
use crate::engine::tier::{StageBudget, TierPolicy};
use crate::error::PixelGateError;
use crate::ops::ToolRequest;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Drives one run at a time through decode, resample, transform and encode.
///
/// The orchestrator holds no image state; it can be shared and reused across
/// runs. Dropping the future returned by [`run`](Self::run) abandons the run;
/// nothing is written anywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineOrchestrator {
    budget: StageBudget,
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOrchestrator {
    /// Orchestrator using `StageBudget::from_env()`.
    pub fn new() -> Self {
        Self {
            budget: StageBudget::from_env(),
        }
    }

    pub fn with_budget(budget: StageBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> StageBudget {
        self.budget
    }

    /// Resolve the tier policy once from the entitlement flag, then run.
    pub async fn run_unlocked_flag(
        &self,
        source: SourceImage,
        request: ToolRequest,
        is_unlocked: bool,
        progress: &mut dyn ProgressSink,
    ) -> EngineResult<ProcessingResult> {
        let policy = TierPolicy::resolve(is_unlocked, request.kind());
        self.run(source, request, policy, progress).await
    }

    /// Run the full pipeline for one tool invocation.
    pub async fn run(
        &self,
        source: SourceImage,
        request: ToolRequest,
        policy: TierPolicy,
        progress: &mut dyn ProgressSink,
    ) -> EngineResult<ProcessingResult> {
        let span = tracing::debug_span!(
            target: "pixelgate::pipeline",
            "run",
            tool = request.kind().as_str(),
            tier = policy.tier.as_str()
        );
        async move {
            let mut machine = StageMachine::default();
            let result = self
                .run_stages(&mut machine, source, request, policy, progress)
                .await;
            if let Err(err) = &result {
                machine.fail();
                tracing::warn!(
                    target: "pixelgate::pipeline",
                    error = %err,
                    code = err.category().code(),
                    "run failed"
                );
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        machine: &mut StageMachine,
        source: SourceImage,
        request: ToolRequest,
        policy: TierPolicy,
        progress: &mut dyn ProgressSink,
    ) -> EngineResult<ProcessingResult> {
        let plan = Arc::new(RunPlan::prepare(request, policy)?);
        let mut tracker = ProgressTracker::new(progress);
        let mut recorder = MetricsRecorder::new();
        let source_len = source.len();

        machine.advance(PipelineStage::Decoding)?;
        let (buffer, input_format) = {
            let plan = Arc::clone(&plan);
            // The source moves into the worker and is released once decoded.
            run_blocking("decode", &self.budget, move || decode_stage(&source, &plan)).await?
        };
        recorder.mark(PipelineStage::Decoding);
        tracker.complete(PipelineStage::Decoding);

        machine.advance(PipelineStage::Resampling)?;
        let buffer = {
            let plan = Arc::clone(&plan);
            run_blocking("resample", &self.budget, move || resample_stage(buffer, &plan)).await?
        };
        recorder.mark(PipelineStage::Resampling);
        tracker.complete(PipelineStage::Resampling);

        machine.advance(PipelineStage::Transforming)?;
        let buffer = {
            let plan = Arc::clone(&plan);
            run_blocking("transform", &self.budget, move || transform_stage(buffer, &plan)).await?
        };
        recorder.mark(PipelineStage::Transforming);
        tracker.complete(PipelineStage::Transforming);

        machine.advance(PipelineStage::Encoding)?;
        let (artifact, dimensions) = {
            let plan = Arc::clone(&plan);
            run_blocking("encode", &self.budget, move || {
                encode_stage(&buffer, &plan).map(|bytes| (bytes, buffer.dimensions()))
            })
            .await?
        };
        recorder.mark(PipelineStage::Encoding);
        tracker.complete(PipelineStage::Encoding);

        machine.advance(PipelineStage::Done)?;
        Ok(build_result(
            artifact,
            dimensions,
            source_len,
            Some(input_format),
            &plan,
            recorder,
        ))
    }
}

/// Run `f` on the blocking pool, bounded by the stage budget.
///
/// On timeout the worker is detached and its output discarded.
async fn run_blocking<T, F>(stage: &'static str, budget: &StageBudget, f: F) -> EngineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> EngineResult<T> + Send + 'static,
{
    let started = Instant::now();
    let handle = tokio::task::spawn_blocking(f);
    let joined = match budget.limit_for(stage) {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(PixelGateError::processing_timeout(
                    stage,
                    limit.as_millis() as u64,
                    started.elapsed().as_millis() as u64,
                ))
            }
        },
        None => handle.await,
    };
    joined.map_err(|e| PixelGateError::internal_panic(format!("{stage} worker failed: {e}")))?
}

/// One independent job for [`process_batch`].
#[derive(Clone, Debug)]
pub struct BatchJob {
    pub source: SourceImage,
    pub request: ToolRequest,
    pub is_unlocked: bool,
}

impl BatchJob {
    pub fn new(source: SourceImage, request: ToolRequest, is_unlocked: bool) -> Self {
        Self {
            source,
            request,
            is_unlocked,
        }
    }
}

/// Run independent jobs in parallel on the shared batch pool.
///
/// Returns one result per job, in input order. A failing job does not affect
/// the others.
pub fn process_batch(jobs: &[BatchJob], budget: StageBudget) -> Vec<EngineResult<ProcessingResult>> {
    tracing::debug!(target: "pixelgate::pipeline", jobs = jobs.len(), "batch start");
    pool::install(|| {
        jobs.par_iter()
            .map(|job| {
                ProcessTask::new(job.source.clone(), job.request, job.is_unlocked)
                    .with_budget(budget)
                    .execute(&mut NoProgress)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tasks::ProgressEvent;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn jpeg_source(width: u32, height: u32) -> SourceImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 100])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        SourceImage::new(buf)
    }

    #[tokio::test]
    async fn run_reports_progress_in_order() {
        let orchestrator = PipelineOrchestrator::with_budget(StageBudget::relaxed());
        let mut seen = Vec::new();
        let result = orchestrator
            .run_unlocked_flag(
                jpeg_source(40, 20),
                ToolRequest::Compress {
                    quality_percent: 60,
                },
                false,
                &mut |e: ProgressEvent| seen.push((e.stage, e.percent)),
            )
            .await
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (PipelineStage::Decoding, 20),
                (PipelineStage::Resampling, 40),
                (PipelineStage::Transforming, 80),
                (PipelineStage::Encoding, 100),
            ]
        );
        assert_eq!((result.width_px, result.height_px), (40, 20));
    }

    #[tokio::test]
    async fn run_returns_typed_error_without_progress() {
        let orchestrator = PipelineOrchestrator::with_budget(StageBudget::disabled());
        let mut events = 0;
        let err = orchestrator
            .run_unlocked_flag(
                SourceImage::new(b"GIF89a....".to_vec()),
                ToolRequest::RemoveBackground,
                true,
                &mut |_e: ProgressEvent| events += 1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PixelGateError::UnsupportedFormat { .. }));
        assert_eq!(events, 0);
    }

    #[tokio::test]
    async fn run_blocking_times_out() {
        let budget = StageBudget::uniform(10);
        let err = run_blocking("decode", &budget, || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PixelGateError::ProcessingTimeout { .. }));
    }

    #[tokio::test]
    async fn run_blocking_maps_panics() {
        let err = run_blocking::<(), _>("transform", &StageBudget::disabled(), || {
            panic!("worker exploded")
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PixelGateError::InternalPanic { .. }));
    }

    #[test]
    fn batch_preserves_order_and_isolates_failures() {
        let jobs = vec![
            BatchJob::new(jpeg_source(30, 30), ToolRequest::RemoveBackground, false),
            BatchJob::new(SourceImage::new(vec![1, 2, 3]), ToolRequest::RemoveBackground, false),
            BatchJob::new(
                jpeg_source(10, 50),
                ToolRequest::Compress {
                    quality_percent: 90,
                },
                true,
            ),
        ];
        let results = process_batch(&jobs, StageBudget::relaxed());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().mime_type, "image/png");
        assert!(results[1].is_err());
        let third = results[2].as_ref().unwrap();
        assert_eq!((third.width_px, third.height_px), (10, 50));
    }
}
