// src/engine/tasks.rs
//
// Pipeline state machine, progress reporting, metrics and the synchronous
// ProcessTask that drives decode -> resample -> transform -> encode.

use crate::engine::buffer::PixelBuffer;
use crate::engine::common::EngineResult;
use crate::engine::decoder;
use crate::engine::encoder;
use crate::engine::resample;
use crate::engine::source::{format_name, SourceImage};
use crate::engine::tier::{StageBudget, TierPolicy};
use crate::engine::transform::TransformPlan;
use crate::error::PixelGateError;
use crate::ops::{OutputFormat, ToolRequest};
use crate::{ProcessingMetrics, PROCESSING_METRICS_VERSION};
use image::ImageFormat;
use std::time::Instant;

/// Where a run currently is. Runs only move forward; `Failed` is reachable
/// from any non-terminal stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Decoding,
    Resampling,
    Transforming,
    Encoding,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Decoding => "decode",
            PipelineStage::Resampling => "resample",
            PipelineStage::Transforming => "transform",
            PipelineStage::Encoding => "encode",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }

    /// Next stage on the success path.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Idle => Some(PipelineStage::Decoding),
            PipelineStage::Decoding => Some(PipelineStage::Resampling),
            PipelineStage::Resampling => Some(PipelineStage::Transforming),
            PipelineStage::Transforming => Some(PipelineStage::Encoding),
            PipelineStage::Encoding => Some(PipelineStage::Done),
            PipelineStage::Done | PipelineStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    pub fn can_transition_to(&self, to: PipelineStage) -> bool {
        if to == PipelineStage::Failed {
            return !self.is_terminal();
        }
        self.next() == Some(to)
    }

    /// Overall progress once this stage has completed.
    pub fn completed_percent(&self) -> u8 {
        match self {
            PipelineStage::Idle => 0,
            PipelineStage::Decoding => 20,
            PipelineStage::Resampling => 40,
            PipelineStage::Transforming => 80,
            PipelineStage::Encoding | PipelineStage::Done => 100,
            PipelineStage::Failed => 0,
        }
    }
}

/// Tracks the current stage and rejects illegal transitions.
#[derive(Debug)]
pub struct StageMachine {
    stage: PipelineStage,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self {
            stage: PipelineStage::Idle,
        }
    }
}

impl StageMachine {
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Move to `to`. An illegal transition is a bug in the driver.
    pub fn advance(&mut self, to: PipelineStage) -> EngineResult<()> {
        if !self.stage.can_transition_to(to) {
            return Err(PixelGateError::internal_panic(format!(
                "illegal pipeline transition {} -> {}",
                self.stage.as_str(),
                to.as_str()
            )));
        }
        self.stage = to;
        Ok(())
    }

    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = PipelineStage::Failed;
        }
    }
}

/// Progress notification: the stage that just completed and the overall
/// percentage reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: PipelineStage,
    pub percent: u8,
}

/// Receives progress events. Closures taking a `ProgressEvent` implement it.
pub trait ProgressSink: Send {
    fn report(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent) + Send,
{
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _event: ProgressEvent) {}
}

/// Forwards stage completions to a sink, never letting the percentage go
/// backwards.
pub struct ProgressTracker<'a> {
    sink: &'a mut dyn ProgressSink,
    last: u8,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self { sink, last: 0 }
    }

    pub fn complete(&mut self, stage: PipelineStage) {
        let percent = stage.completed_percent().max(self.last);
        self.last = percent;
        self.sink.report(ProgressEvent { stage, percent });
    }

    pub fn last_percent(&self) -> u8 {
        self.last
    }
}

/// Collects per-stage wall-clock timings into `ProcessingMetrics`.
pub struct MetricsRecorder {
    metrics: ProcessingMetrics,
    start_total: Instant,
    stage_start: Instant,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            metrics: ProcessingMetrics::default(),
            start_total: now,
            stage_start: now,
        }
    }

    /// Record the elapsed time of `stage` and restart the stage clock.
    pub fn mark(&mut self, stage: PipelineStage) {
        let ms = self.stage_start.elapsed().as_secs_f64() * 1000.0;
        match stage {
            PipelineStage::Decoding => self.metrics.decode_ms = ms,
            PipelineStage::Resampling => self.metrics.resample_ms = ms,
            PipelineStage::Transforming => self.metrics.transform_ms = ms,
            PipelineStage::Encoding => self.metrics.encode_ms = ms,
            _ => {}
        }
        self.stage_start = Instant::now();
    }

    pub fn finalize(
        mut self,
        input_format: Option<ImageFormat>,
        output_format: OutputFormat,
        bytes_in: u64,
        bytes_out: u64,
    ) -> ProcessingMetrics {
        let m = &mut self.metrics;
        m.version = PROCESSING_METRICS_VERSION.to_string();
        m.total_ms = self.start_total.elapsed().as_secs_f64() * 1000.0;
        m.bytes_in = bytes_in;
        m.bytes_out = bytes_out;
        m.compression_ratio = if bytes_in > 0 {
            bytes_out as f64 / bytes_in as f64
        } else {
            0.0
        };
        m.format_in = input_format.map(|f| format_name(f).to_string());
        m.format_out = output_format.as_str().to_string();
        self.metrics
    }
}

/// Successful run output. Ownership moves to the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessingResult {
    pub artifact: Vec<u8>,
    pub mime_type: &'static str,
    pub width_px: u32,
    pub height_px: u32,
    pub source_bytes: u64,
    pub output_bytes: u64,
    pub metrics: ProcessingMetrics,
}

impl ProcessingResult {
    /// `round((source - output) / source * 100)`; negative when the artifact grew.
    pub fn reduction_percent(&self) -> i64 {
        encoder::reduction_percent(self.source_bytes, self.output_bytes)
    }

    pub fn into_artifact(self) -> Vec<u8> {
        self.artifact
    }
}

/// Everything a run needs, fixed before the first stage starts.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub request: ToolRequest,
    pub policy: TierPolicy,
    pub transforms: TransformPlan,
    pub output_format: OutputFormat,
    pub quality_factor: f32,
}

impl RunPlan {
    /// Validate the request and derive the step list, output format and
    /// tier-clamped quality.
    pub fn prepare(request: ToolRequest, policy: TierPolicy) -> EngineResult<Self> {
        request.validate()?;
        let output_format = request.kind().output_format();
        let transforms = TransformPlan::for_tool(&request, &policy);
        transforms.validate(output_format)?;
        let quality_factor = policy.clamp_quality(request.requested_quality());
        Ok(Self {
            request,
            policy,
            transforms,
            output_format,
            quality_factor,
        })
    }
}

pub(crate) fn decode_stage(
    source: &SourceImage,
    plan: &RunPlan,
) -> EngineResult<(PixelBuffer, ImageFormat)> {
    let started = Instant::now();
    let (buffer, format) = decoder::decode_source(source, &plan.policy)?;
    tracing::debug!(
        target: "pixelgate::pipeline",
        stage = "decode",
        format = format_name(format),
        width = buffer.width(),
        height = buffer.height(),
        bytes_in = source.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage complete"
    );
    Ok((buffer, format))
}

pub(crate) fn resample_stage(buffer: PixelBuffer, plan: &RunPlan) -> EngineResult<PixelBuffer> {
    let started = Instant::now();
    let (src_w, src_h) = buffer.dimensions();
    let max_dimension = plan.policy.max_dimension_px;
    let out = match plan.request {
        ToolRequest::Enhance { .. } => resample::resample_for_enhancement(
            buffer,
            max_dimension,
            plan.request.enhancement_factor(),
        )?,
        ToolRequest::RemoveBackground | ToolRequest::Compress { .. } => {
            resample::resample(buffer, max_dimension)?
        }
    };
    tracing::debug!(
        target: "pixelgate::pipeline",
        stage = "resample",
        src_width = src_w,
        src_height = src_h,
        width = out.width(),
        height = out.height(),
        max_dimension,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage complete"
    );
    Ok(out)
}

pub(crate) fn transform_stage(buffer: PixelBuffer, plan: &RunPlan) -> EngineResult<PixelBuffer> {
    let started = Instant::now();
    let out = plan.transforms.apply(buffer)?;
    tracing::debug!(
        target: "pixelgate::pipeline",
        stage = "transform",
        steps = plan.transforms.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage complete"
    );
    Ok(out)
}

pub(crate) fn encode_stage(buffer: &PixelBuffer, plan: &RunPlan) -> EngineResult<Vec<u8>> {
    let started = Instant::now();
    let bytes = encoder::encode(buffer, plan.output_format, plan.quality_factor)?;
    tracing::debug!(
        target: "pixelgate::pipeline",
        stage = "encode",
        format = plan.output_format.as_str(),
        quality = plan.quality_factor,
        bytes_out = bytes.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage complete"
    );
    Ok(bytes)
}

pub(crate) fn build_result(
    artifact: Vec<u8>,
    dimensions: (u32, u32),
    source_len: usize,
    input_format: Option<ImageFormat>,
    plan: &RunPlan,
    recorder: MetricsRecorder,
) -> ProcessingResult {
    let source_bytes = source_len as u64;
    let output_bytes = artifact.len() as u64;
    let metrics = recorder.finalize(input_format, plan.output_format, source_bytes, output_bytes);
    ProcessingResult {
        artifact,
        mime_type: plan.output_format.mime_type(),
        width_px: dimensions.0,
        height_px: dimensions.1,
        source_bytes,
        output_bytes,
        metrics,
    }
}

/// One run of the pipeline, executed synchronously on the calling thread.
///
/// Wall-clock budgets are checked after each stage completes; a stage that ran
/// long fails the run with `ProcessingTimeout`.
#[derive(Clone, Debug)]
pub struct ProcessTask {
    pub source: SourceImage,
    pub request: ToolRequest,
    pub policy: TierPolicy,
    pub budget: StageBudget,
}

impl ProcessTask {
    /// Resolve the tier policy once from the entitlement flag.
    pub fn new(source: SourceImage, request: ToolRequest, is_unlocked: bool) -> Self {
        let policy = TierPolicy::resolve(is_unlocked, request.kind());
        Self::with_policy(source, request, policy)
    }

    pub fn with_policy(source: SourceImage, request: ToolRequest, policy: TierPolicy) -> Self {
        Self {
            source,
            request,
            policy,
            budget: StageBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: StageBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn execute(&self, progress: &mut dyn ProgressSink) -> EngineResult<ProcessingResult> {
        let span = tracing::debug_span!(
            target: "pixelgate::pipeline",
            "run",
            tool = self.request.kind().as_str(),
            tier = self.policy.tier.as_str()
        );
        let _enter = span.enter();

        let mut machine = StageMachine::default();
        let result = self.execute_stages(&mut machine, progress);
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

    fn execute_stages(
        &self,
        machine: &mut StageMachine,
        progress: &mut dyn ProgressSink,
    ) -> EngineResult<ProcessingResult> {
        let mut tracker = ProgressTracker::new(progress);
        let mut recorder = MetricsRecorder::new();
        let plan = RunPlan::prepare(self.request, self.policy)?;

        machine.advance(PipelineStage::Decoding)?;
        let started = Instant::now();
        let (buffer, input_format) = decode_stage(&self.source, &plan)?;
        self.budget.enforce(started, "decode")?;
        recorder.mark(PipelineStage::Decoding);
        tracker.complete(PipelineStage::Decoding);

        machine.advance(PipelineStage::Resampling)?;
        let started = Instant::now();
        let buffer = resample_stage(buffer, &plan)?;
        self.budget.enforce(started, "resample")?;
        recorder.mark(PipelineStage::Resampling);
        tracker.complete(PipelineStage::Resampling);

        machine.advance(PipelineStage::Transforming)?;
        let started = Instant::now();
        let buffer = transform_stage(buffer, &plan)?;
        self.budget.enforce(started, "transform")?;
        recorder.mark(PipelineStage::Transforming);
        tracker.complete(PipelineStage::Transforming);

        machine.advance(PipelineStage::Encoding)?;
        let started = Instant::now();
        let artifact = encode_stage(&buffer, &plan)?;
        self.budget.enforce(started, "encode")?;
        recorder.mark(PipelineStage::Encoding);
        tracker.complete(PipelineStage::Encoding);

        machine.advance(PipelineStage::Done)?;
        Ok(build_result(
            artifact,
            buffer.dimensions(),
            self.source.len(),
            Some(input_format),
            &plan,
            recorder,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::ToolKind;
    use image::{DynamicImage, RgbaImage};
    use std::io::Cursor;

    fn sample_png(width: u32, height: u32) -> SourceImage {
        let img = RgbaImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / width.max(1)) as u8;
            image::Rgba([v, v, v, 255])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        SourceImage::new(buf)
    }

    #[test]
    fn stage_order_is_linear() {
        let mut machine = StageMachine::default();
        for stage in [
            PipelineStage::Decoding,
            PipelineStage::Resampling,
            PipelineStage::Transforming,
            PipelineStage::Encoding,
            PipelineStage::Done,
        ] {
            machine.advance(stage).unwrap();
        }
        assert_eq!(machine.stage(), PipelineStage::Done);
    }

    #[test]
    fn illegal_transition_is_internal_bug() {
        let mut machine = StageMachine::default();
        let err = machine.advance(PipelineStage::Encoding).unwrap_err();
        assert!(matches!(err, PixelGateError::InternalPanic { .. }));
        machine.fail();
        assert_eq!(machine.stage(), PipelineStage::Failed);
        assert!(machine.advance(PipelineStage::Decoding).is_err());
    }

    #[test]
    fn tracker_is_monotonic() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: ProgressEvent| seen.push(e.percent);
            let mut tracker = ProgressTracker::new(&mut sink);
            tracker.complete(PipelineStage::Resampling);
            tracker.complete(PipelineStage::Decoding);
            tracker.complete(PipelineStage::Encoding);
            assert_eq!(tracker.last_percent(), 100);
        }
        assert_eq!(seen, vec![40, 40, 100]);
    }

    #[test]
    fn execute_reports_weighted_progress() {
        let task = ProcessTask::new(
            sample_png(64, 32),
            ToolRequest::Compress { quality_percent: 70 },
            false,
        );
        let mut seen = Vec::new();
        let result = task
            .execute(&mut |e: ProgressEvent| seen.push(e.percent))
            .unwrap();
        assert_eq!(seen, vec![20, 40, 80, 100]);
        assert_eq!(result.mime_type, "image/jpeg");
        assert_eq!((result.width_px, result.height_px), (64, 32));
        assert_eq!(result.output_bytes, result.artifact.len() as u64);
        assert_eq!(result.metrics.format_in.as_deref(), Some("png"));
        assert_eq!(result.metrics.format_out, "jpeg");
        assert_eq!(result.metrics.version, PROCESSING_METRICS_VERSION);
    }

    #[test]
    fn invalid_request_fails_before_decode() {
        let task = ProcessTask::new(
            SourceImage::new(b"garbage".to_vec()),
            ToolRequest::Enhance {
                enhancement_level: 5,
            },
            true,
        );
        let mut count = 0;
        let err = task.execute(&mut |_e: ProgressEvent| count += 1).unwrap_err();
        assert!(matches!(err, PixelGateError::InvalidArgument { .. }));
        assert_eq!(count, 0);
    }

    #[test]
    fn run_plan_clamps_quality_to_tier() {
        let request = ToolRequest::Compress {
            quality_percent: 100,
        };
        let plan = RunPlan::prepare(request, TierPolicy::resolve(false, ToolKind::Compress)).unwrap();
        assert_eq!(plan.quality_factor, 0.8);
        assert_eq!(plan.output_format, OutputFormat::Jpeg);
    }

    #[test]
    fn zero_budget_times_out() {
        let task = ProcessTask::new(sample_png(16, 16), ToolRequest::RemoveBackground, true)
            .with_budget(StageBudget::uniform(0));
        // A zero budget trips on any measurable stage time; a coarse clock
        // could still report zero, so accept success too.
        match task.execute(&mut NoProgress) {
            Ok(result) => assert_eq!(result.mime_type, "image/png"),
            Err(err) => assert!(matches!(err, PixelGateError::ProcessingTimeout { .. })),
        }
    }

    #[test]
    fn reduction_percent_uses_byte_counts() {
        let result = ProcessingResult {
            artifact: vec![0; 25],
            mime_type: "image/jpeg",
            width_px: 1,
            height_px: 1,
            source_bytes: 100,
            output_bytes: 25,
            metrics: ProcessingMetrics::default(),
        };
        assert_eq!(result.reduction_percent(), 75);
        assert_eq!(result.into_artifact().len(), 25);
    }
}
