//! End-to-end run: probe, plan, split, transcode in parallel, stitch, clean up.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use splitstitch_core::types::{ClipProperties, JobPlan, VideoCodec};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::capacity::{self, CapacityRequest};
use crate::dispatch::{self, EncodeSettings};
use crate::segmenter;
use crate::supervisor::{self, RunState};
use crate::tools::Toolchain;
use crate::workspace::Workspace;
use crate::{TranscodeError, TranscoderConfig, classify, stitch, validate};

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// `h264`, `hevc` or `h265`.
    pub output_codec: String,
    pub bitrate_mbps: f64,
    /// Zero or negative: use the reservation estimate.
    pub jobs_per_device: i32,
    /// Zero or negative: use every device present.
    pub devices: i32,
    pub extra_options: String,
}

/// Outcome and performance figures of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub destination: PathBuf,
    pub clip: ClipProperties,
    pub plan: JobPlan,
    pub estimated_jobs_per_device: u32,
    pub segments: u32,
    pub elapsed_secs: f64,
    pub effective_fps: f64,
    pub realtime_factor: f64,
}

pub struct Pipeline {
    config: TranscoderConfig,
    tools: Toolchain,
}

impl Pipeline {
    pub fn new(config: TranscoderConfig, tools: Toolchain) -> Self {
        Self { config, tools }
    }

    /// Run one transcode. The request is validated before the working directory
    /// is touched; after that, temporary files are removed on every exit path.
    pub async fn run(
        &self,
        req: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, TranscodeError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);

        async {
            let output_codec = validate::validate_request(req)?;
            let workspace = Workspace::open(&self.config.work_dir)?;
            let result = tokio::select! {
                biased;
                r = self.run_stages(req, output_codec, &workspace, &run_id, cancel) => r,
                _ = cancel.cancelled() => Err(TranscodeError::Cancelled),
            };
            workspace.cleanup();
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        req: &RunRequest,
        output_codec: VideoCodec,
        workspace: &Workspace,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, TranscodeError> {
        if self.config.check_utilization && !self.tools.resources.devices_idle().await? {
            return Err(TranscodeError::DevicesBusy);
        }

        let clip = self.tools.probe.probe(&req.source).await?;
        let input_codec = validate::validate_input_codec(&clip.codec)?;

        let estimate = capacity::plan_capacity(
            self.tools.resources.as_ref(),
            workspace,
            &clip,
            input_codec,
            output_codec,
            CapacityRequest {
                devices: req.devices,
                jobs_per_device: req.jobs_per_device,
            },
        )
        .await?;
        let plan = estimate.plan;

        let started = Instant::now();

        let split = segmenter::split(
            self.tools.splitter.as_ref(),
            workspace,
            &req.source,
            plan.segments_attempted,
            clip.duration_secs,
        )
        .await?;

        let settings = EncodeSettings {
            input_codec,
            output_codec,
            bitrate_mbps: req.bitrate_mbps,
            extra_options: dispatch::split_extra_options(&req.extra_options),
        };
        let extension = segmenter::source_extension(&req.source)?;
        let jobs = dispatch::build_jobs(
            workspace,
            split.actual,
            plan.devices_used,
            &extension,
            &settings,
        );

        info!(segments = jobs.len(), codec = %output_codec, "transcoding all segments in parallel");
        let handles = supervisor::launch_all(
            self.tools.launcher.as_ref(),
            &jobs,
            self.config.launch_stagger,
            cancel,
        )
        .await?;
        let state = RunState::new(&jobs, clip.frame_count);
        let run = supervisor::supervise(handles, state, self.config.poll_interval, cancel).await?;

        if !run.state.all_succeeded() {
            return Err(
                classify::classify_run(&run.state, &self.config.allocation_failure_marker).await,
            );
        }

        stitch::stitch(
            self.tools.concatenator.as_ref(),
            workspace,
            split.actual,
            &req.destination,
        )
        .await?;

        let elapsed_secs = started.elapsed().as_secs_f64().max(f64::EPSILON);
        let summary = RunSummary {
            run_id: run_id.to_string(),
            destination: req.destination.clone(),
            effective_fps: clip.frame_count as f64 / elapsed_secs,
            realtime_factor: clip.duration_secs / elapsed_secs,
            clip,
            plan,
            estimated_jobs_per_device: estimate.estimated_jobs_per_device,
            segments: split.actual,
            elapsed_secs,
        };

        info!(
            elapsed_secs = %format!("{:.1}", summary.elapsed_secs),
            effective_fps = %format!("{:.2}", summary.effective_fps),
            realtime_factor = %format!("{:.1}", summary.realtime_factor),
            "performance summary"
        );
        Ok(summary)
    }
}
