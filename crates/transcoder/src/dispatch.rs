use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use splitstitch_core::types::VideoCodec;
use tokio::process::Child;
use tracing::{debug, info};

use crate::TranscodeError;
use crate::tools::{JobExit, JobLauncher, RunningJob};
use crate::workspace::{Workspace, encoded_name, job_log_name, segment_name};

/// How much of the end of a job log is scanned for the frame counter.
const LOG_TAIL_BYTES: u64 = 4096;

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").unwrap());

/// Encoder settings shared by every segment job of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub input_codec: VideoCodec,
    pub output_codec: VideoCodec,
    pub bitrate_mbps: f64,
    /// Passed through verbatim after the bitrate flags.
    pub extra_options: Vec<String>,
}

/// One segment transcode: input, output, log and the device it is pinned to.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentJob {
    pub index: u32,
    pub device: u32,
    pub input: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    pub settings: EncodeSettings,
}

impl SegmentJob {
    /// ffmpeg arguments for this job. Extra options follow `-b:v`/`-max-bitrate`
    /// so a bitrate given there takes precedence.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let s = &self.settings;
        let bitrate = format!("{}M", s.bitrate_mbps);
        let mut args: Vec<String> = vec![
            "-nostdin".into(),
            "-loglevel".into(),
            "info".into(),
            "-xlnx_hwdev".into(),
            self.device.to_string(),
            "-vsync".into(),
            "0".into(),
            "-c:v".into(),
            format!("mpsoc_vcu_{}", s.input_codec),
            "-i".into(),
            self.input.to_string_lossy().into_owned(),
            "-b:v".into(),
            bitrate.clone(),
            "-max-bitrate".into(),
            bitrate,
        ];
        args.extend(s.extra_options.iter().cloned());
        args.extend([
            "-c:v".into(),
            format!("mpsoc_vcu_{}", s.output_codec),
            "-y".into(),
            self.output.to_string_lossy().into_owned(),
        ]);
        args
    }
}

/// Whitespace-separated extra encoder options.
pub fn split_extra_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

/// One job per segment, in index order, assigned to devices round-robin.
pub fn build_jobs(
    workspace: &Workspace,
    segment_count: u32,
    devices_used: u32,
    extension: &str,
    settings: &EncodeSettings,
) -> Vec<SegmentJob> {
    let devices = devices_used.max(1);
    (0..segment_count)
        .map(|index| SegmentJob {
            index,
            device: index % devices,
            input: workspace.path(&segment_name(index, extension)),
            output: workspace.path(&encoded_name(index)),
            log: workspace.path(&job_log_name(index)),
            settings: settings.clone(),
        })
        .collect()
}

/// Last `frame=<N>` counter in a chunk of ffmpeg output.
pub fn last_frame_counter(text: &str) -> Option<u64> {
    FRAME_RE
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn read_log_tail(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES)))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// [`JobLauncher`] spawning one ffmpeg process per segment.
pub struct FfmpegLauncher {
    ffmpeg_path: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }
}

impl JobLauncher for FfmpegLauncher {
    fn launch(&self, job: &SegmentJob) -> Result<Box<dyn RunningJob>, TranscodeError> {
        let args = job.ffmpeg_args();

        let log_file = std::fs::File::create(&job.log)
            .map_err(|e| TranscodeError::ToolFailed {
                tool: "ffmpeg",
                detail: format!("create log: {e}"),
            })?;
        let log_err = log_file.try_clone()?;

        let child = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::ToolFailed {
                tool: "ffmpeg",
                detail: format!("spawn segment {}: {e}", job.index),
            })?;

        debug!(segment = job.index, ?args, "spawned ffmpeg");
        info!(segment = job.index, device = job.device, "segment job launched");
        Ok(Box::new(FfmpegJob {
            child,
            log: job.log.clone(),
        }))
    }
}

/// A running ffmpeg segment job.
pub struct FfmpegJob {
    child: Child,
    log: PathBuf,
}

impl RunningJob for FfmpegJob {
    fn try_exit(&mut self) -> Result<Option<JobExit>, TranscodeError> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| JobExit { code: status.code() }))
    }

    fn frames_encoded(&mut self) -> Option<u64> {
        read_log_tail(&self.log)
            .ok()
            .and_then(|tail| last_frame_counter(&tail))
    }

    fn kill(&mut self) {
        let _ = self.child.start_kill();
    }
}
