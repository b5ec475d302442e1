//! Narrow interfaces over the external tools a run depends on.
//!
//! Every subprocess the pipeline touches sits behind one of these traits so the
//! orchestration logic can be driven by fakes in tests. The system-backed
//! implementations live next to the parsing code for each tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use splitstitch_core::types::ClipProperties;

use crate::devices::XrmResources;
use crate::dispatch::{FfmpegLauncher, SegmentJob};
use crate::ffprobe::FfprobeTool;
use crate::segmenter::FfmpegSplitter;
use crate::stitch::FfmpegConcat;
use crate::{TranscodeError, TranscoderConfig};

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, file: &Path) -> Result<ClipProperties, TranscodeError>;
}

#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Number of accelerator devices present.
    async fn device_count(&self) -> Result<u32, TranscodeError>;

    /// True when no decode/scale/encode unit is in use or reserved.
    async fn devices_idle(&self) -> Result<bool, TranscodeError>;

    /// Submit a job description file and return the total slots reserved across all devices.
    async fn reserve_slots(&self, description: &Path) -> Result<u32, TranscodeError>;
}

/// Stream-copy split of the source into `splitstitch_segment_NNNN.<ext>` files.
#[derive(Debug, Clone)]
pub struct SplitRequest {
    pub source: PathBuf,
    pub work_dir: PathBuf,
    pub extension: String,
    pub max_segment_secs: f64,
    pub log: PathBuf,
}

#[async_trait]
pub trait Splitter: Send + Sync {
    async fn split(&self, request: &SplitRequest) -> Result<(), TranscodeError>;
}

/// Exit of a finished job. `code` is `None` when the process was killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobExit {
    pub code: Option<i32>,
}

impl JobExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A launched segment job, as seen by the supervisor.
pub trait RunningJob: Send {
    /// Non-blocking liveness check. `None` while the job is still running.
    fn try_exit(&mut self) -> Result<Option<JobExit>, TranscodeError>;

    /// Last encoded-frame counter the job reported, if any.
    fn frames_encoded(&mut self) -> Option<u64>;

    /// Best-effort termination.
    fn kill(&mut self);
}

pub trait JobLauncher: Send + Sync {
    fn launch(&self, job: &SegmentJob) -> Result<Box<dyn RunningJob>, TranscodeError>;
}

#[async_trait]
pub trait Concatenator: Send + Sync {
    async fn concat(&self, manifest: &Path, output: &Path, log: &Path)
    -> Result<(), TranscodeError>;
}

/// The full set of external collaborators for one pipeline.
#[derive(Clone)]
pub struct Toolchain {
    pub probe: Arc<dyn MediaProbe>,
    pub resources: Arc<dyn ResourceManager>,
    pub splitter: Arc<dyn Splitter>,
    pub launcher: Arc<dyn JobLauncher>,
    pub concatenator: Arc<dyn Concatenator>,
}

impl Toolchain {
    /// Tools backed by the binaries named in `config`.
    pub fn system(config: &TranscoderConfig) -> Self {
        Self {
            probe: Arc::new(FfprobeTool::new(config.ffprobe_path.clone())),
            resources: Arc::new(XrmResources::from_config(config)),
            splitter: Arc::new(FfmpegSplitter::new(config.ffmpeg_path.clone())),
            launcher: Arc::new(FfmpegLauncher::new(config.ffmpeg_path.clone())),
            concatenator: Arc::new(FfmpegConcat::new(config.ffmpeg_path.clone())),
        }
    }
}
