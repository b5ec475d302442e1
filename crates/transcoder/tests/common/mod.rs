//! Fake tools for driving the pipeline without hardware or ffmpeg.
#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use splitstitch_core::types::{ClipProperties, Rational};
use splitstitch_transcoder::TranscodeError;
use splitstitch_transcoder::TranscoderConfig;
use splitstitch_transcoder::dispatch::SegmentJob;
use splitstitch_transcoder::pipeline::RunRequest;
use splitstitch_transcoder::tools::{
    Concatenator, JobExit, JobLauncher, MediaProbe, ResourceManager, RunningJob, SplitRequest,
    Splitter, Toolchain,
};
use splitstitch_transcoder::workspace::segment_name;

/// 1920x1080, 30 fps, 60 s, h264.
pub fn clip() -> ClipProperties {
    ClipProperties {
        width: 1920,
        height: 1080,
        frame_rate: Rational { num: 30, den: 1 },
        duration_secs: 60.0,
        frame_count: 1800,
        codec: "h264".into(),
    }
}

pub fn config(work_dir: &Path) -> TranscoderConfig {
    TranscoderConfig {
        work_dir: work_dir.to_path_buf(),
        poll_interval: Duration::from_millis(1),
        launch_stagger: Duration::ZERO,
        ..TranscoderConfig::default()
    }
}

pub fn request(dir: &Path) -> RunRequest {
    let source = dir.join("clip.mp4");
    std::fs::write(&source, b"source clip").unwrap();
    RunRequest {
        source,
        destination: dir.join("out.mp4"),
        output_codec: "hevc".into(),
        bitrate_mbps: 5.0,
        jobs_per_device: 0,
        devices: 0,
        extra_options: String::new(),
    }
}

/// File names left in `dir`, sorted.
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub struct FakeProbe(pub ClipProperties);

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, file: &Path) -> Result<ClipProperties, TranscodeError> {
        if !file.exists() {
            return Err(TranscodeError::InputNotFound(file.to_path_buf()));
        }
        Ok(self.0.clone())
    }
}

pub struct FakeResources {
    pub devices: u32,
    pub slots: u32,
    pub idle: bool,
    pub descriptions: Mutex<Vec<serde_json::Value>>,
}

impl FakeResources {
    pub fn new(devices: u32, slots: u32) -> Self {
        Self {
            devices,
            slots,
            idle: true,
            descriptions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ResourceManager for FakeResources {
    async fn device_count(&self) -> Result<u32, TranscodeError> {
        Ok(self.devices)
    }

    async fn devices_idle(&self) -> Result<bool, TranscodeError> {
        Ok(self.idle)
    }

    async fn reserve_slots(&self, description: &Path) -> Result<u32, TranscodeError> {
        let body = std::fs::read(description)?;
        let json = serde_json::from_slice(&body).unwrap();
        self.descriptions.lock().unwrap().push(json);
        Ok(self.slots)
    }
}

/// Writes `segments` files, ignoring the requested duration.
pub struct FakeSplitter {
    pub segments: u32,
    pub requests: Mutex<Vec<SplitRequest>>,
}

impl FakeSplitter {
    pub fn new(segments: u32) -> Self {
        Self {
            segments,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Splitter for FakeSplitter {
    async fn split(&self, request: &SplitRequest) -> Result<(), TranscodeError> {
        for i in 0..self.segments {
            let path = request.work_dir.join(segment_name(i, &request.extension));
            std::fs::write(path, format!("segment {i}"))?;
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Behaviour of every launched fake job.
#[derive(Clone, Default)]
pub struct JobScript {
    /// Polls before exiting.
    pub polls: u32,
    /// Segment indices that exit non-zero.
    pub failing: Vec<u32>,
    /// Written to the log of failing jobs.
    pub failure_log: String,
    /// Never exit.
    pub hang: bool,
}

pub struct FakeLauncher {
    pub script: JobScript,
    pub kills: Arc<AtomicUsize>,
    pub launched: Mutex<Vec<SegmentJob>>,
}

impl FakeLauncher {
    pub fn new(script: JobScript) -> Self {
        Self {
            script,
            kills: Arc::new(AtomicUsize::new(0)),
            launched: Mutex::new(Vec::new()),
        }
    }
}

impl JobLauncher for FakeLauncher {
    fn launch(&self, job: &SegmentJob) -> Result<Box<dyn RunningJob>, TranscodeError> {
        std::fs::write(&job.log, "")?;
        self.launched.lock().unwrap().push(job.clone());
        Ok(Box::new(FakeJob {
            job: job.clone(),
            polls_left: self.script.polls + job.index % 3,
            fail: self.script.failing.contains(&job.index),
            failure_log: self.script.failure_log.clone(),
            hang: self.script.hang,
            frames: 0,
            kills: self.kills.clone(),
        }))
    }
}

/// Encodes by wrapping the input bytes in brackets.
pub struct FakeJob {
    job: SegmentJob,
    polls_left: u32,
    fail: bool,
    failure_log: String,
    hang: bool,
    frames: u64,
    kills: Arc<AtomicUsize>,
}

impl FakeJob {
    fn append_log(&self, text: &str) {
        let mut log = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.job.log)
            .unwrap();
        log.write_all(text.as_bytes()).unwrap();
    }
}

impl RunningJob for FakeJob {
    fn try_exit(&mut self) -> Result<Option<JobExit>, TranscodeError> {
        if self.hang || self.polls_left > 0 {
            self.polls_left = self.polls_left.saturating_sub(1);
            self.frames += 50;
            self.append_log(&format!("frame= {} fps=60\r", self.frames));
            return Ok(None);
        }
        if self.fail {
            let text = self.failure_log.clone();
            self.append_log(&text);
            return Ok(Some(JobExit { code: Some(1) }));
        }
        let input = std::fs::read(&self.job.input)?;
        let mut out = b"[".to_vec();
        out.extend(input);
        out.push(b']');
        std::fs::write(&self.job.output, out)?;
        Ok(Some(JobExit { code: Some(0) }))
    }

    fn frames_encoded(&mut self) -> Option<u64> {
        (self.frames > 0).then_some(self.frames)
    }

    fn kill(&mut self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}

/// Concatenates the files listed in the manifest.
pub struct FakeConcat;

#[async_trait]
impl Concatenator for FakeConcat {
    async fn concat(
        &self,
        manifest: &Path,
        output: &Path,
        log: &Path,
    ) -> Result<(), TranscodeError> {
        std::fs::write(log, "concat")?;
        let dir = manifest.parent().unwrap_or(Path::new("."));
        let mut out = Vec::new();
        for line in std::fs::read_to_string(manifest)?.lines() {
            let name = line
                .strip_prefix("file '")
                .and_then(|l| l.strip_suffix('\''))
                .ok_or_else(|| TranscodeError::Stitch(format!("bad manifest line {line}")))?;
            out.extend(std::fs::read(dir.join(name))?);
        }
        std::fs::write(output, out)?;
        Ok(())
    }
}

pub struct Fakes {
    pub resources: Arc<FakeResources>,
    pub splitter: Arc<FakeSplitter>,
    pub launcher: Arc<FakeLauncher>,
}

impl Fakes {
    pub fn new(resources: FakeResources, segments: u32, script: JobScript) -> Self {
        Self {
            resources: Arc::new(resources),
            splitter: Arc::new(FakeSplitter::new(segments)),
            launcher: Arc::new(FakeLauncher::new(script)),
        }
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            probe: Arc::new(FakeProbe(clip())),
            resources: self.resources.clone(),
            splitter: self.splitter.clone(),
            launcher: self.launcher.clone(),
            concatenator: Arc::new(FakeConcat),
        }
    }
}
