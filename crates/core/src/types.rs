use serde::{Deserialize, Serialize};

/// Exact frame rate as reported by the probe tool (`"30000/1001"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub fn new(num: u32, den: u32) -> Option<Self> {
        if den == 0 { None } else { Some(Self { num, den }) }
    }

    /// Parse `"num/den"`, or a bare integer as `num/1`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s.split_once('/') {
            Some((num, den)) => Self::new(num.trim().parse().ok()?, den.trim().parse().ok()?),
            None => Self::new(s.parse().ok()?, 1),
        }
    }

}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Video formats the accelerator can decode and encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
        }
    }

    /// Accepts `h265` as an alias for `hevc`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "h264" => Some(Self::H264),
            "hevc" | "h265" => Some(Self::Hevc),
            _ => None,
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Properties of the source clip, probed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipProperties {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub duration_secs: f64,
    pub frame_count: u64,
    pub codec: String,
}

/// How the run is spread over the devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPlan {
    pub total_devices: u32,
    pub devices_used: u32,
    pub jobs_per_device: u32,
    pub segments_attempted: u32,
}

impl JobPlan {
    /// `devices_used` is clamped to `total_devices`. `None` if the segment
    /// count does not fit in a `u32`.
    pub fn new(total_devices: u32, devices_used: u32, jobs_per_device: u32) -> Option<Self> {
        let devices_used = devices_used.min(total_devices);
        Some(Self {
            total_devices,
            devices_used,
            jobs_per_device,
            segments_attempted: jobs_per_device.checked_mul(devices_used)?,
        })
    }
}

/// Lifecycle of one segment transcode job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Launched,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Launched => "launched",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
