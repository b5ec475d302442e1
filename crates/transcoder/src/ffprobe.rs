use std::path::{Path, PathBuf};

use async_trait::async_trait;
use splitstitch_core::types::{ClipProperties, Rational};
use tracing::{debug, info};

use crate::TranscodeError;
use crate::tools::MediaProbe;

/// [`MediaProbe`] backed by the `ffprobe` binary.
pub struct FfprobeTool {
    ffprobe_path: PathBuf,
}

impl FfprobeTool {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }
}

#[async_trait]
impl MediaProbe for FfprobeTool {
    async fn probe(&self, file: &Path) -> Result<ClipProperties, TranscodeError> {
        probe(&self.ffprobe_path, file).await
    }
}

/// Run ffprobe on the first video stream of a file and parse the JSON output.
pub async fn probe(ffprobe_path: &Path, file: &Path) -> Result<ClipProperties, TranscodeError> {
    if !file.exists() {
        return Err(TranscodeError::InputNotFound(file.to_path_buf()));
    }

    let output = tokio::process::Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "format",
            "-show_entries",
            "stream",
            "-print_format",
            "json",
        ])
        .arg(file)
        .output()
        .await
        .map_err(|e| TranscodeError::ToolFailed {
            tool: "ffprobe",
            detail: format!("spawn failed: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::ProbeParse(stderr.trim().to_string()));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::ProbeParse(format!("parse JSON: {e}")))?;

    let clip = parse_probe_output(&raw)?;
    info!(
        codec = %clip.codec,
        resolution = %format!("{}x{}", clip.width, clip.height),
        duration_secs = clip.duration_secs,
        frames = clip.frame_count,
        framerate = %clip.frame_rate,
        "probed input clip"
    );
    Ok(clip)
}

fn parse_probe_output(raw: &serde_json::Value) -> Result<ClipProperties, TranscodeError> {
    let stream = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .and_then(|s| s.first())
        .ok_or_else(|| TranscodeError::ProbeParse("no video stream".into()))?;

    let codec = stream
        .get("codec_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing("codec_name"))?
        .to_string();

    let width = stream
        .get("width")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| missing("width"))? as u32;
    let height = stream
        .get("height")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| missing("height"))? as u32;

    let frame_rate = stream
        .get("avg_frame_rate")
        .and_then(|v| v.as_str())
        .and_then(Rational::parse)
        .ok_or_else(|| missing("avg_frame_rate"))?;

    // ffprobe emits counters as strings; accept numbers too.
    let frame_count = stream
        .get("nb_read_packets")
        .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64()))
        .ok_or_else(|| missing("nb_read_packets"))?;

    let duration_secs: f64 = raw
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| missing("format.duration"))?;

    debug!(%codec, width, height, "parsed probe output");

    Ok(ClipProperties {
        width,
        height,
        frame_rate,
        duration_secs,
        frame_count,
        codec,
    })
}

fn missing(field: &str) -> TranscodeError {
    TranscodeError::ProbeParse(format!("missing or invalid '{field}'"))
}
