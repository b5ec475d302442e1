use std::path::Path;

use splitstitch_core::types::VideoCodec;

use crate::TranscodeError;
use crate::pipeline::RunRequest;
use crate::workspace::is_artifact;

pub const SOURCE_EXTENSIONS: [&str; 4] = ["mp4", "mov", "MOV", "mkv"];
pub const DESTINATION_EXTENSION: &str = "mp4";
pub const MIN_BITRATE_MBPS: f64 = 1.0;
pub const MAX_BITRATE_MBPS: f64 = 25.0;

/// Check a run request before any work begins. Returns the output codec.
///
/// All problems are collected into a single error.
pub fn validate_request(req: &RunRequest) -> Result<VideoCodec, TranscodeError> {
    let mut problems = Vec::new();

    let output_codec = VideoCodec::parse(&req.output_codec);
    if output_codec.is_none() {
        problems.push(format!(
            "output codec '{}' must be h264, h265 or hevc",
            req.output_codec
        ));
    }

    if !(MIN_BITRATE_MBPS..=MAX_BITRATE_MBPS).contains(&req.bitrate_mbps) {
        problems.push(format!(
            "bitrate {} must be between {MIN_BITRATE_MBPS} and {MAX_BITRATE_MBPS} Mbit/s",
            req.bitrate_mbps
        ));
    }

    if !has_extension(&req.source, &SOURCE_EXTENSIONS) {
        problems.push("only .mp4, .mov and .mkv source files are supported".to_string());
    }

    if !has_extension(&req.destination, &[DESTINATION_EXTENSION]) {
        problems.push("only .mp4 destination files are supported".to_string());
    }

    if req.source == req.destination {
        problems.push("source and destination cannot be the same file".to_string());
    }

    for (label, path) in [("source", &req.source), ("destination", &req.destination)] {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        if name.as_deref().is_some_and(is_artifact) {
            problems.push(format!(
                "{label} name {} collides with a temporary file name",
                path.display()
            ));
        }
    }

    match output_codec {
        Some(codec) if problems.is_empty() => Ok(codec),
        _ => Err(TranscodeError::InputValidation(problems.join("; "))),
    }
}

/// The probed input codec must be one the accelerator can decode.
pub fn validate_input_codec(codec: &str) -> Result<VideoCodec, TranscodeError> {
    VideoCodec::parse(codec).ok_or_else(|| {
        TranscodeError::InputValidation(format!(
            "input codec '{codec}' is not supported, must be h264, h265 or hevc"
        ))
    })
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .map(|e| allowed.iter().any(|a| e.to_string_lossy() == *a))
        .unwrap_or(false)
}
