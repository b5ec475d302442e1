use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use crate::TranscodeError;
use crate::tools::Concatenator;
use crate::workspace::{CONCAT_LOG, ENCODED_PREFIX, MANIFEST, Workspace};

static INDEX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\.[^.]+$").unwrap());

/// [`Concatenator`] using ffmpeg's concat demuxer with stream copy.
pub struct FfmpegConcat {
    ffmpeg_path: PathBuf,
}

impl FfmpegConcat {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }
}

#[async_trait]
impl Concatenator for FfmpegConcat {
    async fn concat(
        &self,
        manifest: &Path,
        output: &Path,
        log: &Path,
    ) -> Result<(), TranscodeError> {
        let log_file = std::fs::File::create(log)?;
        let log_err = log_file.try_clone()?;

        let status = tokio::process::Command::new(&self.ffmpeg_path)
            .args(["-nostdin", "-f", "concat", "-safe", "0", "-i"])
            .arg(manifest)
            .args(["-c", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| TranscodeError::Stitch(format!("spawn ffmpeg: {e}")))?;

        if !status.success() {
            return Err(TranscodeError::Stitch(format!(
                "ffmpeg exited with {status}, see {}",
                log.display()
            )));
        }
        Ok(())
    }
}

/// Numeric segment index embedded at the end of a file name (`splitstitch_encoded_0010.mp4` -> 10).
pub fn segment_index(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_string_lossy();
    INDEX_RE.captures(&name)?.get(1)?.as_str().parse().ok()
}

/// Sort outputs by their numeric index. Files without an index are rejected.
pub fn order_outputs(mut outputs: Vec<PathBuf>) -> Result<Vec<PathBuf>, TranscodeError> {
    if let Some(bad) = outputs.iter().find(|p| segment_index(p).is_none()) {
        return Err(TranscodeError::Stitch(format!(
            "no segment index in {}",
            bad.display()
        )));
    }
    outputs.sort_by_key(|p| segment_index(p));
    Ok(outputs)
}

/// Concat demuxer manifest: one `file '<name>'` line per output.
///
/// Names are written relative to the manifest, which sits next to the outputs.
pub fn manifest(ordered: &[PathBuf]) -> String {
    let mut text = String::new();
    for path in ordered {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        text.push_str(&format!("file '{}'\n", name.replace('\'', r"'\''")));
    }
    text
}

/// Concatenate the encoded outputs in the workspace into `destination`.
///
/// `expected` is the number of jobs that succeeded; the outputs on disk must match it.
pub async fn stitch(
    concatenator: &dyn Concatenator,
    workspace: &Workspace,
    expected: u32,
    destination: &Path,
) -> Result<(), TranscodeError> {
    let outputs = workspace.list(ENCODED_PREFIX)?;
    if outputs.len() as u32 != expected {
        return Err(TranscodeError::Stitch(format!(
            "{} segment outputs on disk but {expected} jobs completed",
            outputs.len()
        )));
    }

    let ordered = order_outputs(outputs)?;
    let manifest_path = workspace.path(MANIFEST);
    tokio::fs::write(&manifest_path, manifest(&ordered)).await?;
    debug!(manifest = %manifest_path.display(), segments = ordered.len(), "concat manifest written");

    match tokio::fs::remove_file(destination).await {
        Ok(()) => debug!(dest = %destination.display(), "removed existing destination"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    concatenator
        .concat(&manifest_path, destination, &workspace.path(CONCAT_LOG))
        .await?;

    info!(dest = %destination.display(), segments = ordered.len(), "segments concatenated");
    Ok(())
}
