//! Transient artifacts of a run and their removal.
//!
//! Every file a run creates in the working directory carries the
//! `splitstitch_` prefix and one of the fixed names below. A [`Workspace`]
//! sweeps them when it is opened (leftovers from an interrupted run) and again
//! when it is dropped, so every exit path, including cancellation, leaves the
//! directory as it found it. Files without the prefix are never touched.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

pub const SPLIT_LOG: &str = "splitstitch_split.log";
pub const CONCAT_LOG: &str = "splitstitch_concat.log";
pub const MANIFEST: &str = "splitstitch_concat_list.txt";
pub const JOB_DESCRIPTION: &str = "splitstitch_job_description.json";
pub const SEGMENT_PREFIX: &str = "splitstitch_segment_";
pub const ENCODED_PREFIX: &str = "splitstitch_encoded_";
const JOB_LOG_PREFIX: &str = "splitstitch_job_";

static ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^splitstitch_(segment_\d{4,}\.[A-Za-z0-9]+|encoded_\d{4,}\.mp4|job_\d{4,}\.log|split\.log|concat\.log|concat_list\.txt|job_description\.json)$",
    )
    .unwrap()
});

/// Split input for segment `index`, keeping the source extension.
pub fn segment_name(index: u32, extension: &str) -> String {
    format!("{SEGMENT_PREFIX}{index:04}.{extension}")
}

/// Transcoded output for segment `index`.
pub fn encoded_name(index: u32) -> String {
    format!("{ENCODED_PREFIX}{index:04}.mp4")
}

/// Combined stdout/stderr of the job for segment `index`.
pub fn job_log_name(index: u32) -> String {
    format!("{JOB_LOG_PREFIX}{index:04}.log")
}

pub fn is_artifact(file_name: &str) -> bool {
    ARTIFACT_RE.is_match(file_name)
}

/// Working directory guard owning all transient artifacts of a run.
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create the directory if needed and remove stale artifacts.
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let ws = Self { dir };
        let stale = ws.sweep();
        if stale > 0 {
            warn!(dir = %ws.dir.display(), removed = stale, "removed leftovers from a previous run");
        }
        Ok(ws)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Files in the workspace whose names start with `prefix` and are artifacts.
    pub fn list(&self, prefix: &str) -> std::io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) && is_artifact(&name) {
                found.push(entry.path());
            }
        }
        Ok(found)
    }

    /// Remove all artifacts now. Returns how many files were removed.
    pub fn cleanup(&self) -> usize {
        let removed = self.sweep();
        info!(dir = %self.dir.display(), removed, "temporary files removed");
        removed
    }

    fn sweep(&self) -> usize {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot read working directory");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in read_dir.flatten() {
            let name = entry.file_name();
            if !is_artifact(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed");
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove"),
            }
        }
        removed
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // Best-effort; nothing to report to once the run is over.
        self.sweep();
    }
}
