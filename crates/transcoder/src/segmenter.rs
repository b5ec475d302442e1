use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::TranscodeError;
use crate::tools::{SplitRequest, Splitter};
use crate::workspace::{SEGMENT_PREFIX, SPLIT_LOG, Workspace, segment_name};

/// [`Splitter`] running an ffmpeg stream-copy segment muxer.
pub struct FfmpegSplitter {
    ffmpeg_path: PathBuf,
}

impl FfmpegSplitter {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }
}

#[async_trait]
impl Splitter for FfmpegSplitter {
    async fn split(&self, request: &SplitRequest) -> Result<(), TranscodeError> {
        let pattern = request
            .work_dir
            .join(format!("{SEGMENT_PREFIX}%04d.{}", request.extension));
        let log_file = std::fs::File::create(&request.log)?;
        let log_err = log_file.try_clone()?;

        let status = tokio::process::Command::new(&self.ffmpeg_path)
            .args(["-nostdin", "-loglevel", "info", "-vsync", "0", "-i"])
            .arg(&request.source)
            .args(["-c", "copy", "-f", "segment", "-segment_time"])
            .arg(format!("{:.2}", request.max_segment_secs))
            .arg("-y")
            .arg(&pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| TranscodeError::ToolFailed {
                tool: "ffmpeg split",
                detail: format!("spawn: {e}"),
            })?;

        if !status.success() {
            return Err(TranscodeError::ToolFailed {
                tool: "ffmpeg split",
                detail: format!("exited with {status}, see {}", request.log.display()),
            });
        }
        Ok(())
    }
}

/// Result of splitting the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitOutcome {
    pub attempted: u32,
    /// Authoritative segment count for every later stage.
    pub actual: u32,
    /// `None` when the source was copied as a single segment.
    pub max_segment_secs: Option<f64>,
}

/// `ceil(duration / count)` to two decimals.
pub fn max_segment_secs(duration_secs: f64, count: u32) -> f64 {
    (duration_secs / f64::from(count) * 100.0).ceil() / 100.0
}

/// Extension of the source file as written, without the dot.
pub fn source_extension(source: &Path) -> Result<String, TranscodeError> {
    source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .ok_or_else(|| {
            TranscodeError::InputValidation(format!("{} has no extension", source.display()))
        })
}

/// Cut `source` into about `target` segments inside the workspace and verify the result.
pub async fn split(
    splitter: &dyn Splitter,
    workspace: &Workspace,
    source: &Path,
    target: u32,
    duration_secs: f64,
) -> Result<SplitOutcome, TranscodeError> {
    let extension = source_extension(source)?;

    let max_secs = if target <= 1 {
        let dest = workspace.path(&segment_name(0, &extension));
        tokio::fs::copy(source, &dest).await?;
        debug!(dest = %dest.display(), "single segment, copied source verbatim");
        None
    } else {
        let secs = max_segment_secs(duration_secs, target);
        let request = SplitRequest {
            source: source.to_path_buf(),
            work_dir: workspace.dir().to_path_buf(),
            extension,
            max_segment_secs: secs,
            log: workspace.path(SPLIT_LOG),
        };
        splitter.split(&request).await?;
        Some(secs)
    };

    let actual = workspace.list(SEGMENT_PREFIX)?.len() as u32;
    let attempted = target.max(1);

    if actual == 0 {
        return Err(TranscodeError::ToolFailed {
            tool: "ffmpeg split",
            detail: "no segments were produced".into(),
        });
    }
    if actual > attempted {
        return Err(TranscodeError::SegmentationOverrun { attempted, actual });
    }
    if actual < attempted {
        warn!(
            attempted,
            actual,
            "input clip is too short and does not contain enough GOPs to be split in more segments"
        );
    }

    info!(
        attempted,
        actual,
        average_secs = max_segment_secs(duration_secs, actual),
        "source split into segments"
    );
    Ok(SplitOutcome {
        attempted,
        actual,
        max_segment_secs: max_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes a fixed number of segment files, regardless of the requested duration.
    struct WritesSegments(u32);

    #[async_trait]
    impl Splitter for WritesSegments {
        async fn split(&self, request: &SplitRequest) -> Result<(), TranscodeError> {
            for i in 0..self.0 {
                let name = segment_name(i, &request.extension);
                std::fs::write(request.work_dir.join(name), format!("seg{i}"))?;
            }
            Ok(())
        }
    }

    struct MustNotRun;

    #[async_trait]
    impl Splitter for MustNotRun {
        async fn split(&self, _request: &SplitRequest) -> Result<(), TranscodeError> {
            panic!("single-segment runs must not invoke the splitter");
        }
    }

    fn source_in(dir: &Path) -> PathBuf {
        let src = dir.join("clip.mp4");
        std::fs::write(&src, (0..=255u8).cycle().take(10_000).collect::<Vec<_>>()).unwrap();
        src
    }

    #[test]
    fn segment_duration_rounds_up_to_hundredths() {
        assert_eq!(max_segment_secs(60.0, 4), 15.0);
        assert_eq!(max_segment_secs(10.0, 3), 3.34);
        assert_eq!(max_segment_secs(60.026, 4), 15.01);
    }

    #[tokio::test]
    async fn single_segment_is_a_verbatim_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source_in(tmp.path());
        let ws = Workspace::open(tmp.path().join("work")).unwrap();

        let out = split(&MustNotRun, &ws, &src, 1, 60.0).await.unwrap();
        assert_eq!(out.actual, 1);
        assert_eq!(out.max_segment_secs, None);

        let copied = std::fs::read(ws.path(&segment_name(0, "mp4"))).unwrap();
        assert_eq!(copied, std::fs::read(&src).unwrap());
    }

    #[tokio::test]
    async fn fewer_segments_than_attempted_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source_in(tmp.path());
        let ws = Workspace::open(tmp.path().join("work")).unwrap();

        let out = split(&WritesSegments(3), &ws, &src, 4, 60.0).await.unwrap();
        assert_eq!(out.attempted, 4);
        assert_eq!(out.actual, 3);
        assert_eq!(out.max_segment_secs, Some(15.0));
    }

    #[tokio::test]
    async fn more_segments_than_attempted_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source_in(tmp.path());
        let ws = Workspace::open(tmp.path().join("work")).unwrap();

        let err = split(&WritesSegments(5), &ws, &src, 4, 60.0).await.unwrap_err();
        assert!(matches!(
            err,
            TranscodeError::SegmentationOverrun {
                attempted: 4,
                actual: 5
            }
        ));
    }

    #[tokio::test]
    async fn no_segments_is_a_tool_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source_in(tmp.path());
        let ws = Workspace::open(tmp.path().join("work")).unwrap();

        let err = split(&WritesSegments(0), &ws, &src, 4, 60.0).await.unwrap_err();
        assert!(matches!(err, TranscodeError::ToolFailed { .. }));
    }

    #[cfg(unix)]
    mod ffmpeg {
        use super::*;
        use crate::TranscoderConfig;
        use crate::testutil::script;
        use crate::tools::Toolchain;

        fn splitter(ffmpeg_path: PathBuf) -> std::sync::Arc<dyn Splitter> {
            Toolchain::system(&TranscoderConfig {
                ffmpeg_path,
                ..TranscoderConfig::default()
            })
            .splitter
        }

        fn request(dir: &Path) -> SplitRequest {
            SplitRequest {
                source: dir.join("clip.mp4"),
                work_dir: dir.to_path_buf(),
                extension: "mp4".into(),
                max_segment_secs: 15.0,
                log: dir.join("split.log"),
            }
        }

        #[tokio::test]
        async fn segment_muxer_arguments_and_log() {
            let tmp = tempfile::tempdir().unwrap();
            let args = tmp.path().join("args");
            let ffmpeg = script(
                tmp.path(),
                "ffmpeg",
                &format!("echo \"$@\" > '{}'\necho splitting >&2", args.display()),
            );
            let req = request(tmp.path());

            splitter(ffmpeg).split(&req).await.unwrap();

            let args = std::fs::read_to_string(args).unwrap();
            assert!(args.starts_with("-nostdin"), "{args}");
            assert!(args.contains("-c copy -f segment -segment_time 15.00 -y"), "{args}");
            assert!(args.trim_end().ends_with("splitstitch_segment_%04d.mp4"), "{args}");
            assert_eq!(std::fs::read_to_string(&req.log).unwrap(), "splitting\n");
        }

        #[tokio::test]
        async fn failed_split_names_its_log() {
            let tmp = tempfile::tempdir().unwrap();
            let ffmpeg = script(tmp.path(), "ffmpeg", "exit 3");

            let err = splitter(ffmpeg).split(&request(tmp.path())).await.unwrap_err();
            assert!(matches!(
                err,
                TranscodeError::ToolFailed { tool: "ffmpeg split", ref detail } if detail.contains("split.log")
            ));
        }

        #[tokio::test]
        async fn missing_binary_is_a_tool_failure() {
            let tmp = tempfile::tempdir().unwrap();
            let err = splitter(tmp.path().join("no-such-ffmpeg"))
                .split(&request(tmp.path()))
                .await
                .unwrap_err();
            assert!(matches!(err, TranscodeError::ToolFailed { ref detail, .. } if detail.starts_with("spawn")));
        }
    }
}
