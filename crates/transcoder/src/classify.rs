use splitstitch_core::types::JobStatus;
use tracing::{error, warn};

use crate::TranscodeError;
use crate::supervisor::RunState;

/// Classify a run with failed jobs by scanning every job log for the allocation marker.
///
/// The last line of each failed job's log is logged, since the logs are removed with the workspace.
pub async fn classify_run(state: &RunState, marker: &str) -> TranscodeError {
    let mut texts = Vec::with_capacity(state.segments.len());
    for seg in &state.segments {
        let text = match tokio::fs::read(&seg.log).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(log = %seg.log.display(), error = %e, "cannot read job log");
                continue;
            }
        };
        if seg.status == JobStatus::Failed {
            warn!(
                segment = seg.index,
                device = seg.device,
                exit_code = ?seg.exit_code,
                last_line = last_line(&text),
                "segment job failed"
            );
        }
        texts.push(text);
    }
    classify_failure(state.failed(), &texts, marker)
}

fn last_line(text: &str) -> &str {
    text.split(['\n', '\r'])
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

/// `ResourceExhausted` if any log mentions the allocation marker, else `TranscodeJobFailed`.
pub fn classify_failure(failed: Vec<u32>, logs: &[String], marker: &str) -> TranscodeError {
    let allocation_failures = logs.iter().filter(|l| l.contains(marker)).count();
    if allocation_failures > 0 {
        error!(
            failed = ?failed,
            logs_with_marker = allocation_failures,
            "segment jobs failed with a resource allocation error"
        );
        TranscodeError::ResourceExhausted { failed }
    } else {
        error!(failed = ?failed, "segment jobs did not finish successfully");
        TranscodeError::TranscodeJobFailed { failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::supervisor::SegmentRecord;

    #[test]
    fn marker_in_any_log_means_resource_exhausted() {
        let logs = vec![
            "frame= 100 fps=60".to_string(),
            "[MPSOC_VCU_HEVC] xrm failed to allocate encoder resources".to_string(),
        ];
        let err = classify_failure(vec![1], &logs, "allocate");
        assert!(matches!(err, TranscodeError::ResourceExhausted { ref failed } if failed == &[1]));
    }

    #[test]
    fn last_line_skips_progress_carriage_returns() {
        assert_eq!(last_line("frame= 10\rframe= 20\rConversion failed!\n\n"), "Conversion failed!");
        assert_eq!(last_line(""), "");
    }

    #[test]
    fn other_failures_are_generic() {
        let logs = vec!["Invalid data found when processing input".to_string()];
        let err = classify_failure(vec![0, 2], &logs, "allocate");
        assert!(matches!(err, TranscodeError::TranscodeJobFailed { ref failed } if failed == &[0, 2]));
    }

    #[tokio::test]
    async fn scans_logs_of_all_jobs_not_only_failed_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let record = |index: u32, status: JobStatus, text: &str| {
            let log = tmp.path().join(format!("job_{index:04}.log"));
            std::fs::write(&log, text).unwrap();
            SegmentRecord {
                index,
                device: 0,
                output: tmp.path().join(format!("encoded_{index:04}.mp4")),
                log,
                status,
                exit_code: None,
            }
        };

        let mut state = crate::supervisor::RunState::new(&[], 0);
        state.segments = vec![
            record(0, JobStatus::Succeeded, "warning: could not allocate lookahead, retrying"),
            record(1, JobStatus::Failed, "Conversion failed!"),
        ];

        let err = classify_run(&state, "allocate").await;
        assert!(matches!(err, TranscodeError::ResourceExhausted { ref failed } if failed == &[1]));

        state.segments.pop();
        state.segments[0].status = JobStatus::Failed;
        std::fs::write(&state.segments[0].log, "Conversion failed!").unwrap();
        let err = classify_run(&state, "allocate").await;
        assert!(matches!(err, TranscodeError::TranscodeJobFailed { .. }));
    }
}
