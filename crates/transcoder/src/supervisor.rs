//! Launch and supervision of the parallel segment jobs.
//!
//! A single task owns every job handle and a [`RunState`]. On each tick it
//! polls all jobs without blocking, samples the frame counter of one running
//! job and folds both into the state. The loop ends when every job is terminal
//! or the cancellation token fires.

use std::path::PathBuf;
use std::time::Duration;

use splitstitch_core::types::JobStatus;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TranscodeError;
use crate::dispatch::SegmentJob;
use crate::tools::{JobExit, JobLauncher, RunningJob};

/// Progress is reported in steps of this many percent.
const PROGRESS_STEP: u8 = 10;

/// Typed record of one segment job.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub index: u32,
    pub device: u32,
    pub output: PathBuf,
    pub log: PathBuf,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
}

/// Aggregate state of a run: every segment job plus the last reported percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub segments: Vec<SegmentRecord>,
    percent_done: u8,
    frames_per_segment: f64,
}

impl RunState {
    pub fn new(jobs: &[SegmentJob], total_frames: u64) -> Self {
        let segments = jobs
            .iter()
            .map(|j| SegmentRecord {
                index: j.index,
                device: j.device,
                output: j.output.clone(),
                log: j.log.clone(),
                status: JobStatus::Launched,
                exit_code: None,
            })
            .collect::<Vec<_>>();

        let frames_per_segment = if segments.is_empty() {
            0.0
        } else {
            total_frames as f64 / segments.len() as f64
        };

        Self {
            segments,
            percent_done: 0,
            frames_per_segment,
        }
    }

    pub fn percent_done(&self) -> u8 {
        self.percent_done
    }

    pub fn all_terminal(&self) -> bool {
        self.segments.iter().all(|s| s.status.is_terminal())
    }

    pub fn all_succeeded(&self) -> bool {
        self.segments
            .iter()
            .all(|s| s.status == JobStatus::Succeeded)
    }

    /// Indices of failed segments, ascending.
    pub fn failed(&self) -> Vec<u32> {
        self.segments
            .iter()
            .filter(|s| s.status == JobStatus::Failed)
            .map(|s| s.index)
            .collect()
    }

    /// Position of the job whose log drives progress: the lowest-index job still running.
    pub fn representative(&self) -> Option<usize> {
        self.segments.iter().position(|s| !s.status.is_terminal())
    }

    /// Fold one poll result into the record at `pos`.
    pub fn record_poll(&mut self, pos: usize, exit: Option<JobExit>) {
        let seg = &mut self.segments[pos];
        if seg.status.is_terminal() {
            return;
        }
        match exit {
            None => seg.status = JobStatus::Running,
            Some(exit) => {
                seg.exit_code = exit.code;
                seg.status = if exit.success() {
                    JobStatus::Succeeded
                } else {
                    JobStatus::Failed
                };
            }
        }
    }

    /// Fold a frame counter sample; returns the newly reached percentage, if any.
    pub fn observe_frames(&mut self, frame: u64) -> Option<u8> {
        let next = progress_step(self.percent_done, frame, self.frames_per_segment)?;
        self.percent_done = next;
        Some(next)
    }

    /// Force completion; returns 100 unless it was already reported.
    pub fn finish(&mut self) -> Option<u8> {
        if self.percent_done >= 100 {
            return None;
        }
        self.percent_done = 100;
        Some(100)
    }
}

/// Next progress step to report, if `frame` moved past the last one.
///
/// Percentages are quantised down to whole steps and capped below 100 while
/// jobs are running; 100 is only reached through [`RunState::finish`].
pub fn progress_step(reported: u8, frame: u64, frames_per_segment: f64) -> Option<u8> {
    if frames_per_segment <= 0.0 {
        return None;
    }
    let percent = (100.0 * frame as f64 / frames_per_segment).floor();
    let cap = f64::from(100 - PROGRESS_STEP);
    let step = ((percent / f64::from(PROGRESS_STEP)).floor() * f64::from(PROGRESS_STEP)).min(cap);
    let step = step as u8;
    (step >= reported.saturating_add(PROGRESS_STEP)).then_some(step)
}

/// Final state of a supervised run and the percentages reported along the way.
#[derive(Debug, Clone)]
pub struct SupervisedRun {
    pub state: RunState,
    pub reports: Vec<u8>,
}

/// Launch every job in index order, pausing `stagger` between launches.
///
/// If a launch fails, already-started jobs are killed before the error is returned.
pub async fn launch_all(
    launcher: &dyn JobLauncher,
    jobs: &[SegmentJob],
    stagger: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<Box<dyn RunningJob>>, TranscodeError> {
    let mut handles: Vec<Box<dyn RunningJob>> = Vec::with_capacity(jobs.len());

    for (n, job) in jobs.iter().enumerate() {
        if n > 0 && !stagger.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    kill_all(&mut handles);
                    return Err(TranscodeError::Cancelled);
                }
                _ = tokio::time::sleep(stagger) => {}
            }
        }
        match launcher.launch(job) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!(segment = job.index, error = %e, "launch failed, stopping started jobs");
                kill_all(&mut handles);
                return Err(e);
            }
        }
    }

    info!(jobs = handles.len(), "all segment jobs launched");
    Ok(handles)
}

/// Poll every job until all are terminal. Does not stop early on failure.
pub async fn supervise(
    mut handles: Vec<Box<dyn RunningJob>>,
    mut state: RunState,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<SupervisedRun, TranscodeError> {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reports = Vec::new();
    let mut representative = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                for (pos, handle) in handles.iter_mut().enumerate() {
                    if !state.segments[pos].status.is_terminal() {
                        handle.kill();
                    }
                }
                warn!("run cancelled, segment jobs signalled to stop");
                return Err(TranscodeError::Cancelled);
            }
            _ = ticker.tick() => {}
        }

        for (pos, handle) in handles.iter_mut().enumerate() {
            if state.segments[pos].status.is_terminal() {
                continue;
            }
            let exit = match handle.try_exit() {
                Ok(exit) => exit,
                Err(e) => {
                    warn!(segment = state.segments[pos].index, error = %e, "cannot poll job, treating as failed");
                    Some(JobExit { code: None })
                }
            };
            state.record_poll(pos, exit);
            let seg = &state.segments[pos];
            if seg.status.is_terminal() {
                info!(segment = seg.index, status = %seg.status, exit_code = ?seg.exit_code, "segment job finished");
            }
        }

        if state.all_terminal() {
            break;
        }

        let current = state.representative();
        if current != representative {
            debug!(position = ?current, "progress now follows a different job");
            representative = current;
        }
        if let Some(pos) = current {
            if let Some(frame) = handles[pos].frames_encoded() {
                if let Some(percent) = state.observe_frames(frame) {
                    info!(percent, "transcoding progress");
                    reports.push(percent);
                }
            }
        }
    }

    if let Some(percent) = state.finish() {
        info!(percent, "transcoding progress");
        reports.push(percent);
    }

    Ok(SupervisedRun { state, reports })
}

fn kill_all(handles: &mut [Box<dyn RunningJob>]) {
    for h in handles.iter_mut() {
        h.kill();
    }
}
