#![allow(clippy::collapsible_if)]
pub mod capacity;
pub mod classify;
pub mod devices;
pub mod dispatch;
pub mod ffprobe;
pub mod pipeline;
pub mod segmenter;
pub mod stitch;
pub mod supervisor;
pub mod tools;
pub mod validate;
pub mod workspace;

#[cfg(all(test, unix))]
mod testutil;

use std::path::PathBuf;
use std::time::Duration;

use splitstitch_core::error::ErrorClass;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("invalid input: {0}")]
    InputValidation(String),
    #[error("input file {} not found", .0.display())]
    InputNotFound(PathBuf),
    #[error("could not parse probe output: {0}")]
    ProbeParse(String),
    #[error("resource query failed: {0}")]
    ResourceQuery(String),
    #[error("no accelerator devices found in the system")]
    NoDevicesAvailable,
    #[error("accelerator resources are already in use by other jobs")]
    DevicesBusy,
    #[error("no transcode slots available: {0}")]
    NoCapacity(String),
    #[error("split produced {actual} segments but only {attempted} were attempted")]
    SegmentationOverrun { attempted: u32, actual: u32 },
    #[error("segment jobs {failed:?} failed with a resource allocation error")]
    ResourceExhausted { failed: Vec<u32> },
    #[error("segment jobs {failed:?} did not finish successfully")]
    TranscodeJobFailed { failed: Vec<u32> },
    #[error("concatenation failed: {0}")]
    Stitch(String),
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: &'static str, detail: String },
    #[error("run cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InputValidation(_) | Self::InputNotFound(_) => ErrorClass::InputValidation,
            Self::ProbeParse(_) => ErrorClass::ProbeParse,
            Self::ResourceQuery(_) => ErrorClass::ResourceQuery,
            Self::NoDevicesAvailable => ErrorClass::NoDevicesAvailable,
            Self::DevicesBusy => ErrorClass::DevicesBusy,
            Self::NoCapacity(_) => ErrorClass::NoCapacity,
            Self::SegmentationOverrun { .. } => ErrorClass::SegmentationOverrun,
            Self::ResourceExhausted { .. } => ErrorClass::ResourceExhausted,
            Self::TranscodeJobFailed { .. } => ErrorClass::TranscodeJobFailed,
            Self::Stitch(_) => ErrorClass::Stitch,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::ToolFailed { .. } | Self::Io(_) => ErrorClass::Internal,
        }
    }
}

/// Global transcoder configuration: external tool locations and supervisor tuning.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub xbutil_path: PathBuf,
    /// Device enumeration lines containing this string count as one device.
    pub device_marker: String,
    pub reservation_tool_path: PathBuf,
    pub reservation_log_path: PathBuf,
    /// Reservation log lines containing this string count as one slot.
    pub reservation_marker: String,
    pub xrmadm_path: PathBuf,
    pub xrm_list_cmd_path: PathBuf,
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
    pub launch_stagger: Duration,
    pub check_utilization: bool,
    /// Job log text that marks a resource allocation failure.
    pub allocation_failure_marker: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            xbutil_path: PathBuf::from("xbutil"),
            device_marker: "xilinx_u30".into(),
            reservation_tool_path: PathBuf::from("jobSlotReservation"),
            reservation_log_path: PathBuf::from("/var/tmp/xilinx/xrm_jobReservation.sh"),
            reservation_marker: "XRM_RESERVE_ID".into(),
            xrmadm_path: PathBuf::from("xrmadm"),
            xrm_list_cmd_path: PathBuf::from("/opt/xilinx/xrm/test/list_cmd.json"),
            work_dir: PathBuf::from("."),
            poll_interval: Duration::from_millis(100),
            launch_stagger: Duration::from_millis(50),
            check_utilization: true,
            allocation_failure_marker: "allocate".into(),
        }
    }
}
