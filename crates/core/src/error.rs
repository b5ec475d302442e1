use serde::Serialize;

/// Failure classes a run can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    InputValidation,
    ProbeParse,
    ResourceQuery,
    NoDevicesAvailable,
    DevicesBusy,
    NoCapacity,
    SegmentationOverrun,
    ResourceExhausted,
    TranscodeJobFailed,
    Stitch,
    Cancelled,
    Internal,
}

impl ErrorClass {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InputValidation => "input_validation",
            Self::ProbeParse => "probe_parse",
            Self::ResourceQuery => "resource_query",
            Self::NoDevicesAvailable => "no_devices_available",
            Self::DevicesBusy => "devices_busy",
            Self::NoCapacity => "no_capacity",
            Self::SegmentationOverrun => "segmentation_overrun",
            Self::ResourceExhausted => "resource_exhausted",
            Self::TranscodeJobFailed => "transcode_job_failed",
            Self::Stitch => "stitch_error",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal_error",
        }
    }

    /// Process exit code; distinct per class.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InputValidation => 2,
            Self::ProbeParse => 3,
            Self::ResourceQuery => 4,
            Self::NoDevicesAvailable => 5,
            Self::DevicesBusy => 6,
            Self::NoCapacity => 7,
            Self::SegmentationOverrun => 8,
            Self::ResourceExhausted => 9,
            Self::TranscodeJobFailed => 10,
            Self::Stitch => 11,
            Self::Cancelled => 130,
            Self::Internal => 1,
        }
    }

    /// Remediation hint shown next to the diagnostic, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::DevicesBusy => {
                Some("make sure all jobs using the devices finish before running again")
            }
            Self::NoCapacity => Some("request an explicit number of jobs per device"),
            Self::SegmentationOverrun => {
                Some("remove leftover segment files from the working directory")
            }
            Self::ResourceExhausted => Some("retry with fewer jobs per device"),
            Self::TranscodeJobFailed => Some("see the failed job output logged above"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// JSON error envelope: `{ "error": { "code": "…", "message": "…", "hint": "…" } }`
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: class.code().to_string(),
                message: message.into(),
                hint: class.hint().map(str::to_string),
            },
        }
    }
}
