use serde::Serialize;
use splitstitch_core::types::{ClipProperties, JobPlan, VideoCodec};
use tracing::{info, warn};

use crate::TranscodeError;
use crate::tools::ResourceManager;
use crate::workspace::{JOB_DESCRIPTION, Workspace};

/// Job description document consumed by the slot reservation tool.
#[derive(Debug, Clone, Serialize)]
pub struct JobDescription {
    pub request: ReservationRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationRequest {
    pub name: String,
    pub request_id: u32,
    pub parameters: ReservationParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationParameters {
    pub name: String,
    pub resources: Vec<ResourceDemand>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceDemand {
    pub function: Function,
    pub format: VideoCodec,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Function {
    Decoder,
    Encoder,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub input: ResolutionInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionInput {
    pub width: u32,
    pub height: u32,
    #[serde(rename = "frame-rate")]
    pub frame_rate: FrameRate,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

/// One decoder plus one encoder at the clip's resolution and frame rate.
pub fn job_description(
    clip: &ClipProperties,
    input: VideoCodec,
    output: VideoCodec,
) -> JobDescription {
    let resolution = || Resolution {
        input: ResolutionInput {
            width: clip.width,
            height: clip.height,
            frame_rate: FrameRate {
                num: clip.frame_rate.num,
                den: clip.frame_rate.den,
            },
        },
    };

    JobDescription {
        request: ReservationRequest {
            name: "transcode_job".into(),
            request_id: 1,
            parameters: ReservationParameters {
                name: "transcode_job_params".into(),
                resources: vec![
                    ResourceDemand {
                        function: Function::Decoder,
                        format: input,
                        resolution: resolution(),
                    },
                    ResourceDemand {
                        function: Function::Encoder,
                        format: output,
                        resolution: resolution(),
                    },
                ],
            },
        },
    }
}

/// Caller overrides. Zero or negative means "automatic".
#[derive(Debug, Clone, Copy, Default)]
pub struct CapacityRequest {
    pub devices: i32,
    pub jobs_per_device: i32,
}

/// Outcome of capacity planning.
#[derive(Debug, Clone, Copy)]
pub struct CapacityEstimate {
    pub plan: JobPlan,
    pub estimated_jobs_per_device: u32,
}

/// Combine the device count, the reservation estimate and the caller's overrides.
pub fn plan(
    devices_present: u32,
    total_slots: u32,
    request: CapacityRequest,
) -> Result<CapacityEstimate, TranscodeError> {
    if devices_present < 1 {
        return Err(TranscodeError::NoDevicesAvailable);
    }

    let devices_used = if request.devices > 0 {
        let requested = request.devices as u32;
        if requested > devices_present {
            warn!(
                requested,
                present = devices_present,
                "more devices requested than available, using all present"
            );
        }
        requested.min(devices_present)
    } else {
        devices_present
    };

    let estimated = total_slots / devices_present;
    let jobs_per_device = if request.jobs_per_device > 0 {
        request.jobs_per_device as u32
    } else {
        estimated
    };

    if jobs_per_device == 0 {
        return Err(TranscodeError::NoCapacity(format!(
            "{total_slots} slots reserved across {devices_present} devices"
        )));
    }

    let plan = JobPlan::new(devices_present, devices_used, jobs_per_device).ok_or_else(|| {
        TranscodeError::InputValidation(format!(
            "{jobs_per_device} jobs per device on {devices_used} devices is too many segments"
        ))
    })?;

    Ok(CapacityEstimate {
        plan,
        estimated_jobs_per_device: estimated,
    })
}

/// Query device count and slot capacity, then plan the run.
pub async fn plan_capacity(
    resources: &dyn ResourceManager,
    workspace: &Workspace,
    clip: &ClipProperties,
    input: VideoCodec,
    output: VideoCodec,
    request: CapacityRequest,
) -> Result<CapacityEstimate, TranscodeError> {
    let devices_present = resources.device_count().await?;
    if devices_present < 1 {
        return Err(TranscodeError::NoDevicesAvailable);
    }

    let description = job_description(clip, input, output);
    let path = workspace.path(JOB_DESCRIPTION);
    let body = serde_json::to_vec(&description)
        .map_err(|e| TranscodeError::ResourceQuery(format!("encode job description: {e}")))?;
    tokio::fs::write(&path, body).await?;

    let total_slots = resources.reserve_slots(&path).await?;
    let estimate = plan(devices_present, total_slots, request)?;

    info!(
        devices_present,
        devices_used = estimate.plan.devices_used,
        jobs_estimated = estimate.estimated_jobs_per_device,
        jobs_per_device = estimate.plan.jobs_per_device,
        segments_attempted = estimate.plan.segments_attempted,
        "capacity planned"
    );
    Ok(estimate)
}
