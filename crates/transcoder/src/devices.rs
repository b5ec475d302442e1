//! Accelerator device enumeration, utilization and slot reservation.
//!
//! Wraps the hardware-management tools: `xbutil examine` to count devices,
//! `xrmadm` for the utilization report, and the job slot reservation tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::tools::ResourceManager;
use crate::{TranscodeError, TranscoderConfig};

/// Compute units checked for activity: decoder, scaler, encoder.
const CHECKED_UNITS: [u32; 3] = [0, 3, 4];

/// Filesystems with coarse timestamps can date a fresh reservation log slightly
/// before the tool was spawned.
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// Load of one compute unit as reported by the resource manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLoad {
    pub device: u32,
    pub unit: u32,
    pub kernel: String,
    pub channels_in_use: u64,
    pub used_load: u64,
    pub reserved_load: u64,
}

impl UnitLoad {
    pub fn is_busy(&self) -> bool {
        self.channels_in_use > 0 || self.used_load > 0 || self.reserved_load > 0
    }
}

/// [`ResourceManager`] backed by the Xilinx resource-management tools.
pub struct XrmResources {
    xbutil_path: PathBuf,
    device_marker: String,
    xrmadm_path: PathBuf,
    list_cmd_path: PathBuf,
    reservation_tool_path: PathBuf,
    reservation_log_path: PathBuf,
    reservation_marker: String,
}

impl XrmResources {
    pub fn from_config(config: &TranscoderConfig) -> Self {
        Self {
            xbutil_path: config.xbutil_path.clone(),
            device_marker: config.device_marker.clone(),
            xrmadm_path: config.xrmadm_path.clone(),
            list_cmd_path: config.xrm_list_cmd_path.clone(),
            reservation_tool_path: config.reservation_tool_path.clone(),
            reservation_log_path: config.reservation_log_path.clone(),
            reservation_marker: config.reservation_marker.clone(),
        }
    }
}

#[async_trait]
impl ResourceManager for XrmResources {
    async fn device_count(&self) -> Result<u32, TranscodeError> {
        let stdout = run_capture(&self.xbutil_path, &["examine"]).await?;
        let count = count_marker_lines(&stdout, &self.device_marker);
        info!(devices = count, marker = %self.device_marker, "device enumeration complete");
        Ok(count)
    }

    async fn devices_idle(&self) -> Result<bool, TranscodeError> {
        let list_cmd = self.list_cmd_path.to_string_lossy();
        let stdout = run_capture(&self.xrmadm_path, &[&*list_cmd]).await?;
        let raw: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| TranscodeError::ResourceQuery(format!("utilization report: {e}")))?;

        let units = parse_utilization(&raw)?;
        let busy: Vec<&UnitLoad> = units.iter().filter(|u| u.is_busy()).collect();
        for u in &busy {
            warn!(device = u.device, unit = u.unit, kernel = %u.kernel, "compute unit in use");
        }
        Ok(busy.is_empty())
    }

    async fn reserve_slots(&self, description: &Path) -> Result<u32, TranscodeError> {
        let started = SystemTime::now();
        let mut child = tokio::process::Command::new(&self.reservation_tool_path)
            .arg(description)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::ResourceQuery(format!("spawn reservation tool: {e}")))?;

        // The tool keeps its session open until it reads a newline.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"\n").await {
                debug!(error = %e, "reservation tool closed its input early");
            }
        }
        let status = child.wait().await?;
        if !status.success() {
            return Err(TranscodeError::ResourceQuery(format!(
                "{} exited with {status}",
                self.reservation_tool_path.display()
            )));
        }
        debug!(?status, "reservation session finished");

        let log_path = &self.reservation_log_path;
        let unreadable =
            |e: std::io::Error| TranscodeError::ResourceQuery(format!("read {}: {e}", log_path.display()));
        let modified = tokio::fs::metadata(log_path)
            .await
            .map_err(unreadable)?
            .modified()
            .map_err(unreadable)?;
        if modified + MTIME_SLACK < started {
            return Err(TranscodeError::ResourceQuery(format!(
                "{} was not written by this reservation",
                log_path.display()
            )));
        }

        let log = tokio::fs::read_to_string(log_path).await.map_err(unreadable)?;
        let slots = count_marker_lines(&log, &self.reservation_marker);
        info!(slots, "job slots reserved");
        Ok(slots)
    }
}

async fn run_capture(program: &Path, args: &[&str]) -> Result<String, TranscodeError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| TranscodeError::ResourceQuery(format!("spawn {}: {e}", program.display())))?;

    if !output.status.success() {
        return Err(TranscodeError::ResourceQuery(format!(
            "{} exited with {}",
            program.display(),
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Number of lines containing `marker`.
pub fn count_marker_lines(text: &str, marker: &str) -> u32 {
    text.lines().filter(|l| l.contains(marker)).count() as u32
}

/// Parse the resource manager's JSON utilization report.
///
/// Keys in the report are padded with trailing spaces (`"usedLoad     "`), so
/// they are matched after trimming. Load values look like `"0 of 1000000"`.
pub fn parse_utilization(raw: &serde_json::Value) -> Result<Vec<UnitLoad>, TranscodeError> {
    let data = raw
        .get("response")
        .and_then(|r| r.get("data"))
        .ok_or_else(|| report_error("missing response.data"))?;

    let devices = field(data, "deviceNumber")
        .and_then(leading_int)
        .ok_or_else(|| report_error("missing deviceNumber"))? as u32;

    let mut units = Vec::new();
    for device in 0..devices {
        let dev = field(data, &format!("device_{device}"))
            .ok_or_else(|| report_error(&format!("missing device_{device}")))?;

        for unit in CHECKED_UNITS {
            let cu = field(dev, &format!("cu_{unit}"))
                .ok_or_else(|| report_error(&format!("missing device_{device}.cu_{unit}")))?;

            let number = |name: &str| {
                field(cu, name).and_then(leading_int).ok_or_else(|| {
                    report_error(&format!("missing device_{device}.cu_{unit}.{name}"))
                })
            };

            units.push(UnitLoad {
                device,
                unit,
                kernel: field(cu, "kernelName")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .trim()
                    .to_string(),
                channels_in_use: number("numChanInuse")?,
                used_load: number("usedLoad")?,
                reserved_load: number("reservedLoad")?,
            });
        }
    }

    Ok(units)
}

fn field<'a>(obj: &'a serde_json::Value, name: &str) -> Option<&'a serde_json::Value> {
    obj.as_object()?
        .iter()
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v)
}

fn leading_int(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.split_whitespace().next()?.parse().ok(),
        _ => None,
    }
}

fn report_error(detail: &str) -> TranscodeError {
    TranscodeError::ResourceQuery(format!("utilization report: {detail}"))
}
