use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use splitstitch_core::error::ErrorEnvelope;
use splitstitch_transcoder::pipeline::{Pipeline, RunRequest};
use splitstitch_transcoder::tools::Toolchain;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser, Debug)]
#[command(name = "splitstitch")]
#[command(about = "Split a clip, transcode the segments in parallel across accelerator devices, stitch the result", long_about = None)]
struct Args {
    /// Source clip (.mp4, .mov or .mkv)
    #[arg(short = 's', long = "sourcefile")]
    source: PathBuf,

    /// Destination file (.mp4)
    #[arg(short = 'd', long = "destinationfile", default_value = "out.mp4")]
    destination: PathBuf,

    /// Output codec: h264, hevc or h265
    #[arg(short = 'c', long = "codec", default_value = "hevc")]
    codec: String,

    /// Output bitrate in Mbit/s
    #[arg(short = 'b', long = "bitrate", default_value = "5.0")]
    bitrate: f64,

    /// Jobs per device (0 = use the reservation estimate)
    #[arg(short = 'j', long = "numjobs", default_value = "0", allow_negative_numbers = true)]
    jobs_per_device: i32,

    /// Devices to use (0 = all present)
    #[arg(short = 'n', long = "numdevices", default_value = "0", allow_negative_numbers = true)]
    devices: i32,

    /// Extra encoder options, appended after the bitrate flags
    #[arg(short = 'x', long = "extra", default_value = "", allow_hyphen_values = true)]
    extra: String,

    /// Directory for temporary files (overrides SPLITSTITCH_WORK_DIR)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Do not abort when the devices already have work on them
    #[arg(long)]
    skip_busy_check: bool,

    /// Print the summary or error as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("failed to install logging")?;

    let mut tc_config = config::from_env();
    if let Some(dir) = &args.work_dir {
        tc_config.work_dir = dir.clone();
    }
    if args.skip_busy_check {
        tc_config.check_utilization = false;
    }
    info!(work_dir = %tc_config.work_dir.display(), ffmpeg = %tc_config.ffmpeg_path.display(), "configuration loaded");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupt received, stopping");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for interrupts"),
            }
        });
    }

    let request = RunRequest {
        source: args.source,
        destination: args.destination,
        output_codec: args.codec,
        bitrate_mbps: args.bitrate,
        jobs_per_device: args.jobs_per_device,
        devices: args.devices,
        extra_options: args.extra,
    };

    let tools = Toolchain::system(&tc_config);
    let pipeline = Pipeline::new(tc_config, tools);

    match pipeline.run(&request, &cancel).await {
        Ok(summary) => {
            if args.json {
                let body = serde_json::to_string_pretty(&summary)
                    .context("failed to encode summary")?;
                println!("{body}");
            } else {
                println!(
                    "{}: {} segments on {} devices in {:.1}s ({:.2} fps, {:.1}x realtime)",
                    summary.destination.display(),
                    summary.segments,
                    summary.plan.devices_used,
                    summary.elapsed_secs,
                    summary.effective_fps,
                    summary.realtime_factor,
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let class = e.class();
            error!(code = class.code(), hint = class.hint().unwrap_or(""), "{e}");
            if args.json {
                let body = serde_json::to_string_pretty(&ErrorEnvelope::new(class, e.to_string()))
                    .context("failed to encode error")?;
                println!("{body}");
            }
            Ok(ExitCode::from(class.exit_code()))
        }
    }
}
