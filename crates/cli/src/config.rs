use std::path::PathBuf;
use std::time::Duration;

use splitstitch_transcoder::TranscoderConfig;

/// Build the transcoder configuration from `SPLITSTITCH_*` environment variables.
pub fn from_env() -> TranscoderConfig {
    from_lookup(|key| std::env::var(key).ok())
}

/// Overlay variables found through `lookup` on the defaults.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TranscoderConfig {
    let defaults = TranscoderConfig::default();
    let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);

    let poll_interval = lookup("SPLITSTITCH_POLL_MS")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(defaults.poll_interval);

    TranscoderConfig {
        ffmpeg_path: path("SPLITSTITCH_FFMPEG", defaults.ffmpeg_path.clone()),
        ffprobe_path: path("SPLITSTITCH_FFPROBE", defaults.ffprobe_path.clone()),
        xbutil_path: path("SPLITSTITCH_XBUTIL", defaults.xbutil_path.clone()),
        reservation_tool_path: path(
            "SPLITSTITCH_RESERVATION_TOOL",
            defaults.reservation_tool_path.clone(),
        ),
        reservation_log_path: path(
            "SPLITSTITCH_RESERVATION_LOG",
            defaults.reservation_log_path.clone(),
        ),
        xrmadm_path: path("SPLITSTITCH_XRMADM", defaults.xrmadm_path.clone()),
        work_dir: path("SPLITSTITCH_WORK_DIR", defaults.work_dir.clone()),
        poll_interval,
        ..defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = from_lookup(lookup(&[]));
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.work_dir, PathBuf::from("."));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.check_utilization);
    }

    #[test]
    fn variables_override_defaults() {
        let config = from_lookup(lookup(&[
            ("SPLITSTITCH_FFMPEG", "/opt/xilinx/ffmpeg/bin/ffmpeg"),
            ("SPLITSTITCH_WORK_DIR", "/tmp/run"),
            ("SPLITSTITCH_POLL_MS", "250"),
        ]));
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/xilinx/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.work_dir, PathBuf::from("/tmp/run"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn bad_poll_interval_falls_back() {
        for bad in ["0", "fast", "-5"] {
            let config = from_lookup(lookup(&[("SPLITSTITCH_POLL_MS", bad)]));
            assert_eq!(config.poll_interval, Duration::from_millis(100), "{bad}");
        }
    }
}
