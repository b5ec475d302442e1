//! Shell scripts standing in for the external tools in adapter tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tools::{JobExit, RunningJob};

/// Write an executable `sh` script named `name` into `dir`.
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Poll a job until it exits, giving up after a few seconds.
pub async fn wait_exit(job: &mut dyn RunningJob) -> JobExit {
    for _ in 0..500 {
        if let Some(exit) = job.try_exit().unwrap() {
            return exit;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job did not exit");
}
