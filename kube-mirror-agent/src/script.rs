use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ScriptConfig;
use crate::{Error, Result};

/// Runs the configured command under `/bin/sh -c` with a hard deadline.
/// Returns the combined stdout/stderr on success.
pub async fn run(cfg: &ScriptConfig) -> Result<String> {
    let mut command = Command::new("/bin/sh");
    command
        .arg("-c")
        .arg(&cfg.path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn()?;
    let output = if cfg.timeout > 0 {
        match timeout(Duration::from_secs(cfg.timeout), child.wait_with_output()).await {
            Ok(result) => result?,
            // dropping the wait future kills the child via kill_on_drop
            Err(_) => {
                return Err(Error::ScriptTimeout {
                    path: cfg.path.clone(),
                    timeout_secs: cfg.timeout,
                });
            }
        }
    } else {
        child.wait_with_output().await?
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(Error::ScriptFailed {
            path: cfg.path.clone(),
            code: output.status.code(),
            output: combined,
        });
    }

    Ok(combined)
}
