// Querying the UPS through NUT's `upsc` tool.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use std::{io, thread};

use thiserror::Error;

// How often we re-check a still-running query while waiting for the timeout.
const WAIT_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum UpsError {
    #[error("failed to run {tool}: {source}")]
    Spawn { tool: String, source: io::Error },
    #[error("{tool} did not finish within {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
    #[error("{tool} exited with {status}")]
    Failed { tool: String, status: String },
    #[error("{tool} produced non-UTF-8 output")]
    BadOutput { tool: String },
}

/// Handle on the external query tool for one named UPS device.
pub struct Upsc {
    tool: String,
    device: String,
    timeout: Duration,
}

impl Upsc {
    pub fn new(tool: &str, device: &str, timeout: Duration) -> Upsc {
        Upsc {
            tool: tool.to_string(),
            device: device.to_string(),
            timeout,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Run `upsc <device>` and return its stdout. Any failure mode — spawn
    /// error, timeout, non-zero exit, undecodable output — comes back as a
    /// `UpsError` for the caller to log; it never panics and never blocks
    /// past the configured timeout.
    pub fn query(&self) -> Result<String, UpsError> {
        let mut child = Command::new(&self.tool)
            .arg(&self.device)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| UpsError::Spawn {
                tool: self.tool.clone(),
                source,
            })?;

        let status = self.wait_with_timeout(&mut child)?;
        if !status.success() {
            return Err(UpsError::Failed {
                tool: self.tool.clone(),
                status: status.to_string(),
            });
        }

        let mut out = Vec::new();
        if let Some(mut stdout) = child.stdout.take() {
            let _ = stdout.read_to_end(&mut out);
        }
        String::from_utf8(out).map_err(|_| UpsError::BadOutput {
            tool: self.tool.clone(),
        })
    }

    fn wait_with_timeout(&self, child: &mut Child) -> Result<std::process::ExitStatus, UpsError> {
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start.elapsed() >= self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(UpsError::Timeout {
                            tool: self.tool.clone(),
                            timeout: self.timeout,
                        });
                    }
                    thread::sleep(WAIT_STEP);
                }
                Err(source) => {
                    return Err(UpsError::Spawn {
                        tool: self.tool.clone(),
                        source,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_reports_spawn_error() {
        let upsc = Upsc::new("/nonexistent/upsc", "myups", Duration::from_secs(1));
        assert!(matches!(upsc.query(), Err(UpsError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_reports_failure() {
        let upsc = Upsc::new("false", "myups", Duration::from_secs(5));
        assert!(matches!(upsc.query(), Err(UpsError::Failed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn successful_run_returns_stdout() {
        // `echo myups` stands in for a tool that prints its argument.
        let upsc = Upsc::new("echo", "myups", Duration::from_secs(5));
        assert_eq!(upsc.query().unwrap().trim(), "myups");
    }

    #[cfg(unix)]
    #[test]
    fn hung_tool_is_killed_at_timeout() {
        let upsc = Upsc::new("sleep", "30", Duration::from_millis(200));
        let start = Instant::now();
        assert!(matches!(upsc.query(), Err(UpsError::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
