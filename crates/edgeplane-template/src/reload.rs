//! Proxy reload.
//!
//! The reload script is run with no arguments after every commit. Its
//! stdout and stderr are captured for diagnostics. Without a timeout a hung
//! script blocks the pipeline indefinitely; with one, the child is killed
//! once the deadline passes.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::{RouterError, RouterResult};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of a successful reload.
#[derive(Debug, Clone)]
pub struct ReloadOutput {
    pub status: ExitStatus,
    /// stdout followed by stderr.
    pub output: String,
    pub elapsed: Duration,
}

/// The external command that makes the proxy adopt new configuration.
#[derive(Debug, Clone)]
pub struct ReloadScript {
    path: PathBuf,
    timeout: Option<Duration>,
}

impl ReloadScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the script to completion.
    ///
    /// A non-zero exit is an error carrying the combined output.
    pub fn run(&self) -> RouterResult<ReloadOutput> {
        let started = Instant::now();
        debug!(script = ?self.path, timeout = ?self.timeout, "running reload script");

        let mut cmd = Command::new(&self.path);
        cmd.stdin(Stdio::null());

        let output = match self.timeout {
            None => cmd.output(),
            Some(timeout) => {
                let child = cmd
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|source| self.spawn_error(source))?;
                wait_with_timeout(child, timeout)?
            }
        }
        .map_err(|source| self.spawn_error(source))?;

        let combined = combine(&output);
        let elapsed = started.elapsed();

        if !output.status.success() {
            error!(
                script = ?self.path,
                status = %output.status,
                output = %combined,
                "reload script failed"
            );
            return Err(RouterError::Reload {
                status: output.status,
                output: combined,
            });
        }

        info!(script = ?self.path, elapsed_ms = elapsed.as_millis() as u64, "proxy reloaded");
        if !combined.is_empty() {
            debug!(output = %combined, "reload output");
        }

        Ok(ReloadOutput {
            status: output.status,
            output: combined,
            elapsed,
        })
    }

    fn spawn_error(&self, source: std::io::Error) -> RouterError {
        RouterError::ReloadSpawn {
            path: self.path.clone(),
            source,
        }
    }
}

/// Wait for `child`, killing it once `timeout` has elapsed.
///
/// The pipes are drained on helper threads so a chatty script cannot
/// block on a full pipe while we poll.
fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
) -> RouterResult<std::io::Result<Output>> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let deadline = Instant::now() + timeout;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                error!(timeout = ?timeout, "reload script timed out, killed");
                return Err(RouterError::ReloadTimeout { timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Ok(Err(e)),
        }
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle.and_then(|h| h.join().ok()).unwrap_or_default()
    };

    Ok(Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    }))
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn combine(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined.trim_end().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn successful_reload() {
        let out = ReloadScript::new("true").run().unwrap();
        assert!(out.status.success());
        assert!(out.output.is_empty());
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let err = ReloadScript::new("false").run().unwrap_err();
        match err {
            RouterError::Reload { status, .. } => assert!(!status.success()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_script_fails_to_spawn() {
        let err = ReloadScript::new("/nonexistent/reload-haproxy").run().unwrap_err();
        assert!(matches!(err, RouterError::ReloadSpawn { .. }));
    }

    #[test]
    fn timeout_allows_fast_script() {
        let out = ReloadScript::new("true")
            .with_timeout(Some(Duration::from_secs(10)))
            .run()
            .unwrap();
        assert!(out.status.success());
    }

    #[test]
    fn timeout_reports_failure_status() {
        let err = ReloadScript::new("false")
            .with_timeout(Some(Duration::from_secs(10)))
            .run()
            .unwrap_err();
        assert!(matches!(err, RouterError::Reload { .. }));
    }

    #[test]
    fn combined_output_order() {
        let output = Output {
            status: ExitStatus::default(),
            stdout: b"reloading\n".to_vec(),
            stderr: b"warning: deprecated\n".to_vec(),
        };
        assert_eq!(combine(&output), "reloading\nwarning: deprecated");
    }
}
