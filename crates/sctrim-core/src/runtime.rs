//! The container runtime boundary.
//!
//! [`ContainerRuntime`] is the seam between the minimization loop and the
//! sandbox runtime. The production implementation, [`DockerCli`], drives
//! the `docker` binary; tests substitute a scripted fake. One instance
//! exists at a time: [`ContainerRuntime::reap`] runs before every launch so
//! an orphan left by a previous abnormal exit (identified by image, not by
//! handle) cannot contend for the published port or be misattributed to the
//! current trial.
//!
//! Launch embeds the health probe: after the launch command returns an
//! instance id, a fixed settle delay absorbs normal startup latency, then a
//! single running-state query distinguishes "never came up" from "came up
//! but broken". The captured instance output is fetched *before* the dead
//! instance is removed, because it is the only diagnostic evidence for a
//! startup failure and is gone once the instance is.

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{TargetConfig, TimeoutsConfig};

/// How often the bounded launch wait polls the child process.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to one running isolated instance, valid from launch to teardown.
/// Never reused across trials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wrap a runtime-issued instance identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The runtime's identifier for this instance.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from launching an instance.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// The launch command did not return within the startup ceiling.
    #[error("launch command exceeded {}s startup ceiling", .timeout.as_secs())]
    Timeout {
        /// The ceiling that was exceeded.
        timeout: Duration,
    },

    /// The launch command exited non-zero.
    #[error("launch failed: {stderr}")]
    StartFailure {
        /// Diagnostic text produced by the runtime.
        stderr: String,
    },

    /// An instance id was acquired but the instance was not running after
    /// the settle delay.
    #[error("instance not running after settle delay; captured output:\n{output}")]
    NotRunning {
        /// Output captured from the instance before removal.
        output: String,
    },

    /// Driving the runtime itself failed unexpectedly.
    #[error("runtime io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The sandbox runtime as the minimization loop sees it.
pub trait ContainerRuntime {
    /// Launch one isolated instance enforcing the seccomp profile at
    /// `profile_path`, probe it to a running state, and return its handle.
    ///
    /// # Errors
    ///
    /// See [`LaunchError`]. All variants are per-trial failures; none abort
    /// the run.
    fn launch(&self, profile_path: &Path) -> Result<InstanceId, LaunchError>;

    /// Best-effort stop of a launched instance. Never fails: teardown runs
    /// in cleanup paths where the instance may already be gone, so failures
    /// are logged and swallowed.
    fn teardown(&self, id: &InstanceId);

    /// Best-effort stop of any instance of the configured image, catching
    /// orphans from a previous abnormal exit. Never fails.
    fn reap(&self);
}

/// Production runtime: the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    target: TargetConfig,
    timeouts: TimeoutsConfig,
}

impl DockerCli {
    /// A runtime for the given target and timeout configuration.
    #[must_use]
    pub const fn new(target: TargetConfig, timeouts: TimeoutsConfig) -> Self {
        Self { target, timeouts }
    }

    /// A `docker` command with hint/prompt output suppressed for
    /// deterministic parsing.
    fn docker_command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.env("DOCKER_CLI_HINTS", "false");
        cmd
    }

    /// Argument vector for the launch command.
    fn run_args(&self, profile_path: &Path) -> Vec<String> {
        let port = self.target.published_port;
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            format!("--security-opt=seccomp={}", profile_path.display()),
        ];
        for opt in &self.target.security_opts {
            args.push(format!("--security-opt={opt}"));
        }
        args.push("-p".to_string());
        args.push(format!("{port}:{port}"));
        args.push(self.target.image.clone());
        args
    }

    /// Whether the runtime reports the instance as running. A failed query
    /// (instance already removed, runtime hiccup) reads as not running.
    fn inspect_running(&self, id: &InstanceId) -> bool {
        let output = self
            .docker_command()
            .args(["inspect", "-f", "{{.State.Running}}"])
            .arg(id.as_str())
            .output();
        match output {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim() == "true"
            }
            Ok(out) => {
                tracing::debug!(
                    instance = %id,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "inspect reported failure"
                );
                false
            }
            Err(e) => {
                tracing::debug!(instance = %id, error = %e, "inspect did not run");
                false
            }
        }
    }

    /// Captured stdout/stderr of the instance, best-effort.
    fn captured_output(&self, id: &InstanceId) -> String {
        let output = self
            .docker_command()
            .args(["logs"])
            .arg(id.as_str())
            .output();
        match output {
            Ok(out) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !stderr.trim().is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(stderr.trim_end());
                }
                if text.trim().is_empty() {
                    "<no output captured>".to_string()
                } else {
                    text
                }
            }
            Err(e) => format!("<output unavailable: {e}>"),
        }
    }

    /// Force-remove an instance, swallowing failures.
    fn remove(&self, id: &InstanceId) {
        match self
            .docker_command()
            .args(["rm", "-f"])
            .arg(id.as_str())
            .output()
        {
            Ok(out) if !out.status.success() => {
                tracing::debug!(
                    instance = %id,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "remove reported failure"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(instance = %id, error = %e, "remove did not run"),
        }
    }
}

impl ContainerRuntime for DockerCli {
    fn launch(&self, profile_path: &Path) -> Result<InstanceId, LaunchError> {
        let timeout = self.timeouts.startup();
        let mut cmd = self.docker_command();
        cmd.args(self.run_args(profile_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(profile = %profile_path.display(), "launching instance");
        let mut child = cmd.spawn()?;
        let Some(_status) = wait_with_deadline(&mut child, timeout)? else {
            return Err(LaunchError::Timeout { timeout });
        };

        // The exit status is already reaped; this drains the pipes and
        // returns the cached status.
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(LaunchError::StartFailure {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(LaunchError::StartFailure {
                stderr: "launch succeeded but produced no instance id".to_string(),
            });
        }
        let id = InstanceId(id);

        std::thread::sleep(self.timeouts.settle());

        if !self.inspect_running(&id) {
            // Output must be captured before removal; it is unavailable
            // once the instance is gone.
            let output = self.captured_output(&id);
            self.remove(&id);
            return Err(LaunchError::NotRunning { output });
        }

        tracing::debug!(instance = %id, "instance running");
        Ok(id)
    }

    fn teardown(&self, id: &InstanceId) {
        match self
            .docker_command()
            .args(["stop"])
            .arg(id.as_str())
            .output()
        {
            Ok(out) if !out.status.success() => {
                tracing::warn!(
                    instance = %id,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "teardown reported failure"
                );
            }
            Ok(_) => tracing::debug!(instance = %id, "instance stopped"),
            Err(e) => tracing::warn!(instance = %id, error = %e, "teardown did not run"),
        }
    }

    fn reap(&self) {
        let listed = self
            .docker_command()
            .args(["ps", "-q", "--filter"])
            .arg(format!("ancestor={}", self.target.image))
            .output();
        let ids = match listed {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
            Ok(out) => {
                tracing::warn!(
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "orphan listing reported failure"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "orphan listing did not run");
                return;
            }
        };
        for id in ids.lines().map(str::trim).filter(|id| !id.is_empty()) {
            tracing::info!(instance = %id, image = %self.target.image, "reaping orphaned instance");
            self.teardown(&InstanceId(id.to_string()));
        }
    }
}

/// Block until the child exits or the deadline passes, polling at
/// [`WAIT_POLL_INTERVAL`]. On expiry the child is killed and `None` is
/// returned.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrimConfig;

    fn docker() -> DockerCli {
        let config = TrimConfig::default();
        DockerCli::new(config.target, config.timeouts)
    }

    #[test]
    fn run_args_carry_profile_port_and_security_opts() {
        let args = docker().run_args(Path::new("/tmp/trial.json"));
        assert_eq!(args[0], "run");
        assert!(args.contains(&"-d".to_string()));
        assert!(args.contains(&"--rm".to_string()));
        assert!(args.contains(&"--security-opt=seccomp=/tmp/trial.json".to_string()));
        assert!(args.contains(&"--security-opt=apparmor=apparmor-flask".to_string()));
        assert!(args.contains(&"5000:5000".to_string()));
        assert_eq!(args.last(), Some(&"flask:0.0.3".to_string()));
    }

    #[test]
    fn seccomp_opt_precedes_extra_security_opts() {
        // The trial profile is always the first security option.
        let args = docker().run_args(Path::new("p.json"));
        let seccomp = args
            .iter()
            .position(|a| a.starts_with("--security-opt=seccomp="))
            .expect("seccomp opt present");
        let apparmor = args
            .iter()
            .position(|a| a.starts_with("--security-opt=apparmor="))
            .expect("apparmor opt present");
        assert!(seccomp < apparmor);
    }

    #[cfg(unix)]
    #[test]
    fn wait_with_deadline_returns_status_for_fast_child() {
        let mut child = Command::new("true").spawn().expect("spawn");
        let status = wait_with_deadline(&mut child, Duration::from_secs(5))
            .expect("wait")
            .expect("exited");
        assert!(status.success());
    }

    #[cfg(unix)]
    #[test]
    fn wait_with_deadline_kills_slow_child() {
        let mut child = Command::new("sleep").arg("30").spawn().expect("spawn");
        let start = Instant::now();
        let status =
            wait_with_deadline(&mut child, Duration::from_millis(200)).expect("wait");
        assert!(status.is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
