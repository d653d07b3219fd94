//! One launch -> probe -> verify cycle.
//!
//! A trial takes a candidate profile already persisted to disk, launches
//! an instance under it, and reduces everything that can happen to a
//! single [`TrialOutcome`]. The controller treats every non-success
//! variant identically (the candidate syscall is kept), so the taxonomy
//! exists for reporting and diagnostics, not for control flow.
//!
//! Teardown is guaranteed: a successfully launched instance is stopped
//! exactly once, on every exit path out of the trial, including panics in
//! the verifier.

use std::path::Path;

use crate::runtime::{ContainerRuntime, InstanceId, LaunchError};
use crate::verify::WorkloadVerifier;

/// The result of one trial. Exactly one outcome is produced per candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome {
    /// Instance started, stayed alive, and served the full battery.
    Success,
    /// The launch command itself failed.
    StartupFailure {
        /// Diagnostic text from the runtime.
        detail: String,
    },
    /// The launch command never returned within the startup ceiling.
    LivenessTimeout {
        /// Human-readable description of the exceeded ceiling.
        detail: String,
    },
    /// The instance came up, then was dead after the settle delay.
    NotRunning {
        /// Output captured from the instance before removal.
        detail: String,
    },
    /// The instance ran but failed a workload check.
    FunctionalFailure {
        /// The failing check.
        detail: String,
    },
    /// Anything unexpected while driving the trial.
    TrialError {
        /// Error text, logged with full context.
        detail: String,
    },
}

impl TrialOutcome {
    /// Whether the candidate removal is safe to commit.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short machine-friendly name for logs and reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::StartupFailure { .. } => "startup-failure",
            Self::LivenessTimeout { .. } => "liveness-timeout",
            Self::NotRunning { .. } => "not-running",
            Self::FunctionalFailure { .. } => "functional-failure",
            Self::TrialError { .. } => "trial-error",
        }
    }

    /// Diagnostic detail, when the outcome carries one.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::StartupFailure { detail }
            | Self::LivenessTimeout { detail }
            | Self::NotRunning { detail }
            | Self::FunctionalFailure { detail }
            | Self::TrialError { detail } => Some(detail),
        }
    }
}

impl std::fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{}: {detail}", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Stops the instance when dropped, so teardown survives early returns and
/// verifier panics.
struct TeardownGuard<'a, R: ContainerRuntime> {
    runtime: &'a R,
    id: InstanceId,
}

impl<R: ContainerRuntime> Drop for TeardownGuard<'_, R> {
    fn drop(&mut self) {
        self.runtime.teardown(&self.id);
    }
}

/// Run one trial of the profile at `profile_path`.
///
/// Reaps orphaned instances first (one-instance-at-a-time discipline),
/// launches, and verifies only if the instance reached a running state.
pub fn run_trial<R, V>(runtime: &R, verifier: &V, profile_path: &Path) -> TrialOutcome
where
    R: ContainerRuntime,
    V: WorkloadVerifier,
{
    runtime.reap();

    match runtime.launch(profile_path) {
        Ok(id) => {
            let _guard = TeardownGuard { runtime, id };
            match verifier.verify() {
                Ok(()) => TrialOutcome::Success,
                Err(e) => TrialOutcome::FunctionalFailure {
                    detail: e.to_string(),
                },
            }
        }
        Err(e @ LaunchError::Timeout { .. }) => TrialOutcome::LivenessTimeout {
            detail: e.to_string(),
        },
        Err(LaunchError::StartFailure { stderr }) => {
            TrialOutcome::StartupFailure { detail: stderr }
        }
        Err(LaunchError::NotRunning { output }) => TrialOutcome::NotRunning { detail: output },
        Err(e @ LaunchError::Io(_)) => TrialOutcome::TrialError {
            detail: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::PathBuf;

    use super::*;
    use crate::verify::VerifyError;

    struct FakeRuntime {
        launch_result: fn() -> Result<InstanceId, LaunchError>,
        teardowns: Cell<usize>,
    }

    impl FakeRuntime {
        fn new(launch_result: fn() -> Result<InstanceId, LaunchError>) -> Self {
            Self {
                launch_result,
                teardowns: Cell::new(0),
            }
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn launch(&self, _profile_path: &Path) -> Result<InstanceId, LaunchError> {
            (self.launch_result)()
        }

        fn teardown(&self, _id: &InstanceId) {
            self.teardowns.set(self.teardowns.get() + 1);
        }

        fn reap(&self) {}
    }

    struct FakeVerifier {
        verdict: Result<(), fn() -> VerifyError>,
        calls: Cell<usize>,
    }

    impl WorkloadVerifier for FakeVerifier {
        fn verify(&self) -> Result<(), VerifyError> {
            self.calls.set(self.calls.get() + 1);
            self.verdict.map_err(|make| make())
        }
    }

    fn passing_verifier() -> FakeVerifier {
        FakeVerifier {
            verdict: Ok(()),
            calls: Cell::new(0),
        }
    }

    fn instance() -> Result<InstanceId, LaunchError> {
        Ok(InstanceId::new("fake"))
    }

    #[test]
    fn successful_trial_tears_down_exactly_once() {
        let runtime = FakeRuntime::new(instance);
        let verifier = passing_verifier();
        let outcome = run_trial(&runtime, &verifier, &PathBuf::from("p.json"));
        assert_eq!(outcome, TrialOutcome::Success);
        assert_eq!(runtime.teardowns.get(), 1);
        assert_eq!(verifier.calls.get(), 1);
    }

    #[test]
    fn failed_launch_never_invokes_verifier() {
        let runtime = FakeRuntime::new(|| {
            Err(LaunchError::StartFailure {
                stderr: "no such image".to_string(),
            })
        });
        let verifier = passing_verifier();
        let outcome = run_trial(&runtime, &verifier, &PathBuf::from("p.json"));
        assert_eq!(outcome.label(), "startup-failure");
        assert_eq!(verifier.calls.get(), 0);
        assert_eq!(runtime.teardowns.get(), 0);
    }

    #[test]
    fn launch_timeout_maps_to_liveness_timeout() {
        let runtime = FakeRuntime::new(|| {
            Err(LaunchError::Timeout {
                timeout: std::time::Duration::from_secs(30),
            })
        });
        let verifier = passing_verifier();
        let outcome = run_trial(&runtime, &verifier, &PathBuf::from("p.json"));
        assert_eq!(outcome.label(), "liveness-timeout");
    }

    #[test]
    fn dead_instance_maps_to_not_running_with_output() {
        let runtime = FakeRuntime::new(|| {
            Err(LaunchError::NotRunning {
                output: "Fatal Python error".to_string(),
            })
        });
        let verifier = passing_verifier();
        let outcome = run_trial(&runtime, &verifier, &PathBuf::from("p.json"));
        assert_eq!(outcome.detail(), Some("Fatal Python error"));
    }

    #[test]
    fn failed_check_maps_to_functional_failure_and_tears_down() {
        let runtime = FakeRuntime::new(instance);
        let verifier = FakeVerifier {
            verdict: Err(|| VerifyError::Status {
                check: "api-write",
                status: 500,
            }),
            calls: Cell::new(0),
        };
        let outcome = run_trial(&runtime, &verifier, &PathBuf::from("p.json"));
        assert_eq!(outcome.label(), "functional-failure");
        assert_eq!(runtime.teardowns.get(), 1);
    }
}
