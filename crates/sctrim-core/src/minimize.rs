//! The greedy minimization controller.
//!
//! Owns the working profile and the necessary-syscall set, and drives the
//! per-candidate trial loop: remove one syscall, trial the result, commit
//! on success, revert otherwise. Single pass, candidates in the fixed
//! lexical order of the *original* baseline snapshot; a removed syscall is
//! never reconsidered, so the working profile's syscall count is
//! non-increasing for the whole run.
//!
//! The working profile is persisted atomically immediately after every
//! commit, never mid-iteration. An interrupted or crashed run therefore
//! leaves the working path holding the best committed state, loadable as
//! the baseline of a resumed run.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::candidates::candidate_order;
use crate::config::PathsConfig;
use crate::profile::{ProfileError, SeccompProfile};
use crate::runtime::ContainerRuntime;
use crate::trial::{run_trial, TrialOutcome};
use crate::verify::WorkloadVerifier;

/// Fatal errors that abort a run.
///
/// Per-trial failures never surface here; they mark the candidate as
/// necessary and the run continues. What does abort: losing the ability to
/// persist the working or final artifact, since continuing would risk an
/// unauditable result.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MinimizeError {
    /// The working or final profile could not be persisted.
    #[error("persisting run artifact: {0}")]
    Persist(#[from] ProfileError),
}

/// End-of-run summary.
#[derive(Debug, Clone)]
pub struct MinimizeReport {
    /// Syscalls confirmed required by a failed removal trial.
    pub necessary: BTreeSet<String>,
    /// Syscalls removed by committed trials.
    pub removed: BTreeSet<String>,
    /// Total candidates enumerated from the baseline.
    pub candidates: usize,
    /// Whether the run stopped early on an interrupt.
    pub interrupted: bool,
    /// The usable result: the minimized artifact, or the working profile
    /// when the run was interrupted.
    pub artifact_path: PathBuf,
}

impl MinimizeReport {
    /// Candidates never trialed (non-zero only for interrupted runs).
    #[must_use]
    pub fn untried(&self) -> usize {
        self.candidates - self.necessary.len() - self.removed.len()
    }
}

/// The minimization controller.
///
/// Generic over the runtime and verifier seams so the loop is testable
/// without a container runtime.
pub struct Minimizer<R, V> {
    runtime: R,
    verifier: V,
    paths: PathsConfig,
    interrupt: Arc<AtomicBool>,
}

impl<R, V> Minimizer<R, V>
where
    R: ContainerRuntime,
    V: WorkloadVerifier,
{
    /// A controller writing its artifacts to `paths`.
    #[must_use]
    pub fn new(runtime: R, verifier: V, paths: PathsConfig) -> Self {
        Self {
            runtime,
            verifier,
            paths,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally-owned interrupt flag. The loop stops cleanly at
    /// the next trial boundary after the flag is raised.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Run the full minimization against `baseline`.
    ///
    /// # Errors
    ///
    /// Returns [`MinimizeError`] only for unrecoverable persistence
    /// failures on the working or final path. On success, including
    /// interrupted runs, the report names the usable artifact.
    pub fn run(&self, baseline: &SeccompProfile) -> Result<MinimizeReport, MinimizeError> {
        let mut working = baseline.clone();
        working.save(&self.paths.working)?;

        // Fixed order, computed once from the baseline snapshot.
        let order = candidate_order(baseline);
        tracing::info!(candidates = order.len(), "starting minimization");

        let mut necessary = BTreeSet::new();
        let mut removed = BTreeSet::new();
        let mut interrupted = false;

        for (index, name) in order.iter().enumerate() {
            if self.interrupt.load(Ordering::SeqCst) {
                tracing::warn!(
                    next = %name,
                    "interrupt received; stopping before next trial"
                );
                interrupted = true;
                break;
            }
            if !working.contains_syscall(name) {
                tracing::debug!(candidate = %name, "already absent from working profile");
                continue;
            }

            tracing::info!(
                candidate = %name,
                index = index + 1,
                total = order.len(),
                "trialing removal"
            );

            let trial = working.without_syscall(name);
            let trial_path = self.trial_path(name);
            let outcome = match trial.save(&trial_path) {
                Ok(()) => run_trial(&self.runtime, &self.verifier, &trial_path),
                // A trial profile that cannot be persisted is an anomaly of
                // this trial, not of the run.
                Err(e) => TrialOutcome::TrialError {
                    detail: format!("persisting trial profile: {e}"),
                },
            };

            if outcome.is_success() {
                working = trial;
                working.save(&self.paths.working)?;
                removed.insert(name.clone());
                tracing::info!(candidate = %name, "removal committed");
            } else {
                necessary.insert(name.clone());
                tracing::info!(
                    candidate = %name,
                    outcome = outcome.label(),
                    detail = outcome.detail().unwrap_or_default(),
                    "removal reverted; syscall is necessary"
                );
            }

            if let Err(e) = std::fs::remove_file(&trial_path) {
                tracing::debug!(path = %trial_path.display(), error = %e, "trial profile not removed");
            }
        }

        // Nothing of ours may outlive the run.
        self.runtime.reap();

        let artifact_path = if interrupted {
            self.paths.working.clone()
        } else {
            working.save(&self.paths.minimized)?;
            self.paths.minimized.clone()
        };

        tracing::info!(
            necessary = necessary.len(),
            removed = removed.len(),
            artifact = %artifact_path.display(),
            "minimization finished"
        );

        Ok(MinimizeReport {
            necessary,
            removed,
            candidates: order.len(),
            interrupted,
            artifact_path,
        })
    }

    fn trial_path(&self, candidate: &str) -> PathBuf {
        self.paths
            .trial_dir
            .join(format!("seccomp-trial-{candidate}.json"))
    }
}
