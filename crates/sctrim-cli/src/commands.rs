//! Command implementations.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use sctrim_core::{
    candidate_order, DockerCli, HttpVerifier, MinimizeReport, Minimizer, SeccompProfile,
    TrimConfig,
};

/// Run the minimization loop against the configured service.
pub fn run(config_path: &Path, baseline_path: &Path, resume: bool) -> Result<()> {
    let config = TrimConfig::from_file(config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    // A resumed run reloads the working profile as its baseline: it holds
    // the best committed state of the interrupted run.
    let effective_baseline = if resume && config.paths.working.exists() {
        tracing::info!(
            path = %config.paths.working.display(),
            "resuming from working profile"
        );
        config.paths.working.clone()
    } else {
        baseline_path.to_path_buf()
    };
    let baseline = SeccompProfile::load(&effective_baseline)
        .with_context(|| format!("loading baseline profile {}", effective_baseline.display()))?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let raise = Arc::clone(&interrupt);
    ctrlc::set_handler(move || {
        raise.store(true, Ordering::SeqCst);
        eprintln!("interrupt received; stopping after the current trial");
    })
    .context("installing interrupt handler")?;

    let verifier = HttpVerifier::new(&config.target.base_url, config.timeouts.request())
        .context("building workload client")?;
    let runtime = DockerCli::new(config.target, config.timeouts);

    let report = Minimizer::new(runtime, verifier, config.paths)
        .with_interrupt_flag(interrupt)
        .run(&baseline)
        .context("minimization run failed")?;

    render_report(&report);
    Ok(())
}

/// Print the sorted, deduplicated syscall set of a profile.
pub fn syscalls(profile_path: &Path) -> Result<()> {
    let profile = SeccompProfile::load(profile_path)
        .with_context(|| format!("loading profile {}", profile_path.display()))?;
    for name in candidate_order(&profile) {
        println!("{name}");
    }
    Ok(())
}

fn render_report(report: &MinimizeReport) {
    println!();
    if report.interrupted {
        println!(
            "Minimization interrupted after {} of {} candidates; the working \
             profile below is the usable partial result (rerun with --resume \
             to continue).",
            report.necessary.len() + report.removed.len(),
            report.candidates,
        );
    } else {
        println!("Minimization complete: {} candidates tried.", report.candidates);
    }
    println!(
        "Removed {} syscall(s); {} confirmed necessary:",
        report.removed.len(),
        report.necessary.len(),
    );
    for name in &report.necessary {
        println!("  - {name}");
    }
    println!("Final profile: {}", report.artifact_path.display());
}
