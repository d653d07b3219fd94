//! Run configuration.
//!
//! The fixed sandbox settings of a minimization run (target image,
//! published port, extra security options, timeouts, artifact paths) live
//! in a TOML file. They are external configuration, not part of the core
//! contract: the controller only ever sees them through [`TrimConfig`].
//!
//! Every field has a default matching the service this tool was first
//! hardened against, so a missing config file is not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for this schema.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The parsed config is semantically invalid.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration for a minimization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrimConfig {
    /// Target service settings.
    #[serde(default)]
    pub target: TargetConfig,

    /// Bounded-wait ceilings.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Artifact paths.
    #[serde(default)]
    pub paths: PathsConfig,
}

impl TrimConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read, parsed,
    /// or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.target.image.trim().is_empty() {
            return Err(ConfigError::Validation(
                "target.image must not be empty".to_string(),
            ));
        }
        if self.target.published_port == 0 {
            return Err(ConfigError::Validation(
                "target.published_port must be non-zero".to_string(),
            ));
        }
        if !self.target.base_url.starts_with("http://") && !self.target.base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "target.base_url must be an http(s) URL, got '{}'",
                self.target.base_url
            )));
        }
        Ok(())
    }
}

/// The service under test and its fixed sandbox options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Container image identity. Also used to reap orphaned instances.
    #[serde(default = "default_image")]
    pub image: String,

    /// Host port the service publishes; mapped 1:1 into the container.
    #[serde(default = "default_published_port")]
    pub published_port: u16,

    /// Base URL the workload battery runs against.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Extra `--security-opt` values beyond the trial seccomp profile.
    #[serde(default = "default_security_opts")]
    pub security_opts: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            published_port: default_published_port(),
            base_url: default_base_url(),
            security_opts: default_security_opts(),
        }
    }
}

/// Hard ceilings for every bounded wait in a trial.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Ceiling for the launch command itself to return an instance id.
    #[serde(default = "default_startup_secs")]
    pub startup_secs: u64,

    /// Fixed wait after launch before querying running state, absorbing
    /// normal startup latency.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// Per-request ceiling for each workload check.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

impl TimeoutsConfig {
    /// Startup ceiling as a [`Duration`].
    #[must_use]
    pub const fn startup(&self) -> Duration {
        Duration::from_secs(self.startup_secs)
    }

    /// Settle delay as a [`Duration`].
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Per-request ceiling as a [`Duration`].
    #[must_use]
    pub const fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            startup_secs: default_startup_secs(),
            settle_secs: default_settle_secs(),
            request_secs: default_request_secs(),
        }
    }
}

/// Where run artifacts are written. Single-writer: only the controller
/// touches these paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Best-known-good profile, rewritten after every committed removal.
    #[serde(default = "default_working_path")]
    pub working: PathBuf,

    /// Final minimized artifact, written at run end.
    #[serde(default = "default_minimized_path")]
    pub minimized: PathBuf,

    /// Directory for per-candidate trial profiles.
    #[serde(default = "default_trial_dir")]
    pub trial_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            working: default_working_path(),
            minimized: default_minimized_path(),
            trial_dir: default_trial_dir(),
        }
    }
}

fn default_image() -> String {
    "flask:0.0.3".to_string()
}

fn default_published_port() -> u16 {
    5000
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_security_opts() -> Vec<String> {
    vec!["apparmor=apparmor-flask".to_string()]
}

const fn default_startup_secs() -> u64 {
    30
}

const fn default_settle_secs() -> u64 {
    5
}

const fn default_request_secs() -> u64 {
    10
}

fn default_working_path() -> PathBuf {
    PathBuf::from("seccomp.json")
}

fn default_minimized_path() -> PathBuf {
    PathBuf::from("seccomp-minimized.json")
}

fn default_trial_dir() -> PathBuf {
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TrimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target.image, "flask:0.0.3");
        assert_eq!(config.target.published_port, 5000);
        assert_eq!(config.timeouts.settle(), Duration::from_secs(5));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            TrimConfig::from_file(Path::new("/nonexistent/sctrim.toml")).expect("defaults");
        assert_eq!(config.paths.working, PathBuf::from("seccomp.json"));
    }

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let config = TrimConfig::from_toml(
            r#"
            [target]
            image = "svc:1.2"
            published_port = 8080
            base_url = "http://localhost:8080"

            [timeouts]
            settle_secs = 2
            "#,
        )
        .expect("parse");
        assert_eq!(config.target.image, "svc:1.2");
        assert_eq!(config.timeouts.settle_secs, 2);
        assert_eq!(config.timeouts.startup_secs, 30);
        assert_eq!(
            config.target.security_opts,
            vec!["apparmor=apparmor-flask".to_string()]
        );
    }

    #[test]
    fn rejects_empty_image() {
        let err = TrimConfig::from_toml("[target]\nimage = \"\"").expect_err("must reject");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_zero_port() {
        let err =
            TrimConfig::from_toml("[target]\npublished_port = 0").expect_err("must reject");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = TrimConfig::from_toml("[target]\nbase_url = \"localhost:5000\"")
            .expect_err("must reject");
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
