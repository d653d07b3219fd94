//! Seccomp profile documents.
//!
//! A profile is the Docker seccomp JSON format: a default action plus an
//! ordered sequence of rule groups, each pairing an action with a set of
//! syscall names. Fields this tool does not interpret (errno returns, arch
//! maps, argument filters) are carried through untouched so a saved profile
//! is still a complete, loadable Docker profile.
//!
//! Profiles are value types: every mutation produces a new value. The one
//! mutating operation, [`SeccompProfile::without_syscall`], is pure and
//! idempotent, which makes prior snapshots safe to retain and re-persist at
//! any point of a minimization run.

use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or persisting a profile document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProfileError {
    /// The document is not structurally valid seccomp JSON.
    #[error("malformed profile {path}: {source}")]
    Malformed {
        /// Path of the offending document.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The document could not be read or written.
    #[error("profile io error for {path}: {source}")]
    Io {
        /// Path of the offending document.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// One rule group: an action applied to a set of syscall names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyscallRule {
    /// Syscall names this rule applies to.
    #[serde(default)]
    pub names: Vec<String>,

    /// Seccomp action, e.g. `SCMP_ACT_ALLOW`.
    pub action: String,

    /// Uninterpreted rule fields (args, errno returns, comments).
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// A Docker seccomp profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeccompProfile {
    /// Action taken for syscalls not matched by any rule.
    #[serde(rename = "defaultAction")]
    pub default_action: String,

    /// Architectures the profile applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,

    /// Ordered rule groups.
    #[serde(default)]
    pub syscalls: Vec<SyscallRule>,

    /// Uninterpreted top-level fields (errno defaults, arch maps).
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl SeccompProfile {
    /// Load a profile from a JSON document on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Io`] when the file cannot be read and
    /// [`ProfileError::Malformed`] when it is not a structurally valid
    /// profile. A malformed baseline is fatal to a minimization run.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ProfileError::Malformed {
            path: path.display().to_string(),
            source,
        })
    }

    /// Persist the profile as canonical, deterministically-ordered JSON.
    ///
    /// The write is atomic: content goes to a temp file in the target
    /// directory, is fsynced, then renamed over the destination. A reader
    /// of the path therefore always sees a complete, loadable profile,
    /// including across interruption mid-run.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Io`] when the temp file cannot be created,
    /// written, synced, or renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        let io_err = |source: std::io::Error| ProfileError::Io {
            path: path.display().to_string(),
            source,
        };

        // Struct fields serialize in declaration order and flattened maps
        // are BTreeMap-backed, so identical profiles produce identical
        // bytes.
        let mut bytes = serde_json::to_vec_pretty(self).map_err(|source| {
            ProfileError::Malformed {
                path: path.display().to_string(),
                source,
            }
        })?;
        bytes.push(b'\n');

        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        temp.as_file_mut().write_all(&bytes).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(path)
            .map_err(|e| io_err(e.error))
            .map(|_| ())
    }

    /// The deduplicated union of every rule group's syscall names.
    #[must_use]
    pub fn flattened_syscalls(&self) -> BTreeSet<String> {
        self.syscalls
            .iter()
            .flat_map(|rule| rule.names.iter().cloned())
            .collect()
    }

    /// Whether any rule group references `name`.
    #[must_use]
    pub fn contains_syscall(&self, name: &str) -> bool {
        self.syscalls
            .iter()
            .any(|rule| rule.names.iter().any(|n| n == name))
    }

    /// A new profile with `name` absent from every rule group.
    ///
    /// Groups that become empty are retained rather than pruned, so the
    /// structural shape of the baseline stays auditable in the minimized
    /// artifact. Pure and idempotent: removing an absent name is a no-op.
    #[must_use]
    pub fn without_syscall(&self, name: &str) -> Self {
        let mut next = self.clone();
        for rule in &mut next.syscalls {
            rule.names.retain(|n| n != name);
        }
        next
    }
}
