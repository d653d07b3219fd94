//! Candidate ordering for a minimization run.

use crate::profile::SeccompProfile;

/// The deterministic trial order for a profile: its flattened syscall set,
/// deduplicated and in lexical order.
///
/// The controller computes this once from the initial working snapshot, so
/// a run is reproducible given the same baseline. Lexical order is a
/// documented, deliberate choice: the result of greedy removal depends on
/// it, and re-planning the order mid-run would change observable output.
#[must_use]
pub fn candidate_order(profile: &SeccompProfile) -> Vec<String> {
    // BTreeSet iteration is already sorted.
    profile.flattened_syscalls().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::SyscallRule;

    fn profile(groups: &[&[&str]]) -> SeccompProfile {
        SeccompProfile {
            default_action: "SCMP_ACT_ERRNO".to_string(),
            architectures: Vec::new(),
            syscalls: groups
                .iter()
                .map(|names| SyscallRule {
                    names: names.iter().map(ToString::to_string).collect(),
                    action: "SCMP_ACT_ALLOW".to_string(),
                    rest: serde_json::Map::new(),
                })
                .collect(),
            rest: serde_json::Map::new(),
        }
    }

    #[test]
    fn order_is_sorted_and_deduplicated() {
        let p = profile(&[&["write", "futex"], &["read", "write"]]);
        assert_eq!(candidate_order(&p), ["futex", "read", "write"]);
    }

    #[test]
    fn order_is_stable_across_calls() {
        let p = profile(&[&["socket", "openat", "read"]]);
        assert_eq!(candidate_order(&p), candidate_order(&p));
    }

    #[test]
    fn empty_profile_yields_no_candidates() {
        let p = profile(&[]);
        assert!(candidate_order(&p).is_empty());
    }
}
