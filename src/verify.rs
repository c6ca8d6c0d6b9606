//! Completeness check run before any approval in a phase
//!
//! Every node that still needs a certificate must have a pending CSR. The check is
//! fail-fast and stateless: CSRs that have not been submitted yet are the caller's
//! problem to wait for, by re-running the whole discovery sequence.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::csr::MatchedCsrs;

/// Nodes that need a certificate but have no matching pending CSR
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not find csr for nodes: {}", join_nodes(.nodes))]
pub struct MissingCsrError {
    /// Nodes still lacking a CSR
    pub nodes: BTreeSet<String>,
}

/// Comma-separated node list for messages
pub(crate) fn join_nodes(nodes: &BTreeSet<String>) -> String {
    nodes.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Ensure every node in `not_ready` appears in `matched`
pub fn verify_complete(
    not_ready: &BTreeSet<String>,
    matched: &MatchedCsrs,
) -> Result<(), MissingCsrError> {
    let covered = matched.nodes();
    let missing: BTreeSet<String> = not_ready
        .iter()
        .filter(|node| !covered.contains(node.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingCsrError { nodes: missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(nodes: &[&str]) -> BTreeSet<String> {
        nodes.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn names_exactly_the_missing_node() {
        let matched: MatchedCsrs = [("csrA", "worker-1")].into_iter().collect();
        let err = verify_complete(&set(&["worker-1", "worker-2"]), &matched).unwrap_err();
        assert_eq!(err.nodes, set(&["worker-2"]));
        assert_eq!(err.to_string(), "could not find csr for nodes: worker-2");
    }

    #[test]
    fn passes_when_every_node_is_covered() {
        let matched: MatchedCsrs = [("some-csr", "fedora1.openshift.io")].into_iter().collect();
        assert!(verify_complete(&set(&["fedora1.openshift.io"]), &matched).is_ok());
    }

    #[test]
    fn extra_matches_for_ready_nodes_are_fine() {
        let matched: MatchedCsrs = [("a", "worker-1"), ("b", "worker-2")].into_iter().collect();
        assert!(verify_complete(&set(&["worker-2"]), &matched).is_ok());
    }

    #[test]
    fn nothing_to_verify_when_all_ready() {
        assert!(verify_complete(&BTreeSet::new(), &MatchedCsrs::new()).is_ok());
    }

    #[test]
    fn empty_match_fails_for_every_unready_node() {
        let err = verify_complete(&set(&["host1", "host2"]), &MatchedCsrs::new()).unwrap_err();
        assert_eq!(err.nodes, set(&["host1", "host2"]));
    }
}
