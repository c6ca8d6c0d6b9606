//! Error types for the bootstrap approver

use std::collections::BTreeSet;

use thiserror::Error;

use crate::approval::ApprovalFailed;
use crate::csr::UsageClass;
use crate::verify::join_nodes;

/// Main error type for bootstrap approval runs
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Listing nodes or CSRs failed
    #[error("query error: {0}")]
    Query(String),

    /// External command could not be run or exited non-zero
    #[error("command error: {0}")]
    Command(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Some nodes that need a certificate have no pending CSR yet
    #[error("could not find {phase} csr for nodes: {}", join_nodes(.nodes))]
    MissingCsr {
        /// Phase that was being verified
        phase: UsageClass,
        /// Nodes without a pending CSR
        nodes: BTreeSet<String>,
    },

    /// An approval action failed partway through a phase
    #[error("{phase} approval failed: {source}")]
    Approval {
        /// Phase whose approvals were running
        phase: UsageClass,
        /// Failure with the outcomes gathered before it
        #[source]
        source: ApprovalFailed,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a query error with the given message
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a command error with the given message
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether re-running the whole workflow later may succeed
    ///
    /// Only missing CSRs qualify: the node may simply not have submitted one yet.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::MissingCsr { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalError, ApprovalOutcome};

    /// Story: a supervisor reading the error learns exactly which nodes to wait for
    #[test]
    fn story_missing_csr_names_every_node() {
        let err = Error::MissingCsr {
            phase: UsageClass::Client,
            nodes: BTreeSet::from(["worker-2".to_string(), "worker-1".to_string()]),
        };
        assert_eq!(
            err.to_string(),
            "could not find client csr for nodes: worker-1, worker-2"
        );
        assert!(err.is_retryable());
    }

    /// Story: approval failures are terminal and keep the phase in the message
    #[test]
    fn story_approval_failure_is_not_retryable() {
        let err = Error::Approval {
            phase: UsageClass::Server,
            source: ApprovalFailed {
                outcomes: vec![ApprovalOutcome::approved("csr-a", "worker-1", "approved")],
                error: ApprovalError::new("csr-b", "forbidden"),
            },
        };
        let msg = err.to_string();
        assert!(msg.starts_with("server approval failed"));
        assert!(msg.contains("csr-b"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn story_error_construction_ergonomics() {
        let err = Error::query(format!("failed to list {}", "nodes"));
        assert_eq!(err.to_string(), "query error: failed to list nodes");

        let err = Error::command("oc exited with status 1");
        assert!(err.to_string().contains("status 1"));

        let err = Error::config("node roster is empty");
        assert!(matches!(err, Error::Config(_)));
        assert!(!err.is_retryable());
    }
}
