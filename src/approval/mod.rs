//! Sequential CSR approval
//!
//! Approves matched CSRs one at a time in match order. The first failed action
//! stops the phase, and the error still carries every outcome gathered so far so
//! the caller can tell which approvals already took effect.
//!
//! There are no retries here: re-approving an approved CSR is harmless at the API
//! level, so the whole run can simply be repeated.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::csr::MatchedCsrs;

/// Condition type recorded on approved CSRs
pub const APPROVED_CONDITION: &str = "Approved";

/// Reason recorded on conditions this tool adds
pub const APPROVAL_REASON: &str = "BootstrapApproverApprove";

/// A single approval action failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("approving csr {csr} failed: {message}")]
pub struct ApprovalError {
    /// CSR being approved
    pub csr: String,
    /// Error text reported by the action
    pub message: String,
}

impl ApprovalError {
    /// Create an approval error for `csr`
    pub fn new(csr: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            csr: csr.into(),
            message: message.into(),
        }
    }
}

/// Result of one approval action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ApprovalOutcome {
    /// The action succeeded
    Approved {
        /// CSR name
        csr: String,
        /// Node the CSR belongs to
        node: String,
        /// Text reported by the action
        message: String,
    },
    /// The action failed
    Failed {
        /// CSR name
        csr: String,
        /// Node the CSR belongs to
        node: String,
        /// Error text reported by the action
        error: String,
    },
}

impl ApprovalOutcome {
    /// Successful outcome
    pub fn approved(
        csr: impl Into<String>,
        node: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Approved {
            csr: csr.into(),
            node: node.into(),
            message: message.into(),
        }
    }

    /// Failed outcome
    pub fn failed(csr: impl Into<String>, node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failed {
            csr: csr.into(),
            node: node.into(),
            error: error.into(),
        }
    }

    /// CSR this outcome is about
    pub fn csr(&self) -> &str {
        match self {
            Self::Approved { csr, .. } | Self::Failed { csr, .. } => csr,
        }
    }

    /// Whether the approval took effect
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// A phase stopped at a failed approval
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} ({} approved before the failure)", count_approved(.outcomes))]
pub struct ApprovalFailed {
    /// Outcomes in execution order, ending with the failed one
    pub outcomes: Vec<ApprovalOutcome>,
    /// The failure that stopped the phase
    #[source]
    pub error: ApprovalError,
}

/// Number of outcomes that took effect
pub fn count_approved(outcomes: &[ApprovalOutcome]) -> usize {
    outcomes.iter().filter(|o| o.is_approved()).count()
}

/// Trait abstracting the approval action
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CsrApprover: Send + Sync {
    /// Approve `csr`, returning the text the action reported
    async fn approve(&self, csr: &str) -> Result<String, ApprovalError>;
}

/// Approve every matched CSR in order, stopping at the first failure
pub async fn approve_all<A: CsrApprover + ?Sized>(
    approver: &A,
    matched: &MatchedCsrs,
) -> Result<Vec<ApprovalOutcome>, ApprovalFailed> {
    let mut outcomes = Vec::with_capacity(matched.len());

    for entry in matched.iter() {
        match approver.approve(&entry.csr).await {
            Ok(message) => {
                info!(csr = %entry.csr, node = %entry.node, "approved CSR");
                outcomes.push(ApprovalOutcome::approved(&entry.csr, &entry.node, message));
            }
            Err(e) => {
                error!(csr = %entry.csr, node = %entry.node, error = %e.message, "CSR approval failed");
                outcomes.push(ApprovalOutcome::failed(
                    &entry.csr,
                    &entry.node,
                    e.message.clone(),
                ));
                return Err(ApprovalFailed { outcomes, error: e });
            }
        }
    }

    Ok(outcomes)
}
